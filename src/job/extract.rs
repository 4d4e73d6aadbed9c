// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{fs, path::PathBuf, sync::Arc, time::Instant};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Job, Reply};
use crate::package::Package;

/// First stage of the pipeline: download the kernel package, pull the
/// vmlinux image out of it, and reply with the vmlinux path. When a prior
/// run already left the vmlinux behind, it is reused as-is.
pub struct KernelExtractionJob {
    pub package: Arc<dyn Package>,
    pub work_dir: PathBuf,
    pub force: bool,
    pub reply: Option<Reply>,
}

impl KernelExtractionJob {
    fn send_reply(&mut self, vmlinux_path: PathBuf) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(vmlinux_path));
        }
    }
}

#[async_trait]
impl Job for KernelExtractionJob {
    async fn run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        let vmlinux_name = format!("vmlinux-{}", self.package.filename());
        let vmlinux_path = self.work_dir.join(vmlinux_name);

        if !self.force && vmlinux_path.exists() {
            self.send_reply(vmlinux_path); // already extracted
            return Ok(());
        }

        let download_start = Instant::now();
        debug!("downloading {}", self.package);

        let pkg_path = self
            .package
            .download(shutdown, &self.work_dir, self.force)
            .await?;

        debug!(
            "finished downloading {} in {:?}",
            self.package,
            download_start.elapsed()
        );

        let extract_start = Instant::now();
        debug!("extracting vmlinux from {}", pkg_path.display());

        if let Err(err) = self
            .package
            .extract_kernel(shutdown, &pkg_path, &vmlinux_path)
            .await
        {
            let _ = fs::remove_file(&vmlinux_path);
            return Err(err.context(format!("extracting vmlinux from {}", pkg_path.display())));
        }

        debug!(
            "finished extracting from {} in {:?}",
            pkg_path.display(),
            extract_start.elapsed()
        );

        // best effort: zypper-cached rpms may not be ours to delete
        let _ = fs::remove_file(&pkg_path);

        self.send_reply(vmlinux_path);
        Ok(())
    }

    fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }
}
