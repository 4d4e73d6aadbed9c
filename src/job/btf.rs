// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{fs, path::Path, path::PathBuf, time::Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Job;
use crate::utility::{command, tarball};

/// Second stage of the pipeline: synthesize a BTF blob from the vmlinux
/// DWARF info and pack it into the reproducible `.tar.xz` artifact.
/// Intermediates are only removed on success so a failed run can resume
/// from the vmlinux.
pub struct BtfGenerationJob {
    pub vmlinux_path: PathBuf,
    pub btf_path: PathBuf,
    pub btf_tar_path: PathBuf,
}

#[async_trait]
impl Job for BtfGenerationJob {
    async fn run(&mut self, shutdown: &CancellationToken) -> Result<()> {
        debug!("generating BTF from {}", self.vmlinux_path.display());
        let generation_start = Instant::now();
        match generate_btf(shutdown, &self.vmlinux_path, &self.btf_path).await {
            Err(err) => {
                let _ = fs::remove_file(&self.btf_path);
                if err.is_canceled() {
                    return Ok(());
                }
                return Err(anyhow!(err).context("btf gen"));
            }
            Ok(()) => {}
        }
        debug!(
            "finished generating BTF from {} in {:?}",
            self.vmlinux_path.display(),
            generation_start.elapsed()
        );

        debug!("compressing BTF into {}", self.btf_tar_path.display());
        let tarball_start = Instant::now();
        if let Err(err) = tarball::tarball_btf(shutdown, &self.btf_path, &self.btf_tar_path).await {
            let _ = fs::remove_file(&self.btf_tar_path);
            return Err(anyhow!(err).context("btf.tar.xz gen"));
        }
        debug!(
            "finished compressing BTF into {} in {:?}",
            self.btf_tar_path.display(),
            tarball_start.elapsed()
        );

        // only remove valid files on success, to enable resuming
        let _ = fs::remove_file(&self.btf_path);
        let _ = fs::remove_file(&self.vmlinux_path);

        Ok(())
    }
}

async fn generate_btf(
    shutdown: &CancellationToken,
    vmlinux: &Path,
    out: &Path,
) -> Result<(), command::CommandError> {
    let out = out.to_string_lossy().into_owned();
    let vmlinux = vmlinux.to_string_lossy().into_owned();
    command::run_cmd(
        shutdown,
        None,
        "pahole",
        &["--btf_encode_detached", &out, &vmlinux],
    )
    .await
}
