// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Package;
use crate::{
    kernel::Version,
    utility::{self, command},
};

/// A SLES kernel-debuginfo RPM. Downloads go through zypper, which caches
/// the rpm under its own package cache rather than the work directory.
#[derive(Debug)]
pub struct SUSEPackage {
    pub name: String,
    pub name_of_file: String,
    /// Stem without the trailing build counter, matching `uname -r`.
    pub name_of_btf_file: String,
    pub architecture: String,
    pub kernel_version: Version,
    pub repo: String,
    pub flavor: String,
    pub download_dir: PathBuf,
}

impl fmt::Display for SUSEPackage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}.{}", self.name, self.kernel_version, self.architecture)
    }
}

#[async_trait]
impl Package for SUSEPackage {
    fn filename(&self) -> &str {
        &self.name_of_file
    }

    fn btf_filename(&self) -> &str {
        &self.name_of_btf_file
    }

    fn version(&self) -> &Version {
        &self.kernel_version
    }

    async fn download(
        &self,
        shutdown: &CancellationToken,
        _dir: &Path,
        force: bool,
    ) -> Result<PathBuf> {
        let local_file = format!(
            "{}-{}.{}.rpm",
            self.name, self.kernel_version, self.architecture
        );
        let rpm_path = self.download_dir.join(local_file);
        if !force && rpm_path.exists() {
            return Ok(rpm_path);
        }

        let spec = format!("{}={}", self.name, self.kernel_version);
        if let Err(err) = zypper_download(shutdown, &spec).await {
            let _ = fs::remove_file(&rpm_path);
            return Err(anyhow::Error::from(err).context("zypper download"));
        }
        Ok(rpm_path)
    }

    async fn extract_kernel(
        &self,
        shutdown: &CancellationToken,
        pkg_path: &Path,
        vmlinux_path: &Path,
    ) -> Result<()> {
        // vmlinux lives at /usr/lib/debug/boot/vmlinux-<ver>-<flavor>.debug
        let shutdown = shutdown.clone();
        let pkg_path = pkg_path.to_path_buf();
        let vmlinux_path = vmlinux_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            utility::rpm::extract_vmlinux(&shutdown, &pkg_path, &vmlinux_path)
        })
        .await
        .context("rpm extraction task")?
    }
}

async fn zypper_download(
    shutdown: &CancellationToken,
    spec: &str,
) -> Result<(), command::CommandError> {
    let stdout = command::run_zypper(
        shutdown,
        &["-q", "install", "-y", "--no-recommends", "--download-only", spec],
    )
    .await?;
    print!("{}", stdout);
    Ok(())
}
