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

/// A kernel-debuginfo RPM fetched through yum. Used by the RHEL and Amazon
/// Linux repositories, whose enumeration also goes through yum.
pub struct RHELPackage {
    pub name: String,
    pub architecture: String,
    pub kernel_version: Version,
    pub name_of_file: String,
}

impl fmt::Display for RHELPackage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Package for RHELPackage {
    fn filename(&self) -> &str {
        &self.name_of_file
    }

    fn version(&self) -> &Version {
        &self.kernel_version
    }

    async fn download(
        &self,
        shutdown: &CancellationToken,
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf> {
        let local_file = format!("{}.rpm", self.name);
        let rpm_path = dir.join(&local_file);
        if !force && rpm_path.exists() {
            return Ok(rpm_path);
        }

        if let Err(err) = yum_download(shutdown, &self.name, dir).await {
            let _ = fs::remove_file(&rpm_path);
            return Err(anyhow::Error::from(err).context("rpm download"));
        }

        // yum also drags in the common split rpm; it has no kernel image
        let common_prefix = format!("kernel-debuginfo-common-{}-", self.architecture);
        let common_file = local_file.replace("kernel-debuginfo-", &common_prefix);
        let _ = fs::remove_file(dir.join(common_file));

        Ok(rpm_path)
    }

    async fn extract_kernel(
        &self,
        shutdown: &CancellationToken,
        pkg_path: &Path,
        vmlinux_path: &Path,
    ) -> Result<()> {
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

async fn yum_download(
    shutdown: &CancellationToken,
    package: &str,
    dest_dir: &Path,
) -> Result<(), command::CommandError> {
    let download_dir = format!("--downloaddir={}", dest_dir.display());
    let (binary, args) = command::sudo_wrap(
        "yum",
        &[
            "install",
            "-y",
            "--downloadonly",
            &download_dir,
            package,
        ],
    );
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    command::run_cmd(shutdown, None, &binary, &arg_refs).await
}
