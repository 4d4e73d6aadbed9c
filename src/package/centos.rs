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
use crate::{kernel::Version, utility};

/// A kernel-debuginfo RPM served from a plain HTTP directory index. Used by
/// the CentOS, Oracle and Fedora repositories alike.
pub struct CentOSPackage {
    pub name: String,
    pub architecture: String,
    pub kernel_version: Version,
    pub name_of_file: String,
    pub url: String,
}

impl fmt::Display for CentOSPackage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[async_trait]
impl Package for CentOSPackage {
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
        let rpm_path = dir.join(format!("{}.rpm", self.name_of_file));
        if !force && rpm_path.exists() {
            return Ok(rpm_path);
        }

        if let Err(err) = utility::download::download_file(shutdown, &self.url, &rpm_path).await {
            let _ = fs::remove_file(&rpm_path);
            return Err(err.context("downloading rpm package"));
        }
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
