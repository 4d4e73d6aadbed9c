// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    fmt, fs,
    io::BufRead,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Package;
use crate::{
    kernel::Version,
    utility::{self, command},
};

/// A kernel debug package from an APT world: Ubuntu ddebs, Debian dbg debs,
/// and the launchpad pseudo-packages Ubuntu synthesizes when a kernel has no
/// published ddeb (`url` is then the `pull-lp-ddebs` sentinel).
#[derive(Clone)]
pub struct UbuntuPackage {
    pub name: String,
    pub architecture: String,
    pub kernel_version: Version,
    pub name_of_file: String,
    pub url: String,
    pub size: u64,
    pub release: String,
    pub flavor: String,
}

pub const LAUNCHPAD_URL: &str = "pull-lp-ddebs";

impl UbuntuPackage {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
            && !self.url.is_empty()
            && !self.name_of_file.is_empty()
            && !self.kernel_version.is_zero()
    }

    /// `pull-lp-ddebs` drops the ddeb in its working directory and prints a
    /// `Downloading <file> ...` line; the file is renamed onto `dest`.
    async fn pull_launchpad_ddeb(
        &self,
        shutdown: &CancellationToken,
        dir: &Path,
        dest: &Path,
    ) -> Result<()> {
        info!("downloading {} from launchpad", self.name);

        let output = command::run_cmd_capture(
            shutdown,
            Some(dir),
            "pull-lp-ddebs",
            &["--arch", &self.architecture, &self.name, &self.release],
        )
        .await
        .context("pull-lp-ddebs")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Downloading ") {
                let file = match rest.split_whitespace().next() {
                    Some(file) => file,
                    None => continue,
                };
                let deb_path = dir.join(file);
                fs::rename(&deb_path, dest).with_context(|| {
                    format!("rename {} to {}", deb_path.display(), dest.display())
                })?;
                return Ok(());
            }
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            bail!("{}", stderr);
        }
        bail!("download path not found in pull-lp-ddebs output")
    }
}

impl fmt::Display for UbuntuPackage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.name, self.architecture)
    }
}

#[async_trait]
impl Package for UbuntuPackage {
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
        let ddeb_path = dir.join(format!("{}.ddeb", self.name_of_file));
        if !force && ddeb_path.exists() {
            return Ok(ddeb_path);
        }

        if self.url == LAUNCHPAD_URL {
            if let Err(err) = self.pull_launchpad_ddeb(shutdown, dir, &ddeb_path).await {
                let _ = fs::remove_file(&ddeb_path);
                return Err(err.context("downloading ddeb package"));
            }
            return Ok(ddeb_path);
        }

        if let Err(err) = utility::download::download_file(shutdown, &self.url, &ddeb_path).await {
            let _ = fs::remove_file(&ddeb_path);
            return Err(err.context("downloading ddeb package"));
        }
        Ok(ddeb_path)
    }

    async fn extract_kernel(
        &self,
        shutdown: &CancellationToken,
        pkg_path: &Path,
        vmlinux_path: &Path,
    ) -> Result<()> {
        let shutdown = shutdown.clone();
        let stem = self.name_of_file.clone();
        let pkg_path = pkg_path.to_path_buf();
        let vmlinux_path = vmlinux_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            utility::deb::extract_vmlinux(&shutdown, &pkg_path, &stem, &vmlinux_path)
        })
        .await
        .context("deb extraction task")?
    }
}

/// Concatenate the `Packages.xz` indices of an APT mirror for a release:
/// the release pocket plus its updates pocket, main and universe.
pub async fn get_package_list(
    shutdown: &CancellationToken,
    repo: &str,
    release: &str,
    arch: &str,
) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    utility::download::download(
        shutdown,
        &format!("{}/dists/{}/main/binary-{}/Packages.xz", repo, release, arch),
        &mut raw,
    )
    .await
    .context("download base package list")?;
    utility::download::download(
        shutdown,
        &format!("{}/dists/{}-updates/main/binary-{}/Packages.xz", repo, release, arch),
        &mut raw,
    )
    .await
    .context("download updates main package list")?;
    utility::download::download(
        shutdown,
        &format!("{}/dists/{}-updates/universe/binary-{}/Packages.xz", repo, release, arch),
        &mut raw,
    )
    .await
    .context("download updates universe package list")?;
    Ok(raw)
}

/// Parse an APT `Packages` index: blank-line separated stanzas of
/// `Key: value` lines. Only kernel image records survive, and only the five
/// fields the pipeline needs are read. Continuation lines are skipped.
pub fn parse_apt_packages(
    reader: impl BufRead,
    base_url: &str,
    release: &str,
) -> Result<Vec<UbuntuPackage>> {
    let mut packages = Vec::new();
    let mut current = empty_package(release);

    for line in reader.lines() {
        let line = line.context("read package index")?;
        if line.is_empty() {
            if current.name.starts_with("linux-image-") && current.is_valid() {
                packages.push(current);
            }
            current = empty_package(release);
            continue;
        }
        if line.starts_with(' ') {
            continue;
        }
        let (key, value) = match split_field(&line) {
            Some(parts) => parts,
            None => continue,
        };
        match key {
            "Package" => {
                current.name = value.to_string();
                let stem = value.trim_start_matches("linux-image-");
                let stem = stem.strip_suffix("-dbgsym").unwrap_or(stem);
                let stem = stem.strip_suffix("-dbg").unwrap_or(stem);
                current.name_of_file = stem.trim_start_matches("unsigned-").to_string();
            }
            "Architecture" => current.architecture = value.to_string(),
            "Version" => current.kernel_version = Version::new(value),
            "Filename" => current.url = format!("{}/{}", base_url, value),
            "Size" => {
                if let Ok(size) = value.parse::<u64>() {
                    current.size = size;
                }
            }
            _ => continue,
        }
    }

    if current.name.starts_with("linux-image-") && current.is_valid() {
        packages.push(current);
    }

    Ok(packages)
}

fn empty_package(release: &str) -> UbuntuPackage {
    UbuntuPackage {
        name: String::new(),
        architecture: String::new(),
        kernel_version: Version::default(),
        name_of_file: String::new(),
        url: String::new(),
        size: 0,
        release: release.to_string(),
        flavor: String::new(),
    }
}

fn split_field(line: &str) -> Option<(&str, &str)> {
    let idx = line.find(": ")?;
    Some((&line[..idx], &line[idx + 2..]))
}
