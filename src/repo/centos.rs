// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{fill_template, process_packages, Repository};
use crate::{
    job::JobSender,
    kernel::Version,
    package::{centos::CentOSPackage, sort_by_version, Package},
    utility::download,
};

pub struct CentOSRepo {
    archs: HashMap<&'static str, &'static str>,
    repos: HashMap<&'static str, &'static str>,
    min_version: Version,
}

impl CentOSRepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "x86_64");
        archs.insert("arm64", "aarch64");
        let mut repos = HashMap::new();
        repos.insert("7", "http://mirror.facebook.net/centos-debuginfo/7/%s/");
        repos.insert("8", "http://mirror.facebook.net/centos-debuginfo/8/%s/Packages/");
        CentOSRepo {
            archs,
            repos,
            min_version: Version::new("3.10.0-957"),
        }
    }
}

impl Default for CentOSRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for CentOSRepo {
    async fn get_kernel_packages(
        &self,
        shutdown: &CancellationToken,
        work_dir: &Path,
        release: &str,
        arch: &str,
        force: bool,
        jobs: &JobSender,
    ) -> Result<()> {
        let alt_arch = self
            .archs
            .get(arch)
            .copied()
            .with_context(|| format!("unsupported architecture {}", arch))?;
        let template = self
            .repos
            .get(release)
            .copied()
            .with_context(|| format!("unknown centos release {}", release))?;
        let repo_url = fill_template(template, &[alt_arch]);

        let links = download::get_links(shutdown, &repo_url)
            .await
            .context("list packages")?;

        let kre = Regex::new(&format!(
            r"kernel-debuginfo-([0-9].*\.{})\.rpm",
            alt_arch
        ))?;

        let mut packages: Vec<Arc<dyn Package>> = Vec::new();
        for link in &links {
            let captures = match kre.captures(link) {
                Some(captures) => captures,
                None => continue,
            };
            let name = captures[0].trim_end_matches(".rpm").to_string();
            let stem = captures[1].to_string();
            let package = CentOSPackage {
                name,
                name_of_file: stem.clone(),
                architecture: alt_arch.to_string(),
                url: link.clone(),
                kernel_version: Version::new(&stem),
            };
            if *package.version() < self.min_version {
                continue;
            }
            packages.push(Arc::new(package));
        }

        sort_by_version(&mut packages); // fast-exit needs ascending versions

        process_packages(shutdown, work_dir, packages, force, jobs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debuginfo_filename_pattern_extracts_the_stem() {
        let kre = Regex::new(r"kernel-debuginfo-([0-9].*\.x86_64)\.rpm").unwrap();
        let link = "http://mirror.facebook.net/centos-debuginfo/7/x86_64/kernel-debuginfo-3.10.0-957.el7.x86_64.rpm";
        let captures = kre.captures(link).unwrap();
        assert_eq!(&captures[1], "3.10.0-957.el7.x86_64");

        // the common split must not match
        assert!(kre
            .captures("kernel-debuginfo-common-x86_64-3.10.0-957.el7.x86_64.rpm")
            .is_none());
    }
}
