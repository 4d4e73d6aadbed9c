// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{process_packages, Repository};
use crate::{
    job::JobSender,
    kernel::Version,
    package::{centos::CentOSPackage, sort_by_version, Package},
    utility::download,
};

pub struct OracleRepo {
    archs: HashMap<&'static str, &'static str>,
    repos: HashMap<&'static str, &'static str>,
    min_version: Version,
}

impl OracleRepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "x86_64");
        archs.insert("arm64", "aarch64");
        let mut repos = HashMap::new();
        repos.insert("7", "https://oss.oracle.com/ol7/debuginfo/");
        repos.insert("8", "https://oss.oracle.com/ol8/debuginfo/");
        OracleRepo {
            archs,
            repos,
            min_version: Version::new("3.10.0-957"),
        }
    }
}

impl Default for OracleRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for OracleRepo {
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
        let repo_url = self
            .repos
            .get(release)
            .copied()
            .with_context(|| format!("unknown oracle release {}", release))?;

        let links = download::get_links(shutdown, repo_url)
            .await
            .context("list packages")?;

        // Oracle ships both the stock kernel and its own UEK
        let kre = Regex::new(&format!(
            r"kernel(?:-uek)?-debuginfo-([0-9].*\.{})\.rpm",
            alt_arch
        ))?;

        let mut packages: Vec<Arc<dyn Package>> = Vec::new();
        for link in &links {
            let captures = match kre.captures(link) {
                Some(captures) => captures,
                None => continue,
            };
            let stem = captures[1].to_string();
            let package = CentOSPackage {
                name: captures[0].trim_end_matches(".rpm").to_string(),
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

        sort_by_version(&mut packages);

        process_packages(shutdown, work_dir, packages, force, jobs).await
    }
}
