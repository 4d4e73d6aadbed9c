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

// The Fedora archive moved its debug tree twice over the covered releases.
const OLDER_REPOS: &[&str] = &[
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/releases/%s/Everything/%s/debug/tree/Packages/k/",
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/updates/%s/%s/debug/k/",
];

const OLD_REPOS: &[&str] = &[
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/releases/%s/Everything/%s/debug/tree/Packages/k/",
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/updates/%s/%s/debug/Packages/k/",
];

const CURRENT_REPOS: &[&str] = &[
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/releases/%s/Everything/%s/debug/tree/Packages/k/",
    "https://archives.fedoraproject.org/pub/archive/fedora/linux/updates/%s/Everything/%s/debug/Packages/k/",
];

pub struct FedoraRepo {
    archs: HashMap<&'static str, &'static str>,
    repos: HashMap<&'static str, &'static [&'static str]>,
}

impl FedoraRepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "x86_64");
        archs.insert("arm64", "aarch64");
        let mut repos: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        repos.insert("24", OLDER_REPOS);
        repos.insert("25", OLD_REPOS);
        repos.insert("26", OLD_REPOS);
        repos.insert("27", OLD_REPOS);
        repos.insert("28", CURRENT_REPOS);
        repos.insert("29", CURRENT_REPOS);
        repos.insert("30", CURRENT_REPOS);
        repos.insert("31", CURRENT_REPOS);
        FedoraRepo { archs, repos }
    }
}

impl Default for FedoraRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for FedoraRepo {
    async fn get_kernel_packages(
        &self,
        shutdown: &CancellationToken,
        work_dir: &Path,
        release: &str,
        arch: &str,
        force: bool,
        jobs: &JobSender,
    ) -> Result<()> {
        if matches!(release, "24" | "25" | "26" | "27") && arch == "arm64" {
            tracing::info!("Fedora {} does not have arm64 packages", release);
            return Ok(());
        }

        let alt_arch = self
            .archs
            .get(arch)
            .copied()
            .with_context(|| format!("unsupported architecture {}", arch))?;
        let templates = self
            .repos
            .get(release)
            .copied()
            .with_context(|| format!("unknown fedora release {}", release))?;

        let mut links = Vec::new();
        for template in templates {
            let repo_url = fill_template(template, &[release, alt_arch]);
            match download::get_links(shutdown, &repo_url).await {
                Ok(repo_links) => links.extend(repo_links),
                Err(err) => {
                    tracing::error!("list packages: {:#}", err);
                    continue;
                }
            }
        }

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
            let stem = captures[1].to_string();
            packages.push(Arc::new(CentOSPackage {
                name: captures[0].trim_end_matches(".rpm").to_string(),
                name_of_file: stem.clone(),
                architecture: alt_arch.to_string(),
                url: link.clone(),
                kernel_version: Version::new(&stem),
            }));
        }

        sort_by_version(&mut packages);

        process_packages(shutdown, work_dir, packages, force, jobs).await
    }
}
