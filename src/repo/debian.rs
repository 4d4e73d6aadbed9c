// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{fill_template, process_packages, Repository};
use crate::{
    job::JobSender,
    package::{sort_by_version, ubuntu::parse_apt_packages, Package},
    utility::download,
};

// stretch and buster predate xz-compressed indices
const OLD_REPOS: &[&str] = &[
    "http://ftp.debian.org/debian/dists/%s/main/binary-%s/Packages.gz",
    "http://ftp.debian.org/debian/dists/%s-updates/main/binary-%s/Packages.gz",
    "http://security.debian.org/debian-security/dists/%s/updates/main/binary-%s/Packages.gz",
];

const NEW_REPOS: &[&str] = &[
    "http://ftp.debian.org/debian/dists/%s/main/binary-%s/Packages.xz",
    "http://ftp.debian.org/debian/dists/%s-updates/main/binary-%s/Packages.xz",
    "http://security.debian.org/debian-security/dists/%s-security/main/binary-%s/Packages.xz",
];

pub struct DebianRepo {
    archs: HashMap<&'static str, &'static str>,
    repos: HashMap<&'static str, &'static [&'static str]>,
}

impl DebianRepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "amd64");
        archs.insert("arm64", "arm64");
        let mut repos: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
        repos.insert("stretch", OLD_REPOS);
        repos.insert("buster", OLD_REPOS);
        repos.insert("bullseye", NEW_REPOS);
        DebianRepo { archs, repos }
    }
}

impl Default for DebianRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for DebianRepo {
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
        let templates = self
            .repos
            .get(release)
            .copied()
            .with_context(|| format!("unknown debian release {}", release))?;

        let dbg_re = Regex::new(r"linux-image-[0-9]+\.[0-9]+\.[0-9].*-dbg")?;

        let mut packages: Vec<Arc<dyn Package>> = Vec::new();
        for template in templates {
            let index_url = fill_template(template, &[release, alt_arch]);

            let mut raw_pkgs = Vec::new();
            download::download(shutdown, &index_url, &mut raw_pkgs)
                .await
                .with_context(|| format!("download package list {}", index_url))?;

            // pool/ paths resolve against the repository root, which is the
            // first path segment of the index URL
            let base_url = repository_root(&index_url)?;

            let parsed = parse_apt_packages(&raw_pkgs[..], &base_url, release)
                .context("parsing package list")?;

            for p in parsed {
                if dbg_re.is_match(&p.name) {
                    packages.push(Arc::new(p));
                }
            }
        }

        sort_by_version(&mut packages);

        process_packages(shutdown, work_dir, packages, force, jobs).await
    }
}

fn repository_root(index_url: &str) -> Result<String> {
    let mut url = Url::parse(index_url).context("repo url parse")?;
    let first_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or("")
        .to_string();
    url.set_path(&format!("/{}", first_segment));
    Ok(url.to_string())
}
