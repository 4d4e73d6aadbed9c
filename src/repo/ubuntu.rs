// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use super::{process_packages, Repository};
use crate::{
    job::JobSender,
    package::{
        self, sort_by_version,
        ubuntu::{get_package_list, parse_apt_packages, UbuntuPackage, LAUNCHPAD_URL},
        Package,
    },
};
use tracing::debug;

pub struct UbuntuRepo {
    repos: HashMap<&'static str, &'static str>, // altArch -> mirror
    debug_repo: &'static str,
    kernel_types: HashMap<&'static str, &'static str>, // signed/unsigned -> pattern
    archs: HashMap<&'static str, &'static str>,
}

impl UbuntuRepo {
    pub fn new() -> Self {
        let mut repos = HashMap::new();
        repos.insert("amd64", "http://archive.ubuntu.com/ubuntu");
        repos.insert("arm64", "http://ports.ubuntu.com");
        let mut kernel_types = HashMap::new();
        kernel_types.insert(
            "signed",
            "linux-image-[0-9.]+-.*-(generic|azure|gke|gkeop|gcp|aws)",
        );
        kernel_types.insert(
            "unsigned",
            "linux-image-unsigned-[0-9.]+-.*-(generic|azure|gke|gkeop|gcp|aws)",
        );
        let mut archs = HashMap::new();
        archs.insert("x86_64", "amd64");
        archs.insert("arm64", "arm64");
        UbuntuRepo {
            repos,
            debug_repo: "http://ddebs.ubuntu.com",
            kernel_types,
            archs,
        }
    }
}

impl Default for UbuntuRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for UbuntuRepo {
    /// Pair the mirror's kernel images with their debug ddebs, fall back to
    /// launchpad pseudo-packages for kernels without one, then run one
    /// pipeline task per kernel flavor. The fast-exit rule therefore applies
    /// per flavor: generic stopping says nothing about aws kernels.
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
            .get(alt_arch)
            .copied()
            .with_context(|| format!("no mirror for {}", alt_arch))?;

        // Kernel images known to the regular mirror

        let raw_pkgs = get_package_list(shutdown, repo_url, release, alt_arch)
            .await
            .context("main")?;
        let kernel_pkgs = parse_apt_packages(&raw_pkgs[..], repo_url, release)
            .context("parsing main package list")?;

        let mut filtered_kernel_pkgs: Vec<UbuntuPackage> = Vec::new();
        for pattern in self.kernel_types.values() {
            let re = Regex::new(&format!("{}$", pattern))?;
            for p in &kernel_pkgs {
                let captures = match re.captures(&p.name) {
                    Some(captures) => captures,
                    None => continue,
                };
                if !force
                    && (package::btf_tarball_exists(p, work_dir)
                        || package::is_failed(p, work_dir))
                {
                    continue;
                }
                let mut p = p.clone();
                p.flavor = captures[1].to_string();
                filtered_kernel_pkgs.push(p);
            }
        }

        // Debug ddebs

        let raw_dbg_pkgs = get_package_list(shutdown, self.debug_repo, release, alt_arch)
            .await
            .context("ddebs")?;
        let kernel_dbg_pkgs = parse_apt_packages(&raw_dbg_pkgs[..], self.debug_repo, release)
            .context("parsing debug package list")?;

        let mut filtered_dbg_pkgs: HashMap<String, UbuntuPackage> = HashMap::new();
        for pattern in self.kernel_types.values() {
            let re = Regex::new(&format!("{}-dbgsym", pattern))?;
            for p in &kernel_dbg_pkgs {
                let captures = match re.captures(&p.name) {
                    Some(captures) => captures,
                    None => continue,
                };
                // signed debug stubs are empty shells; the threshold drops them
                if p.size < 10_000_000 {
                    continue;
                }
                if !force
                    && (package::btf_tarball_exists(p, work_dir)
                        || package::is_failed(p, work_dir))
                {
                    continue;
                }
                let mut dbg = p.clone();
                dbg.flavor = captures[1].to_string();
                match filtered_dbg_pkgs.entry(dbg.name_of_file.clone()) {
                    Entry::Vacant(slot) => {
                        slot.insert(dbg);
                    }
                    Entry::Occupied(existing) => {
                        debug!(
                            "duplicate {} filename from {} (other {})",
                            dbg.name_of_file,
                            dbg,
                            existing.get()
                        );
                    }
                }
            }
        }

        // Kernels without a published ddeb go through launchpad instead

        for p in &filtered_kernel_pkgs {
            if filtered_dbg_pkgs.contains_key(&p.name_of_file) {
                continue;
            }
            debug!("adding launchpad package for {}", p.name);
            filtered_dbg_pkgs.insert(
                p.name_of_file.clone(),
                UbuntuPackage {
                    // signed images never contain the actual kernel
                    name: format!("linux-image-unsigned-{}-dbgsym", p.name_of_file),
                    architecture: p.architecture.clone(),
                    kernel_version: p.kernel_version.clone(),
                    name_of_file: p.name_of_file.clone(),
                    url: LAUNCHPAD_URL.to_string(),
                    size: u64::MAX,
                    release: release.to_string(),
                    flavor: p.flavor.clone(),
                },
            );
        }

        debug!("{} {} packages", filtered_dbg_pkgs.len(), arch);

        let mut pkgs_by_flavor: BTreeMap<String, Vec<Arc<dyn Package>>> = BTreeMap::new();
        for (_, p) in filtered_dbg_pkgs {
            pkgs_by_flavor
                .entry(p.flavor.clone())
                .or_insert_with(Vec::new)
                .push(Arc::new(p));
        }

        debug!("{} {} flavors", pkgs_by_flavor.len(), arch);

        let mut tasks = FuturesUnordered::new();
        for (flavor, mut flavor_pkgs) in pkgs_by_flavor {
            sort_by_version(&mut flavor_pkgs);
            debug!("{} {} flavor {} kernels", arch, flavor, flavor_pkgs.len());

            let shutdown = shutdown.clone();
            let jobs = jobs.clone();
            let work_dir = work_dir.to_path_buf();
            let arch = arch.to_string();
            tasks.push(tokio::spawn(async move {
                debug!(
                    "start kernel flavor {} {} ({} pkgs)",
                    flavor,
                    arch,
                    flavor_pkgs.len()
                );
                let result = process_packages(&shutdown, &work_dir, flavor_pkgs, force, &jobs).await;
                debug!("end kernel flavor {} {}", flavor, arch);
                result
            }));
        }

        let mut first_err = None;
        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err = Some(err.into());
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_capture_covers_the_cloud_variants() {
        let re = Regex::new(
            "linux-image-unsigned-[0-9.]+-.*-(generic|azure|gke|gkeop|gcp|aws)-dbgsym",
        )
        .unwrap();
        let captures = re
            .captures("linux-image-unsigned-5.4.0-1063-azure-dbgsym")
            .unwrap();
        assert_eq!(&captures[1], "azure");
    }

    #[test]
    fn signed_pattern_does_not_match_unsigned_names() {
        let re =
            Regex::new("linux-image-[0-9.]+-.*-(generic|azure|gke|gkeop|gcp|aws)$").unwrap();
        assert!(re.captures("linux-image-unsigned-5.4.0-92-generic").is_none());
        assert!(re.captures("linux-image-5.4.0-92-generic").is_some());
    }
}
