// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    process_packages,
    yum::{parse_yum_packages, yum_search},
    Repository,
};
use crate::{
    job::JobSender,
    kernel::Version,
    package::sort_by_version,
    utility::command,
};

pub struct RHELRepo {
    archs: HashMap<&'static str, &'static str>,
    release_versions: HashMap<&'static str, &'static str>,
    min_version: Version,
}

impl RHELRepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "x86_64");
        archs.insert("arm64", "aarch64");
        let mut release_versions = HashMap::new();
        release_versions.insert("7:x86_64", "7.9");
        release_versions.insert("7:aarch64", "7Server");
        release_versions.insert("8:x86_64", "8.1");
        release_versions.insert("8:aarch64", "8.1");
        RHELRepo {
            archs,
            release_versions,
            min_version: Version::new("3.10.0-957"),
        }
    }
}

impl Default for RHELRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for RHELRepo {
    /// Enumeration rides the host's subscription: the release channel is
    /// pinned first, then yum lists every kernel-debuginfo build.
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
        let release_version = self
            .release_versions
            .get(format!("{}:{}", release, alt_arch).as_str())
            .copied()
            .with_context(|| format!("unknown rhel release {} for {}", release, alt_arch))?;

        let set_arg = format!("--set={}", release_version);
        let (binary, args) = command::sudo_wrap("subscription-manager", &["release", &set_arg]);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        command::run_cmd(shutdown, None, &binary, &arg_refs)
            .await
            .context("subscription-manager release")?;

        let search_output = yum_search(shutdown, "kernel-debuginfo").await?;
        let mut packages = parse_yum_packages(&search_output, &self.min_version);
        sort_by_version(&mut packages);

        process_packages(shutdown, work_dir, packages, force, jobs).await
    }
}
