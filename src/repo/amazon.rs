// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    process_packages,
    yum::{parse_yum_packages, yum_search},
    Repository,
};
use crate::{job::JobSender, kernel::Version, package::sort_by_version};

/// Amazon Linux runs on the instance itself: yum enumerates whatever the
/// configured debuginfo repositories of the host offer.
pub struct AmazonRepo;

impl AmazonRepo {
    pub fn new() -> Self {
        AmazonRepo
    }
}

impl Default for AmazonRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for AmazonRepo {
    async fn get_kernel_packages(
        &self,
        shutdown: &CancellationToken,
        work_dir: &Path,
        _release: &str,
        _arch: &str,
        force: bool,
        jobs: &JobSender,
    ) -> Result<()> {
        let search_output = yum_search(shutdown, "kernel-debuginfo").await?;
        let mut packages = parse_yum_packages(&search_output, &Version::new(""));
        if packages.is_empty() {
            return Ok(());
        }
        sort_by_version(&mut packages);

        process_packages(shutdown, work_dir, packages, force, jobs)
            .await
            .context("amazon package processing")
    }
}
