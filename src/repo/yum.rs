// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::{
    kernel::Version,
    package::{rhel::RHELPackage, Package},
    utility::command,
};

/// `yum search --showduplicates` for a package pattern, returning stdout.
pub(super) async fn yum_search(shutdown: &CancellationToken, package: &str) -> Result<String> {
    let (binary, args) = command::sudo_wrap("yum", &["search", "--showduplicates", package]);
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = command::run_cmd_capture(shutdown, None, &binary, &arg_refs).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `yum search` line output into packages. The common split rpms are
/// dropped, duplicates collapse on the package name, versions below
/// `min_version` are ignored.
pub(super) fn parse_yum_packages(
    output: &str,
    min_version: &Version,
) -> Vec<Arc<dyn Package>> {
    let mut by_name: HashMap<String, RHELPackage> = HashMap::new();

    for line in output.lines() {
        if !line.starts_with("kernel-debuginfo-") {
            continue;
        }
        if line.starts_with("kernel-debuginfo-common-") {
            continue;
        }
        let name = match line.split(':').next() {
            Some(name) => name.trim(),
            None => continue,
        };
        let filename = name.trim_start_matches("kernel-debuginfo-");
        let last_dot = match filename.rfind('.') {
            Some(idx) => idx,
            None => continue,
        };
        let package = RHELPackage {
            name: name.to_string(),
            name_of_file: filename.to_string(),
            kernel_version: Version::new(&filename[..last_dot]),
            architecture: filename[last_dot + 1..].to_string(),
        };
        if !min_version.is_zero() && package.kernel_version < *min_version {
            continue;
        }
        by_name.entry(package.name.clone()).or_insert(package);
    }

    by_name
        .into_iter()
        .map(|(_, p)| Arc::new(p) as Arc<dyn Package>)
        .collect()
}
