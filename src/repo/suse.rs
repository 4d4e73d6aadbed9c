// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{stream::FuturesUnordered, StreamExt};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{process_packages, Repository};
use crate::{
    job::JobSender,
    kernel::Version,
    package::{sort_by_version, suse::SUSEPackage, Package},
    utility::command,
};

pub struct SUSERepo {
    archs: HashMap<&'static str, &'static str>,
}

impl SUSERepo {
    pub fn new() -> Self {
        let mut archs = HashMap::new();
        archs.insert("x86_64", "x86_64");
        archs.insert("arm64", "aarch64");
        SUSERepo { archs }
    }

    /// The per-release debuginfo repositories, named the way the
    /// subscription registers them.
    fn debuginfo_repos(release: &str, alt_arch: &str) -> Vec<String> {
        match release {
            "12.3" => vec![
                format!("SUSE_Linux_Enterprise_Server_12_SP3_{}:SLES12-SP3-Debuginfo-Pool", alt_arch),
                format!("SUSE_Linux_Enterprise_Server_12_SP3_{}:SLES12-SP3-Debuginfo-Updates", alt_arch),
            ],
            "12.5" => vec![
                format!("SUSE_Linux_Enterprise_Server_{}:SLES12-SP5-Debuginfo-Pool", alt_arch),
                format!("SUSE_Linux_Enterprise_Server_{}:SLES12-SP5-Debuginfo-Updates", alt_arch),
            ],
            "15.1" => vec![
                format!("Basesystem_Module_15_SP1_{}:SLE-Module-Basesystem15-SP1-Debuginfo-Pool", alt_arch),
                format!("Basesystem_Module_15_SP1_{}:SLE-Module-Basesystem15-SP1-Debuginfo-Updates", alt_arch),
            ],
            "15.2" => vec![
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP2-Debuginfo-Pool", alt_arch),
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP2-Debuginfo-Updates", alt_arch),
            ],
            "15.3" => vec![
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP3-Debuginfo-Pool", alt_arch),
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP3-Debuginfo-Updates", alt_arch),
            ],
            "15.4" => vec![
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP4-Debuginfo-Pool", alt_arch),
                format!("Basesystem_Module_{}:SLE-Module-Basesystem15-SP4-Debuginfo-Updates", alt_arch),
            ],
            _ => Vec::new(),
        }
    }
}

impl Default for SUSERepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for SUSERepo {
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

        for repo in Self::debuginfo_repos(release, alt_arch) {
            command::run_zypper(shutdown, &["modifyrepo", "--enable", &repo])
                .await
                .with_context(|| format!("enable {}", repo))?;
        }

        let aliases = repo_aliases(shutdown).await.context("repo aliases")?;

        // packages are named kernel-<flavor>-debuginfo; flavors include
        // default and azure
        let search_output = command::run_zypper(shutdown, &["search", "-s", "kernel-*-debuginfo"])
            .await
            .context("zypper search")?;

        let packages = parse_zypper_packages(&search_output, alt_arch, &aliases)
            .context("parse package listing")?;

        let mut pkgs_by_flavor: BTreeMap<String, Vec<Arc<dyn Package>>> = BTreeMap::new();
        for p in packages {
            pkgs_by_flavor
                .entry(p.flavor.clone())
                .or_insert_with(Vec::new)
                .push(Arc::new(p));
        }

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
                    "start kernel type {} {} ({} pkgs)",
                    flavor,
                    arch,
                    flavor_pkgs.len()
                );
                let result = process_packages(&shutdown, &work_dir, flavor_pkgs, force, &jobs).await;
                debug!("end kernel type {} {}", flavor, arch);
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

/// Map repository names to their aliases from `zypper repos`, needed to
/// locate the rpm in zypper's package cache after a download.
async fn repo_aliases(shutdown: &CancellationToken) -> Result<HashMap<String, String>> {
    let output = command::run_zypper(shutdown, &["repos"]).await?;

    let mut aliases = HashMap::new();
    for line in output.lines() {
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '|')
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 3 {
            continue;
        }
        // table rows start with the repo number
        if fields[0].parse::<u32>().is_err() {
            continue;
        }
        aliases.insert(fields[2].to_string(), fields[1].to_string());
    }
    Ok(aliases)
}

fn parse_zypper_packages(
    output: &str,
    alt_arch: &str,
    aliases: &HashMap<String, String>,
) -> Result<Vec<SUSEPackage>> {
    let kre = Regex::new(r"^kernel-([^-]+)-debuginfo$")?;

    let mut packages = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '|')
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 5 {
            continue;
        }
        let (name, version, pkg_arch, repo) = (fields[0], fields[2], fields[3], fields[4]);
        if pkg_arch != alt_arch {
            continue;
        }
        let captures = match kre.captures(name) {
            Some(captures) => captures,
            None => continue,
        };
        let alias = match aliases.get(repo) {
            Some(alias) => alias,
            None => bail!("unknown repo {}", repo),
        };
        let flavor = captures[1].to_string();
        if flavor == "preempt" {
            continue;
        }

        // the final version segment is a build counter absent from
        // `uname -r`; artifacts are named without it
        let btf_version = match version.rsplitn(2, '.').nth(1) {
            Some(prefix) => prefix.to_string(),
            None => version.to_string(),
        };

        packages.push(SUSEPackage {
            name: name.to_string(),
            name_of_file: format!("{}-{}", version, flavor),
            name_of_btf_file: format!("{}-{}", btf_version, flavor),
            kernel_version: Version::new(version),
            architecture: pkg_arch.to_string(),
            repo: repo.to_string(),
            flavor,
            download_dir: PathBuf::from(format!(
                "/var/cache/zypp/packages/{}/{}",
                alias, alt_arch
            )),
        });
    }
    Ok(packages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Package;

    const SEARCH_OUTPUT: &str = "\
Loading repository data...
Reading installed packages...

S | Name                     | Type    | Version                     | Arch   | Repository
--+--------------------------+---------+-----------------------------+--------+---------------------------------------
  | kernel-default-debuginfo | package | 5.14.21-150400.24.100.2     | x86_64 | SLE-Module-Basesystem15-SP4-Debuginfo-Updates
  | kernel-azure-debuginfo   | package | 5.14.21-150400.14.69.2      | x86_64 | SLE-Module-Basesystem15-SP4-Debuginfo-Updates
  | kernel-preempt-debuginfo | package | 5.14.21-150400.24.100.2     | x86_64 | SLE-Module-Basesystem15-SP4-Debuginfo-Updates
  | kernel-default-debuginfo | package | 5.14.21-150400.24.100.2     | aarch64 | SLE-Module-Basesystem15-SP4-Debuginfo-Updates
";

    fn aliases() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            "SLE-Module-Basesystem15-SP4-Debuginfo-Updates".to_string(),
            "Basesystem_Module_x86_64:SLE-Module-Basesystem15-SP4-Debuginfo-Updates".to_string(),
        );
        map
    }

    #[test]
    fn parses_flavors_and_strips_the_build_counter() {
        let packages = parse_zypper_packages(SEARCH_OUTPUT, "x86_64", &aliases()).unwrap();

        // preempt skipped, aarch64 row filtered by arch
        assert_eq!(packages.len(), 2);

        let default = packages.iter().find(|p| p.flavor == "default").unwrap();
        assert_eq!(default.filename(), "5.14.21-150400.24.100.2-default");
        assert_eq!(default.btf_filename(), "5.14.21-150400.24.100-default");
        assert!(default
            .download_dir
            .to_string_lossy()
            .starts_with("/var/cache/zypp/packages/"));

        assert!(packages.iter().any(|p| p.flavor == "azure"));
    }

    #[test]
    fn unknown_repositories_are_an_error() {
        let err = parse_zypper_packages(SEARCH_OUTPUT, "x86_64", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown repo"));
    }

    #[test]
    fn alias_table_rows_need_a_leading_number() {
        // exercised through repo_aliases' parsing rules
        let line = "1 | Basesystem_Module_x86_64:SLE-Module-Basesystem15-SP4-Debuginfo-Updates | SLE-Module-Basesystem15-SP4-Debuginfo-Updates | Yes";
        let fields: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == '|')
            .filter(|f| !f.is_empty())
            .collect();
        assert!(fields[0].parse::<u32>().is_ok());
        assert_eq!(fields[1], "Basesystem_Module_x86_64:SLE-Module-Basesystem15-SP4-Debuginfo-Updates");
    }
}
