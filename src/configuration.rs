// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use anyhow::{bail, Result};
use structopt::StructOpt;

/// Every known distribution with its releases, in enumeration order.
pub const DISTRO_RELEASES: &[(&str, &[&str])] = &[
    ("ubuntu", &["xenial", "bionic", "focal"]),
    ("debian", &["stretch", "buster", "bullseye"]),
    ("fedora", &["24", "25", "26", "27", "28", "29", "30", "31"]),
    ("centos", &["7", "8"]),
    ("ol", &["7", "8"]),
    ("rhel", &["7", "8"]),
    ("amzn", &["1", "2"]),
    ("sles", &["12.3", "12.5", "15.1", "15.2", "15.3", "15.4"]),
];

// RHEL needs a subscription; amzn and sles only work on matching hosts.
pub const DEFAULT_DISTROS: &[&str] = &["ubuntu", "debian", "fedora", "centos", "ol"];

pub const DEFAULT_ARCHS: &[&str] = &["x86_64", "arm64"];

pub fn releases_for(distro: &str) -> Option<&'static [&'static str]> {
    DISTRO_RELEASES
        .iter()
        .find(|(name, _)| *name == distro)
        .map(|(_, releases)| *releases)
}

#[derive(StructOpt, Debug, Clone)]
#[structopt(name = "btfhub", about = "Update the BTF archive from distribution kernels.")]
pub struct AppConfig {
    /// distribution to update (ubuntu,debian,centos,fedora,ol,rhel,amzn,sles)
    #[structopt(short = "d", long = "distro")]
    pub distro: Option<String>,

    /// distribution release to update, requires specifying distribution
    #[structopt(short = "r", long = "release")]
    pub release: Option<String>,

    /// architecture to update (x86_64,arm64)
    #[structopt(short = "a", long = "arch")]
    pub arch: Option<String>,

    /// number of concurrent workers (defaults to number of CPUs - 1)
    #[structopt(short = "j", long = "workers")]
    pub workers: Option<usize>,

    /// force update regardless of existing files
    #[structopt(short = "f")]
    pub force: bool,
}

impl AppConfig {
    pub fn from_args() -> Self {
        <Self as StructOpt>::from_args()
    }

    pub fn validate(&self) -> Result<()> {
        match &self.distro {
            Some(distro) => {
                let releases = match releases_for(distro) {
                    Some(releases) => releases,
                    None => bail!("invalid distribution {}", distro),
                };
                if let Some(release) = &self.release {
                    if !releases.contains(&release.as_str()) {
                        bail!("invalid release {} for {}", release, distro);
                    }
                }
            }
            None => {
                if self.release.is_some() {
                    bail!("specifying a release requires specifying a distribution");
                }
            }
        }
        Ok(())
    }

    pub fn selected_distros(&self) -> Vec<&str> {
        match &self.distro {
            Some(distro) => vec![distro.as_str()],
            None => DEFAULT_DISTROS.to_vec(),
        }
    }

    pub fn selected_releases(&self, distro: &str) -> Vec<&str> {
        match &self.release {
            Some(release) => vec![release.as_str()],
            None => releases_for(distro).unwrap_or(&[]).to_vec(),
        }
    }

    pub fn selected_archs(&self) -> Vec<&str> {
        match &self.arch {
            Some(arch) => vec![arch.as_str()],
            None => DEFAULT_ARCHS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(distro: Option<&str>, release: Option<&str>) -> AppConfig {
        AppConfig {
            distro: distro.map(str::to_string),
            release: release.map(str::to_string),
            arch: None,
            workers: None,
            force: false,
        }
    }

    #[test]
    fn unknown_distro_is_rejected() {
        assert!(config(Some("gentoo"), None).validate().is_err());
    }

    #[test]
    fn release_requires_its_distro() {
        assert!(config(None, Some("focal")).validate().is_err());
        assert!(config(Some("ubuntu"), Some("focal")).validate().is_ok());
        assert!(config(Some("debian"), Some("focal")).validate().is_err());
    }

    #[test]
    fn default_distros_exclude_subscription_walled_ones() {
        let cfg = config(None, None);
        let defaults = cfg.selected_distros();
        assert!(!defaults.contains(&"rhel"));
        assert!(defaults.contains(&"ubuntu"));
    }

    #[test]
    fn narrowing_flags_narrow_the_cross_product() {
        let cfg = config(Some("centos"), Some("8"));
        assert_eq!(cfg.selected_distros(), vec!["centos"]);
        assert_eq!(cfg.selected_releases("centos"), vec!["8"]);
        assert_eq!(cfg.selected_archs(), vec!["x86_64", "arm64"]);
    }
}
