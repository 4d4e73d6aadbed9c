// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

pub mod centos;
pub mod rhel;
pub mod suse;
pub mod ubuntu;

use std::{fmt, fs, io, path::Path, path::PathBuf, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::kernel::Version;

/// A distribution kernel-debug package. The pipeline only ever talks to this
/// capability set; the concrete variant knows how to fetch and open itself.
#[async_trait]
pub trait Package: fmt::Display + Send + Sync {
    /// Stem deriving the names of every on-disk file of this package.
    fn filename(&self) -> &str;

    /// Stem for the produced BTF artifacts. Usually `filename()`, but e.g.
    /// SUSE strips the build counter so artifacts match `uname -r`.
    fn btf_filename(&self) -> &str {
        self.filename()
    }

    fn version(&self) -> &Version;

    /// Fetch the package file into `dir` and return its path. Idempotent
    /// when the file already exists and `force` is off.
    async fn download(
        &self,
        shutdown: &CancellationToken,
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf>;

    /// Extract the uncompressed kernel image out of the downloaded package.
    async fn extract_kernel(
        &self,
        shutdown: &CancellationToken,
        pkg_path: &Path,
        vmlinux_path: &Path,
    ) -> Result<()>;
}

pub fn btf_tarball_exists(package: &dyn Package, work_dir: &Path) -> bool {
    work_dir
        .join(format!("{}.btf.tar.xz", package.btf_filename()))
        .exists()
}

pub fn is_failed(package: &dyn Package, work_dir: &Path) -> bool {
    work_dir
        .join(format!("{}.failed", package.btf_filename()))
        .exists()
}

pub fn has_btf_marker(package: &dyn Package, work_dir: &Path) -> bool {
    work_dir
        .join(format!("{}.hasbtf", package.btf_filename()))
        .exists()
}

/// Sticky marker: this kernel ships its own `.BTF` section, nothing to build.
pub fn mark_has_btf(package: &dyn Package, work_dir: &Path) -> io::Result<()> {
    fs::File::create(work_dir.join(format!("{}.hasbtf", package.btf_filename()))).map(|_| ())
}

/// Sticky marker: this package failed terminally and is skipped on re-runs.
pub fn mark_failed(package: &dyn Package, work_dir: &Path) -> io::Result<()> {
    fs::File::create(work_dir.join(format!("{}.failed", package.btf_filename()))).map(|_| ())
}

/// Ascending version order, so enumeration can stop at the first kernel that
/// already embeds BTF.
pub fn sort_by_version(packages: &mut [Arc<dyn Package>]) {
    packages.sort_by(|a, b| a.version().cmp(b.version()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Version;

    struct FakePackage {
        stem: String,
        btf_stem: String,
        version: Version,
    }

    impl fmt::Display for FakePackage {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str(&self.stem)
        }
    }

    #[async_trait]
    impl Package for FakePackage {
        fn filename(&self) -> &str {
            &self.stem
        }

        fn btf_filename(&self) -> &str {
            &self.btf_stem
        }

        fn version(&self) -> &Version {
            &self.version
        }

        async fn download(
            &self,
            _shutdown: &CancellationToken,
            _dir: &Path,
            _force: bool,
        ) -> Result<PathBuf> {
            unreachable!()
        }

        async fn extract_kernel(
            &self,
            _shutdown: &CancellationToken,
            _pkg_path: &Path,
            _vmlinux_path: &Path,
        ) -> Result<()> {
            unreachable!()
        }
    }

    fn fake(stem: &str, btf_stem: &str, version: &str) -> FakePackage {
        FakePackage {
            stem: stem.to_string(),
            btf_stem: btf_stem.to_string(),
            version: Version::new(version),
        }
    }

    #[test]
    fn markers_are_keyed_by_the_btf_stem() {
        let dir = tempfile::tempdir().unwrap();
        let package = fake("5.14.21-150400.24.100.1-default", "5.14.21-150400.24.100-default", "5.14.21-150400.24.100.1");

        assert!(!has_btf_marker(&package, dir.path()));
        mark_has_btf(&package, dir.path()).unwrap();
        assert!(has_btf_marker(&package, dir.path()));
        assert!(dir
            .path()
            .join("5.14.21-150400.24.100-default.hasbtf")
            .exists());

        assert!(!is_failed(&package, dir.path()));
        mark_failed(&package, dir.path()).unwrap();
        assert!(is_failed(&package, dir.path()));
    }

    #[test]
    fn sorting_is_ascending_by_version() {
        let mut packages: Vec<Arc<dyn Package>> = vec![
            Arc::new(fake("b", "b", "4.18.0-80.el8")),
            Arc::new(fake("a", "a", "3.10.0-957.el7")),
            Arc::new(fake("c", "c", "4.18.0-80.1.2.el8")),
        ];
        sort_by_version(&mut packages);
        let stems: Vec<&str> = packages.iter().map(|p| p.filename()).collect();
        assert_eq!(stems, vec!["a", "b", "c"]);
    }
}
