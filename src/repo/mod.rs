// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

mod amazon;
mod centos;
mod debian;
mod fedora;
mod oracle;
mod rhel;
mod suse;
mod ubuntu;
mod yum;

pub use self::amazon::AmazonRepo;
pub use self::centos::CentOSRepo;
pub use self::debian::DebianRepo;
pub use self::fedora::FedoraRepo;
pub use self::oracle::OracleRepo;
pub use self::rhel::RHELRepo;
pub use self::suse::SUSERepo;
pub use self::ubuntu::UbuntuRepo;

use std::{fs, path::Path, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    job::{BtfGenerationJob, Job, JobSender, KernelExtractionJob},
    package::{self, Package},
    utility,
};

/// One distribution family: knows how to enumerate its kernel-debug
/// packages for a release and architecture and feed them to the pipeline.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_kernel_packages(
        &self,
        shutdown: &CancellationToken,
        work_dir: &Path,
        release: &str,
        arch: &str,
        force: bool,
        jobs: &JobSender,
    ) -> Result<()>;
}

pub fn new_repository(distro: &str) -> Option<Box<dyn Repository>> {
    match distro {
        "ubuntu" => Some(Box::new(UbuntuRepo::new())),
        "debian" => Some(Box::new(DebianRepo::new())),
        "fedora" => Some(Box::new(FedoraRepo::new())),
        "centos" => Some(Box::new(CentOSRepo::new())),
        "ol" => Some(Box::new(OracleRepo::new())),
        "rhel" => Some(Box::new(RHELRepo::new())),
        "amzn" => Some(Box::new(AmazonRepo::new())),
        "sles" => Some(Box::new(SUSERepo::new())),
        _ => None,
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    /// Not a failure: the kernel ships its own BTF, and every later kernel
    /// in the stream will too. Enumeration stops.
    #[error("vmlinux already has a .BTF section")]
    HasBtf,
    #[error("canceled")]
    Canceled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Run one package through the two-stage pipeline. Serial from the caller's
/// point of view: the extraction reply gates the BTF generation dispatch.
pub async fn process_package(
    shutdown: &CancellationToken,
    package: Arc<dyn Package>,
    work_dir: &Path,
    force: bool,
    jobs: &JobSender,
) -> Result<(), ProcessError> {
    let btf_name = format!("{}.btf", package.btf_filename());
    let btf_path = work_dir.join(&btf_name);
    let btf_tar_name = format!("{}.btf.tar.xz", package.btf_filename());
    let btf_tar_path = work_dir.join(&btf_tar_name);

    if package::has_btf_marker(package.as_ref(), work_dir) {
        return Err(ProcessError::HasBtf);
    }
    if !force && btf_tar_path.exists() {
        info!("SKIP: {} exists", btf_tar_name);
        return Ok(());
    }

    // 1st job: extract the vmlinux file

    let (reply_tx, mut reply_rx) = oneshot::channel();
    let extraction = KernelExtractionJob {
        package: package.clone(),
        work_dir: work_dir.to_path_buf(),
        force,
        reply: Some(reply_tx),
    };
    send_job(shutdown, jobs, Box::new(extraction)).await?;

    let vmlinux_path: PathBuf = tokio::select! {
        _ = shutdown.cancelled() => return Err(ProcessError::Canceled),
        reply = &mut reply_rx => match reply {
            // the job was dropped unprocessed during shutdown
            Err(_) => return Err(ProcessError::Canceled),
            Ok(Err(_)) if shutdown.is_cancelled() => return Err(ProcessError::Canceled),
            Ok(Err(err)) => return Err(ProcessError::Other(err)),
            Ok(Ok(path)) => path,
        },
    };

    // Embedded BTF ends the whole stream, not just this package

    let has_btf = utility::elf::has_btf_section(&vmlinux_path)
        .context("BTF check")
        .map_err(ProcessError::Other)?;
    if has_btf {
        package::mark_has_btf(package.as_ref(), work_dir)
            .context("hasbtf marker")
            .map_err(ProcessError::Other)?;
        // removing the vmlinux costs a re-download on forced re-runs, but
        // nothing will ever be built from it
        let _ = fs::remove_file(&vmlinux_path);
        return Err(ProcessError::HasBtf);
    }

    // 2nd job: generate BTF from the vmlinux file, fire and forget

    let generation = BtfGenerationJob {
        vmlinux_path,
        btf_path,
        btf_tar_path,
    };
    send_job(shutdown, jobs, Box::new(generation)).await?;

    Ok(())
}

/// Feed a sorted package stream through `process_package`, honoring the
/// fast-exit rule: once one kernel has embedded BTF, the remaining (higher)
/// versions are skipped. Terminal package errors are logged, marked sticky
/// and skipped; cancellation ends the stream quietly.
pub async fn process_packages(
    shutdown: &CancellationToken,
    work_dir: &Path,
    packages: Vec<Arc<dyn Package>>,
    force: bool,
    jobs: &JobSender,
) -> Result<()> {
    let total = packages.len();
    for (i, package) in packages.into_iter().enumerate() {
        debug!("start pkg {} ({}/{})", package, i + 1, total);

        match process_package(shutdown, package.clone(), work_dir, force, jobs).await {
            Err(ProcessError::HasBtf) => {
                info!("kernel {} has BTF already, skipping later kernels", package);
                return Ok(());
            }
            Err(ProcessError::Canceled) => return Ok(()),
            Err(ProcessError::Other(err)) => {
                error!("{}: {:#}", package, err);
                if let Err(err) = package::mark_failed(package.as_ref(), work_dir) {
                    warn!("failed marker for {}: {}", package, err);
                }
                continue;
            }
            Ok(()) => {}
        }

        debug!("end pkg {} ({}/{})", package, i + 1, total);
    }
    Ok(())
}

async fn send_job(
    shutdown: &CancellationToken,
    jobs: &JobSender,
    job: Box<dyn Job>,
) -> Result<(), ProcessError> {
    tokio::select! {
        _ = shutdown.cancelled() => Err(ProcessError::Canceled),
        sent = jobs.send(job) => sent.map_err(|_| ProcessError::Canceled),
    }
}

// Substitute the `%s` markers of a URL template in order, the way the
// distro tables are written.
fn fill_template(template: &str, args: &[&str]) -> String {
    let mut out = template.to_string();
    for arg in args {
        out = out.replacen("%s", arg, 1);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::fill_template;

    #[test]
    fn template_markers_fill_in_order() {
        assert_eq!(
            fill_template(
                "https://archives.fedoraproject.org/pub/archive/fedora/linux/releases/%s/Everything/%s/debug/tree/Packages/k/",
                &["31", "aarch64"],
            ),
            "https://archives.fedoraproject.org/pub/archive/fedora/linux/releases/31/Everything/aarch64/debug/tree/Packages/k/"
        );
    }

    #[test]
    fn extra_arguments_are_ignored() {
        assert_eq!(fill_template("http://mirror/%s/", &["x86_64"]), "http://mirror/x86_64/");
    }
}
