// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{env, fs, path::PathBuf};

use anyhow::{Context, Result};
use futures::{stream::FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    configuration::AppConfig,
    job::{self, Job},
    repo,
};

const MAX_WORKERS: usize = 12;

/// Run the whole hub update: one producer task per distro × release × arch
/// enumerating packages, a fixed pool of workers consuming the shared job
/// channel. The channel closes when the last producer drops its sender,
/// letting the workers drain and exit.
pub async fn run(config: AppConfig) -> Result<()> {
    config.validate()?;

    let base_dir = env::current_dir().context("pwd")?;
    let archive_dir = base_dir.join("archive");

    let num_workers = match config.workers {
        Some(n) => n.max(1),
        None => num_cpus::get().saturating_sub(1).max(1).min(MAX_WORKERS),
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, finishing in-flight work");
                shutdown.cancel();
            }
        });
    }
    let produce_token = shutdown.child_token();
    let consume_token = shutdown.child_token();

    let (job_tx, job_rx) = async_channel::bounded::<Box<dyn Job>>(1);

    info!("using {} workers", num_workers);
    let mut consumers = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        consumers.push(tokio::spawn(job::start_worker(
            consume_token.clone(),
            job_rx.clone(),
        )));
    }

    let mut producers = FuturesUnordered::new();
    for distro in config.selected_distros() {
        for release in config.selected_releases(distro) {
            for arch in config.selected_archs() {
                // workDir example: ./archive/ubuntu/focal/x86_64
                let work_dir: PathBuf = archive_dir.join(distro).join(release).join(arch);
                fs::create_dir_all(&work_dir).context("arch dir")?;

                let repository = repo::new_repository(distro)
                    .with_context(|| format!("invalid distribution {}", distro))?;

                let token = produce_token.clone();
                let jobs = job_tx.clone();
                let force = config.force;
                let (release, arch) = (release.to_string(), arch.to_string());
                producers.push(tokio::spawn(async move {
                    repository
                        .get_kernel_packages(&token, &work_dir, &release, &arch, force, &jobs)
                        .await
                }));
            }
        }
    }
    // producers own the remaining senders; the channel closes once they end
    drop(job_tx);

    let mut first_err: Option<anyhow::Error> = None;
    while let Some(joined) = producers.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            error!("producer: {:#}", err);
            if first_err.is_none() {
                first_err = Some(err);
                produce_token.cancel();
            }
        }
    }

    for worker in consumers {
        let result = match worker.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            error!("worker: {:#}", err);
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
