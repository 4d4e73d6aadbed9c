// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::error;

use super::JobReceiver;

/// One worker of the consumer pool. Runs jobs off the shared channel until
/// the channel is closed and drained, or the token fires. Per-job errors
/// never stop the worker: they go to the job's reply channel when it has
/// one, to the log otherwise.
pub async fn start_worker(shutdown: CancellationToken, jobs: JobReceiver) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            received = jobs.recv() => {
                let mut job = match received {
                    Ok(job) => job,
                    Err(_) => return Ok(()), // channel closed, all jobs done
                };
                if let Err(err) = job.run(&shutdown).await {
                    match job.take_reply() {
                        Some(reply) => {
                            let _ = reply.send(Err(err));
                        }
                        None => error!("{:#}", err),
                    }
                }
            }
        }
    }
}
