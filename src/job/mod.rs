// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

mod btf;
mod extract;
mod worker;

pub use self::btf::BtfGenerationJob;
pub use self::extract::KernelExtractionJob;
pub use self::worker::start_worker;

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// One-shot reply carrying the extracted vmlinux path, or the failure.
pub type Reply = oneshot::Sender<Result<PathBuf>>;

pub type JobSender = async_channel::Sender<Box<dyn Job>>;
pub type JobReceiver = async_channel::Receiver<Box<dyn Job>>;

/// A unit of work on the shared job channel. Workers call `run`; when it
/// fails and the job still holds a reply channel, the error is delivered
/// there instead of the log.
#[async_trait]
pub trait Job: Send {
    async fn run(&mut self, shutdown: &CancellationToken) -> Result<()>;

    fn take_reply(&mut self) -> Option<Reply> {
        None
    }
}
