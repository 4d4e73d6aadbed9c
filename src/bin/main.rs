// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use anyhow::Result;
use tracing::Level;

use btfhub::{configuration::AppConfig, system};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let config = AppConfig::from_args();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(system::run(config))
}
