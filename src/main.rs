// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a scripted host session against one removable logical unit.

mod args;
mod sim;

use anyhow::Result;
use log::info;

use crate::args::Args;
use crate::sim::Medium;

fn main() -> Result<()> {
    let args: Args = argh::from_env();

    env_logger::Builder::new()
        .parse_filters(&args.log_level)
        .parse_default_env()
        .init();

    let config = args.config()?;
    let medium = Medium {
        block_count: args.block_count,
        block_size: args.block_size,
    };
    info!(
        "starting logical unit: {:?}, medium loaded: {}",
        config, !args.no_medium
    );

    for line in sim::run_session(&config, medium, !args.no_medium, args.commands) {
        println!("{}", line);
    }
    Ok(())
}
