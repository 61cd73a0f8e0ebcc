// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! `cifinish-finalize` entry point.

use std::process::ExitCode;

use clap::Parser;
use log::error;

use cifinish_finalize::{execute, Args};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match execute(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
