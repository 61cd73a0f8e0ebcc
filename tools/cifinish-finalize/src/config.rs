// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Finalizer configuration: defaults, then the TOML file, then CLI flags.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default manifest location.
pub const DEFAULT_MANIFEST: &str = "cifinish.bin";
/// Default ticket template location.
pub const DEFAULT_TICKET: &str = "basetik.bin";
/// Default registry state location.
pub const DEFAULT_STATE: &str = "registry.json";

/// Contents of a `--config` file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub manifest: Option<PathBuf>,
    pub ticket_template: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub dry_run: Option<bool>,
}

impl FileConfig {
    /// Parses a TOML document.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid finalizer config")
    }

    /// Reads and parses `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }
}

/// Overrides taken from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub manifest: Option<PathBuf>,
    pub ticket_template: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub dry_run: bool,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeConfig {
    pub manifest: PathBuf,
    pub ticket_template: PathBuf,
    pub state: PathBuf,
    pub dry_run: bool,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from(DEFAULT_MANIFEST),
            ticket_template: PathBuf::from(DEFAULT_TICKET),
            state: PathBuf::from(DEFAULT_STATE),
            dry_run: false,
        }
    }
}

impl FinalizeConfig {
    /// Layers `file` and then `cli` over the defaults.
    ///
    /// `dry_run` is sticky: either source can turn it on, neither can turn it
    /// off once the other has.
    pub fn resolve(file: FileConfig, cli: Overrides) -> Self {
        let defaults = Self::default();
        Self {
            manifest: cli.manifest.or(file.manifest).unwrap_or(defaults.manifest),
            ticket_template: cli
                .ticket_template
                .or(file.ticket_template)
                .unwrap_or(defaults.ticket_template),
            state: cli.state.or(file.state).unwrap_or(defaults.state),
            dry_run: cli.dry_run || file.dry_run.unwrap_or(defaults.dry_run),
        }
    }
}
