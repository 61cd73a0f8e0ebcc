// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! One finalize pass: read, decode, snapshot, reconcile, execute, delete.
//!
//! This is the only place the manifest is deleted, and only after a batch
//! that did not halt. Decode failures and halted batches leave the manifest in
//! place so a later pass can retry.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

use crate::execute::{execute_actions, BatchOutcome};
use crate::layout::FormatVersion;
use crate::manifest::{DecodeError, Manifest, RecordNotice};
use crate::reconcile::{reconcile, Action, PlanSummary};
use crate::registrar::{Registrar, RegistrarError, TitleInventory};
use crate::ticket::TicketTemplate;

/// Largest manifest accepted by a pass.
///
/// Bounds the read before the header is trusted. 1 MiB holds 21,845 v1 or
/// 32,767 v2/v3 records, far more than a single install batch produces.
pub const MAX_MANIFEST_BYTES: usize = 1024 * 1024;

/// Where the manifest bytes come from and how they are removed.
pub trait ManifestSource {
    /// Reads the manifest; `Ok(None)` when there is nothing pending.
    fn read(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Removes the manifest after a successful pass.
    fn delete(&mut self) -> io::Result<()>;
}

/// Manifest stored as a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileManifest {
    path: PathBuf,
}

impl FileManifest {
    /// Manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the manifest.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ManifestSource for FileManifest {
    fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        // One byte past the limit is enough to detect an oversized manifest.
        let mut bytes = Vec::new();
        file.take(MAX_MANIFEST_BYTES as u64 + 1).read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    fn delete(&mut self) -> io::Result<()> {
        fs::remove_file(&self.path)
    }
}

/// Knobs for a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    /// Decode and reconcile only; never touch the registrar or the manifest.
    pub dry_run: bool,
}

/// Errors that stop a pass before or after the batch.
#[derive(Debug, Error)]
pub enum PassError {
    /// No manifest exists.
    #[error("no pending-install manifest found")]
    NoManifest,
    /// The manifest exceeds [`MAX_MANIFEST_BYTES`].
    #[error("manifest too large: {actual} bytes exceeds {max}")]
    TooLarge {
        /// Bytes read (capped at `max + 1`).
        actual: usize,
        /// Limit.
        max: usize,
    },
    /// The manifest could not be read.
    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),
    /// The manifest failed to decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The registration state snapshot failed.
    #[error("failed to query registered titles: {0}")]
    Inventory(RegistrarError),
    /// Every entry was processed but the manifest could not be removed.
    #[error("failed to delete manifest: {source}")]
    Delete {
        /// Batch that completed before the delete failed.
        outcome: Box<BatchOutcome>,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Summary of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Manifest layout that was decoded.
    pub version: FormatVersion,
    /// Record count declared by the header.
    pub declared: u32,
    /// Records skipped by the decoder.
    pub notices: Vec<RecordNotice>,
    /// Reconciled actions in manifest order.
    pub actions: Vec<Action>,
    /// Batch result; `None` for a dry run.
    pub outcome: Option<BatchOutcome>,
    /// True when the manifest was removed.
    pub manifest_deleted: bool,
}

impl PassReport {
    /// Counts of the reconciled actions.
    pub fn summary(&self) -> PlanSummary {
        PlanSummary::of(&self.actions)
    }

    /// True when the batch halted on a fatal failure.
    pub fn halted(&self) -> bool {
        self.outcome.as_ref().is_some_and(|outcome| !outcome.is_complete())
    }
}

/// Runs one pass over `source`.
///
/// `inventory` is queried once, before any registration happens.
pub fn run_pass<S, I, R>(
    source: &mut S,
    inventory: &I,
    registrar: &R,
    template: &TicketTemplate,
    options: PassOptions,
) -> Result<PassReport, PassError>
where
    S: ManifestSource + ?Sized,
    I: TitleInventory + ?Sized,
    R: Registrar + ?Sized,
{
    let bytes = source.read()?.ok_or(PassError::NoManifest)?;
    if bytes.len() > MAX_MANIFEST_BYTES {
        return Err(PassError::TooLarge { actual: bytes.len(), max: MAX_MANIFEST_BYTES });
    }
    let manifest = Manifest::parse(&bytes)?;
    info!(
        "manifest {}: {} declared, {} usable",
        manifest.version,
        manifest.declared,
        manifest.entries.len()
    );

    let tickets = inventory.registered_ticket_ids().map_err(PassError::Inventory)?;
    let titles = inventory.registered_title_ids().map_err(PassError::Inventory)?;
    debug!("{} tickets and {} titles already registered", tickets.len(), titles.len());

    let actions = reconcile(&manifest.entries, &tickets, &titles);
    let summary = PlanSummary::of(&actions);
    info!("{} to finalize ({} with seeds), {} already present", summary.act, summary.seeded, summary.skip);

    let mut report = PassReport {
        version: manifest.version,
        declared: manifest.declared,
        notices: manifest.notices,
        actions,
        outcome: None,
        manifest_deleted: false,
    };
    if options.dry_run {
        return Ok(report);
    }

    let outcome = execute_actions(&report.actions, template, registrar);
    if outcome.is_complete() {
        if let Err(source) = source.delete() {
            return Err(PassError::Delete { outcome: Box::new(outcome), source });
        }
        report.manifest_deleted = true;
        info!("manifest removed");
    } else {
        warn!("batch halted; manifest kept for a later pass");
    }
    report.outcome = Some(outcome);
    Ok(report)
}
