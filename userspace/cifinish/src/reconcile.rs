// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Set difference between pending manifest entries and the registration state.

use std::collections::HashSet;

use crate::manifest::{CanonicalEntry, LegacyKey, Seed, TitleId};

/// Entry that still needs a ticket (and possibly a seed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTitle {
    /// Title to register.
    pub title_id: TitleId,
    /// Seed to install once the ticket is committed.
    pub seed: Option<Seed>,
    /// Key material to write into the ticket instead of the template's.
    pub legacy_key: Option<LegacyKey>,
}

/// Decision taken for one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Already registered; nothing to do.
    Skip {
        /// Title found in either registered set.
        title_id: TitleId,
    },
    /// Not registered yet.
    Act(PendingTitle),
}

impl Action {
    /// Title the action refers to.
    pub fn title_id(&self) -> TitleId {
        match self {
            Self::Skip { title_id } => *title_id,
            Self::Act(pending) => pending.title_id,
        }
    }

    /// True for [`Action::Act`].
    pub fn is_act(&self) -> bool {
        matches!(self, Self::Act(_))
    }
}

/// Counts of each action kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Entries that will be registered.
    pub act: usize,
    /// Entries already present.
    pub skip: usize,
    /// Act entries that also carry a seed.
    pub seeded: usize,
}

impl PlanSummary {
    /// Tallies `actions`.
    pub fn of(actions: &[Action]) -> Self {
        actions.iter().fold(Self::default(), |mut summary, action| {
            match action {
                Action::Skip { .. } => summary.skip += 1,
                Action::Act(pending) => {
                    summary.act += 1;
                    if pending.seed.is_some() {
                        summary.seeded += 1;
                    }
                }
            }
            summary
        })
    }
}

/// Classifies every pending entry, preserving input order.
///
/// An entry is present when its title id is in `registered_tickets` or in
/// `registered_titles`; either set alone is enough.
pub fn reconcile(
    pending: &[CanonicalEntry],
    registered_tickets: &HashSet<TitleId>,
    registered_titles: &HashSet<TitleId>,
) -> Vec<Action> {
    pending
        .iter()
        .map(|entry| {
            let id = entry.title_id;
            if registered_tickets.contains(&id) || registered_titles.contains(&id) {
                Action::Skip { title_id: id }
            } else {
                Action::Act(PendingTitle {
                    title_id: id,
                    seed: entry.seed,
                    legacy_key: entry.legacy_key,
                })
            }
        })
        .collect()
}
