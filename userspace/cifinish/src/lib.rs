// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Pending-install manifest (`cifinish.bin`) finalization library
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (manifest v1-v3)
//! TEST_COVERAGE: unit tests per module + `tests/` + `tests/finalize_host`
//!
//! PUBLIC API:
//!   - decode()/Manifest: versioned manifest decoding into CanonicalEntry
//!   - reconcile(): skip/act classification against registered id sets
//!   - execute_actions(): sequential ticket + seed installation
//!   - run_pass(): read, reconcile, execute, delete
//!
//! DEPENDENCIES:
//!   - thiserror: error types
//!   - log: notices and progress
//!   - parking_lot/serde/hex (backend-host): in-memory registry and its snapshot

#![forbid(unsafe_code)]

pub mod cli;
pub mod execute;
pub mod layout;
pub mod manifest;
pub mod pass;
pub mod reconcile;
pub mod registrar;
pub mod ticket;

pub use execute::{execute_actions, BatchOutcome, SeedOutcome, TransactionError, TransactionStage};
pub use layout::FormatVersion;
pub use manifest::{
    decode, CanonicalEntry, DecodeError, LegacyKey, Manifest, RecordNotice, Seed, TitleId,
};
pub use pass::{run_pass, FileManifest, ManifestSource, PassError, PassOptions, PassReport};
pub use reconcile::{reconcile, Action, PendingTitle, PlanSummary};
#[cfg(feature = "backend-host")]
pub use registrar::{HostHandle, HostRegistry, HostState, StateError};
pub use registrar::{Registrar, RegistrarError, TitleInventory};
pub use ticket::{TicketError, TicketTemplate};
