// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capabilities consumed from the target system's registration service.
//!
//! The engine never talks to the system directly. It is handed a
//! [`TitleInventory`] for the snapshot queries and a [`Registrar`] for the
//! ticket transaction and seed install. With the `backend-host` feature the
//! crate also ships [`HostRegistry`], an in-memory backend used by host tests
//! and the `cifinish-finalize` tool.

#![forbid(unsafe_code)]

use std::collections::HashSet;

use thiserror::Error;

use crate::manifest::{Seed, TitleId};

#[cfg(feature = "backend-host")]
use crate::manifest::ParseTitleIdError;
#[cfg(feature = "backend-host")]
use crate::ticket::title_id_from_ticket;
#[cfg(feature = "backend-host")]
use parking_lot::Mutex;
#[cfg(feature = "backend-host")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "backend-host")]
use std::collections::{BTreeMap, HashMap};

/// Errors reported by a registration backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    /// Failure result code returned by the system service.
    #[error("result code {0:08x}")]
    Code(u32),
    /// A transaction is already open.
    #[error("a ticket install is already in progress")]
    Busy,
    /// The handle does not refer to the open transaction.
    #[error("unknown ticket install handle")]
    InvalidHandle,
    /// The ticket blob was rejected.
    #[error("ticket blob rejected")]
    InvalidTicket,
    /// The backend cannot be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot queries over what the target system already knows.
pub trait TitleInventory {
    /// Title ids that already have a ticket installed.
    fn registered_ticket_ids(&self) -> Result<HashSet<TitleId>, RegistrarError>;

    /// Title ids present in the title database.
    fn registered_title_ids(&self) -> Result<HashSet<TitleId>, RegistrarError>;
}

/// Privileged ticket transaction plus the separate seed install.
///
/// Transactions are strictly sequential: at most one handle is live.
pub trait Registrar {
    /// Open transaction handle.
    type Handle;

    /// Opens a ticket install transaction.
    fn begin_registration(&self) -> Result<Self::Handle, RegistrarError>;

    /// Writes the ticket blob into the open transaction.
    fn write_blob(&self, handle: &Self::Handle, blob: &[u8]) -> Result<(), RegistrarError>;

    /// Commits the transaction.
    fn finish_registration(&self, handle: &Self::Handle) -> Result<(), RegistrarError>;

    /// Discards the transaction.
    fn abort_registration(&self, handle: Self::Handle);

    /// Installs supplemental seed material for `title_id`.
    fn add_seed(&self, title_id: TitleId, seed: &Seed) -> Result<(), RegistrarError>;
}

/// Handle issued by [`HostRegistry`].
#[cfg(feature = "backend-host")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostHandle(u32);

/// Serializable snapshot of a [`HostRegistry`].
///
/// Title ids are 16 hex digits; seeds are 32 hex digits keyed by title id.
#[cfg(feature = "backend-host")]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostState {
    /// Installed tickets.
    #[serde(default)]
    pub tickets: Vec<String>,
    /// Title database entries.
    #[serde(default)]
    pub titles: Vec<String>,
    /// Installed seeds.
    #[serde(default)]
    pub seeds: BTreeMap<String, String>,
}

/// Errors raised while restoring a [`HostState`].
#[cfg(feature = "backend-host")]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A title id string failed to parse.
    #[error(transparent)]
    TitleId(#[from] ParseTitleIdError),
    /// A seed string was not 16 hex-encoded bytes.
    #[error("invalid seed for {title}: {reason}")]
    Seed {
        /// Title the seed belongs to.
        title: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// In-memory registration backend with fault injection.
#[cfg(feature = "backend-host")]
#[derive(Default)]
pub struct HostRegistry {
    inner: Mutex<HostInner>,
}

#[cfg(feature = "backend-host")]
#[derive(Default)]
struct HostInner {
    tickets: HashSet<TitleId>,
    titles: HashSet<TitleId>,
    seeds: HashMap<TitleId, Seed>,
    open: Option<OpenInstall>,
    next_handle: u32,
    committed: Vec<TitleId>,
    blobs: HashMap<TitleId, Vec<u8>>,
    seed_calls: Vec<(TitleId, Seed)>,
    aborted: usize,
    faults: Faults,
}

#[cfg(feature = "backend-host")]
struct OpenInstall {
    handle: u32,
    blob: Option<Vec<u8>>,
}

#[cfg(feature = "backend-host")]
#[derive(Default)]
struct Faults {
    begin_budget: Option<(usize, u32)>,
    write: HashMap<TitleId, u32>,
    finish: HashMap<TitleId, u32>,
    seed: HashMap<TitleId, u32>,
}

#[cfg(feature = "backend-host")]
impl HostRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores a registry from a persisted snapshot.
    pub fn from_state(state: &HostState) -> Result<Self, StateError> {
        let registry = Self::new();
        {
            let mut inner = registry.inner.lock();
            for raw in &state.tickets {
                inner.tickets.insert(raw.parse()?);
            }
            for raw in &state.titles {
                inner.titles.insert(raw.parse()?);
            }
            for (raw_id, raw_seed) in &state.seeds {
                let title_id: TitleId = raw_id.parse()?;
                inner.seeds.insert(title_id, parse_seed(raw_id, raw_seed)?);
            }
        }
        Ok(registry)
    }

    /// Snapshot suitable for persisting; ids are emitted in ascending order.
    pub fn snapshot(&self) -> HostState {
        let inner = self.inner.lock();
        let mut seeds = BTreeMap::new();
        for (id, seed) in &inner.seeds {
            seeds.insert(id.to_string(), hex::encode(seed.as_bytes()));
        }
        HostState { tickets: sorted_hex(&inner.tickets), titles: sorted_hex(&inner.titles), seeds }
    }

    /// Marks `title_id` as having a ticket.
    pub fn register_ticket(&self, title_id: TitleId) {
        self.inner.lock().tickets.insert(title_id);
    }

    /// Marks `title_id` as present in the title database.
    pub fn register_title(&self, title_id: TitleId) {
        self.inner.lock().titles.insert(title_id);
    }

    /// True when a ticket for `title_id` is installed.
    pub fn has_ticket(&self, title_id: TitleId) -> bool {
        self.inner.lock().tickets.contains(&title_id)
    }

    /// Seed installed for `title_id`, if any.
    pub fn seed_for(&self, title_id: TitleId) -> Option<Seed> {
        self.inner.lock().seeds.get(&title_id).copied()
    }

    /// Tickets committed through this instance, in commit order.
    pub fn committed(&self) -> Vec<TitleId> {
        self.inner.lock().committed.clone()
    }

    /// Ticket blob committed for `title_id` through this instance.
    pub fn committed_ticket(&self, title_id: TitleId) -> Option<Vec<u8>> {
        self.inner.lock().blobs.get(&title_id).cloned()
    }

    /// Every `add_seed` call received, including failed ones.
    pub fn seed_calls(&self) -> Vec<(TitleId, Seed)> {
        self.inner.lock().seed_calls.clone()
    }

    /// Number of aborted transactions.
    pub fn aborted(&self) -> usize {
        self.inner.lock().aborted
    }

    /// Lets `successes` transactions begin, then fails every later begin with `code`.
    pub fn fail_begin_after(&self, successes: usize, code: u32) {
        self.inner.lock().faults.begin_budget = Some((successes, code));
    }

    /// Fails the ticket write for `title_id` with `code`.
    pub fn fail_write_for(&self, title_id: TitleId, code: u32) {
        self.inner.lock().faults.write.insert(title_id, code);
    }

    /// Fails the commit for `title_id` with `code`.
    pub fn fail_finish_for(&self, title_id: TitleId, code: u32) {
        self.inner.lock().faults.finish.insert(title_id, code);
    }

    /// Fails the seed install for `title_id` with `code`.
    pub fn fail_seed_for(&self, title_id: TitleId, code: u32) {
        self.inner.lock().faults.seed.insert(title_id, code);
    }
}

#[cfg(feature = "backend-host")]
impl TitleInventory for HostRegistry {
    fn registered_ticket_ids(&self) -> Result<HashSet<TitleId>, RegistrarError> {
        Ok(self.inner.lock().tickets.clone())
    }

    fn registered_title_ids(&self) -> Result<HashSet<TitleId>, RegistrarError> {
        Ok(self.inner.lock().titles.clone())
    }
}

#[cfg(feature = "backend-host")]
impl Registrar for HostRegistry {
    type Handle = HostHandle;

    fn begin_registration(&self) -> Result<HostHandle, RegistrarError> {
        let mut inner = self.inner.lock();
        if inner.open.is_some() {
            return Err(RegistrarError::Busy);
        }
        if let Some((remaining, code)) = inner.faults.begin_budget.as_mut() {
            if *remaining == 0 {
                return Err(RegistrarError::Code(*code));
            }
            *remaining -= 1;
        }
        inner.next_handle = inner.next_handle.wrapping_add(1);
        let handle = inner.next_handle;
        inner.open = Some(OpenInstall { handle, blob: None });
        Ok(HostHandle(handle))
    }

    fn write_blob(&self, handle: &HostHandle, blob: &[u8]) -> Result<(), RegistrarError> {
        let mut inner = self.inner.lock();
        let title_id = title_id_from_ticket(blob).ok_or(RegistrarError::InvalidTicket)?;
        if let Some(code) = inner.faults.write.get(&title_id) {
            return Err(RegistrarError::Code(*code));
        }
        let open = open_install(&mut inner, handle)?;
        open.blob = Some(blob.to_vec());
        Ok(())
    }

    fn finish_registration(&self, handle: &HostHandle) -> Result<(), RegistrarError> {
        let mut inner = self.inner.lock();
        let open = open_install(&mut inner, handle)?;
        let title_id = open
            .blob
            .as_deref()
            .and_then(title_id_from_ticket)
            .ok_or(RegistrarError::InvalidTicket)?;
        if let Some(code) = inner.faults.finish.get(&title_id) {
            return Err(RegistrarError::Code(*code));
        }
        let committed = inner.open.take().and_then(|open| open.blob);
        if let Some(blob) = committed {
            inner.blobs.insert(title_id, blob);
        }
        inner.tickets.insert(title_id);
        inner.committed.push(title_id);
        Ok(())
    }

    fn abort_registration(&self, handle: HostHandle) {
        let mut inner = self.inner.lock();
        if inner.open.as_ref().is_some_and(|open| open.handle == handle.0) {
            inner.open = None;
            inner.aborted += 1;
        }
    }

    fn add_seed(&self, title_id: TitleId, seed: &Seed) -> Result<(), RegistrarError> {
        let mut inner = self.inner.lock();
        inner.seed_calls.push((title_id, *seed));
        if let Some(code) = inner.faults.seed.get(&title_id) {
            return Err(RegistrarError::Code(*code));
        }
        inner.seeds.insert(title_id, *seed);
        Ok(())
    }
}

#[cfg(feature = "backend-host")]
fn open_install<'a>(
    inner: &'a mut HostInner,
    handle: &HostHandle,
) -> Result<&'a mut OpenInstall, RegistrarError> {
    match inner.open.as_mut() {
        Some(open) if open.handle == handle.0 => Ok(open),
        _ => Err(RegistrarError::InvalidHandle),
    }
}

#[cfg(feature = "backend-host")]
fn sorted_hex(ids: &HashSet<TitleId>) -> Vec<String> {
    let mut raw: Vec<u64> = ids.iter().map(|id| id.get()).collect();
    raw.sort_unstable();
    raw.into_iter().map(|id| TitleId(id).to_string()).collect()
}

#[cfg(feature = "backend-host")]
fn parse_seed(title: &str, raw: &str) -> Result<Seed, StateError> {
    let bytes = hex::decode(raw.trim())
        .map_err(|err| StateError::Seed { title: title.to_string(), reason: err.to_string() })?;
    let seed: [u8; 16] = bytes.as_slice().try_into().map_err(|_| StateError::Seed {
        title: title.to_string(),
        reason: format!("expected 16 bytes, got {}", bytes.len()),
    })?;
    Ok(Seed(seed))
}
