// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Base ticket template patched once per registered title.
//!
//! The template is opaque apart from three fields: the title key, the
//! big-endian title id, and the common key index. The title id is always
//! rewritten. The key fields are rewritten only for entries that carry their
//! own [`LegacyKey`]; otherwise the template's values stand.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::layout::TITLE_KEY_LEN;
use crate::manifest::{LegacyKey, TitleId};

/// Size of a ticket blob accepted by the registration transaction.
pub const TICKET_SIZE: usize = 0x350;
/// Offset of the 16-byte title key.
pub const TITLE_KEY_OFFSET: usize = 0x1BF;
/// Offset of the big-endian title id.
pub const TITLE_ID_OFFSET: usize = 0x1DC;
/// Offset of the common key index byte.
pub const COMMON_KEY_INDEX_OFFSET: usize = 0x1F1;

/// Errors produced while loading a ticket template.
#[derive(Debug, Error)]
pub enum TicketError {
    /// The template is not exactly one ticket wide.
    #[error("ticket template must be {expected:#x} bytes, got {actual:#x}")]
    Size {
        /// Required size.
        expected: usize,
        /// Size supplied.
        actual: usize,
    },
    /// The template file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Validated ticket template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketTemplate {
    bytes: Vec<u8>,
}

impl TicketTemplate {
    /// Wraps `bytes`, rejecting anything that is not [`TICKET_SIZE`] long.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TicketError> {
        if bytes.len() != TICKET_SIZE {
            return Err(TicketError::Size { expected: TICKET_SIZE, actual: bytes.len() });
        }
        Ok(Self { bytes })
    }

    /// Reads a template from `path`.
    pub fn load(path: &Path) -> Result<Self, TicketError> {
        Self::from_bytes(fs::read(path)?)
    }

    /// Raw template bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Copy of the template with `title_id` written big-endian and, when
    /// given, `legacy_key` written over the template's key fields.
    pub fn for_title(&self, title_id: TitleId, legacy_key: Option<&LegacyKey>) -> Vec<u8> {
        let mut blob = self.bytes.clone();
        blob[TITLE_ID_OFFSET..TITLE_ID_OFFSET + 8].copy_from_slice(&title_id.to_be_bytes());
        if let Some(key) = legacy_key {
            blob[TITLE_KEY_OFFSET..TITLE_KEY_OFFSET + TITLE_KEY_LEN].copy_from_slice(&key.title_key);
            blob[COMMON_KEY_INDEX_OFFSET] = key.common_key_index;
        }
        blob
    }
}

/// Reads the title id back out of a ticket blob.
pub fn title_id_from_ticket(blob: &[u8]) -> Option<TitleId> {
    if blob.len() != TICKET_SIZE {
        return None;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&blob[TITLE_ID_OFFSET..TITLE_ID_OFFSET + 8]);
    Some(TitleId(u64::from_be_bytes(raw)))
}

/// Reads the key fields back out of a ticket blob.
pub fn key_from_ticket(blob: &[u8]) -> Option<LegacyKey> {
    if blob.len() != TICKET_SIZE {
        return None;
    }
    let mut title_key = [0u8; TITLE_KEY_LEN];
    title_key.copy_from_slice(&blob[TITLE_KEY_OFFSET..TITLE_KEY_OFFSET + TITLE_KEY_LEN]);
    Some(LegacyKey { common_key_index: blob[COMMON_KEY_INDEX_OFFSET], title_key })
}
