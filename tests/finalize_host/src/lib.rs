// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Host integration tests for the cifinish finalize pipeline
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Test-only
//! TEST_COVERAGE: see `tests/decode_layouts.rs` and `tests/finalize_flow.rs`
//!
//! Fixture encoders live here so both test binaries build manifests the same
//! way. Production code never writes manifests.

use cifinish::layout::RECORD_TAG;
use cifinish::manifest::MAGIC;
use cifinish::ticket::{COMMON_KEY_INDEX_OFFSET, TICKET_SIZE, TITLE_KEY_OFFSET};
use cifinish::{CanonicalEntry, FormatVersion, LegacyKey, Seed, TicketTemplate, TitleId};

/// Key written into v1 records whose entry carries none.
pub const DEFAULT_V1_KEY: LegacyKey = LegacyKey { common_key_index: 1, title_key: [0xAA; 16] };

/// Encodes one v1 record (0x30 bytes), using [`DEFAULT_V1_KEY`] when the
/// entry has no key of its own.
pub fn encode_v1(entry: &CanonicalEntry) -> Vec<u8> {
    let key = entry.legacy_key.unwrap_or(DEFAULT_V1_KEY);
    let mut record = vec![0u8; 0x30];
    record[0x00..0x08].copy_from_slice(&entry.title_id.get().to_le_bytes());
    record[0x08] = key.common_key_index;
    record[0x09] = u8::from(entry.has_seed());
    record[0x0A..0x10].copy_from_slice(&RECORD_TAG);
    record[0x10..0x20].copy_from_slice(&key.title_key);
    if let Some(seed) = &entry.seed {
        record[0x20..0x30].copy_from_slice(seed.as_bytes());
    }
    record
}

/// Encodes one v2 record (0x20 bytes, title id at 0x06).
pub fn encode_v2(entry: &CanonicalEntry) -> Vec<u8> {
    let mut record = vec![0u8; 0x20];
    record[0x00..0x06].copy_from_slice(&RECORD_TAG);
    record[0x06..0x0E].copy_from_slice(&entry.title_id.get().to_le_bytes());
    record[0x0E] = u8::from(entry.has_seed());
    if let Some(seed) = &entry.seed {
        record[0x10..0x20].copy_from_slice(seed.as_bytes());
    }
    record
}

/// Encodes one v3 record (0x20 bytes, title id at 0x08).
pub fn encode_v3(entry: &CanonicalEntry) -> Vec<u8> {
    let mut record = vec![0u8; 0x20];
    record[0x00..0x06].copy_from_slice(&RECORD_TAG);
    record[0x06] = u8::from(entry.has_seed());
    record[0x08..0x10].copy_from_slice(&entry.title_id.get().to_le_bytes());
    if let Some(seed) = &entry.seed {
        record[0x10..0x20].copy_from_slice(seed.as_bytes());
    }
    record
}

/// Encodes `entry` with the layout for `version`.
pub fn encode_record(version: FormatVersion, entry: &CanonicalEntry) -> Vec<u8> {
    match version {
        FormatVersion::V1 => encode_v1(entry),
        FormatVersion::V2 => encode_v2(entry),
        FormatVersion::V3 => encode_v3(entry),
    }
}

/// What `entry` decodes to after being written with `version`'s layout.
pub fn as_decoded(version: FormatVersion, entry: CanonicalEntry) -> CanonicalEntry {
    let legacy_key = match version {
        FormatVersion::V1 => Some(entry.legacy_key.unwrap_or(DEFAULT_V1_KEY)),
        FormatVersion::V2 | FormatVersion::V3 => None,
    };
    CanonicalEntry { legacy_key, ..entry }
}

/// Builds a manifest image record by record.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    version: u32,
    count: Option<u32>,
    records: Vec<Vec<u8>>,
}

impl ManifestBuilder {
    pub fn new(version: FormatVersion) -> Self {
        Self::raw_version(version.as_raw())
    }

    /// Builder for a header version the decoder may not know.
    pub fn raw_version(version: u32) -> Self {
        Self { version, count: None, records: Vec::new() }
    }

    pub fn entry(mut self, entry: CanonicalEntry) -> Self {
        let version = FormatVersion::from_raw(self.version).unwrap_or(FormatVersion::V3);
        self.records.push(encode_record(version, &entry));
        self
    }

    pub fn entries(self, entries: &[CanonicalEntry]) -> Self {
        entries.iter().fold(self, |builder, entry| builder.entry(*entry))
    }

    /// Appends a record with its tag overwritten by `tag`.
    pub fn corrupt_entry(mut self, entry: CanonicalEntry, tag: [u8; 6]) -> Self {
        let version = FormatVersion::from_raw(self.version).unwrap_or(FormatVersion::V3);
        let mut record = encode_record(version, &entry);
        let offset = if version == FormatVersion::V1 { 0x0A } else { 0x00 };
        record[offset..offset + 6].copy_from_slice(&tag);
        self.records.push(record);
        self
    }

    /// Overrides the declared record count.
    pub fn declared(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let count = self.count.unwrap_or(self.records.len() as u32);
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        for record in self.records {
            out.extend_from_slice(&record);
        }
        out
    }
}

pub fn entry(title_id: u64, seed: Option<[u8; 16]>) -> CanonicalEntry {
    CanonicalEntry { title_id: TitleId(title_id), seed: seed.map(Seed), legacy_key: None }
}

pub fn v1_entry(title_id: u64, common_key_index: u8, title_key: [u8; 16]) -> CanonicalEntry {
    CanonicalEntry {
        title_id: TitleId(title_id),
        seed: None,
        legacy_key: Some(LegacyKey { common_key_index, title_key }),
    }
}

/// Template with recognizable key material.
pub fn ticket_template() -> TicketTemplate {
    let mut bytes = vec![0u8; TICKET_SIZE];
    bytes[TITLE_KEY_OFFSET..TITLE_KEY_OFFSET + 16].fill(0x5C);
    bytes[COMMON_KEY_INDEX_OFFSET] = 1;
    match TicketTemplate::from_bytes(bytes) {
        Ok(template) => template,
        Err(err) => panic!("fixture template rejected: {err}"),
    }
}
