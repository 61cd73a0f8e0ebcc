// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Decoder for the pending-install manifest (`cifinish.bin`).
//!
//! The decoder performs no I/O so it can be exercised directly from tests. It
//! validates the 16-byte header, selects the record layout from the header
//! version, and maps every record into a [`CanonicalEntry`]. Unknown versions
//! are rejected outright: misreading seed bytes would silently corrupt a later
//! privileged write.

#![deny(clippy::all, missing_docs)]

use core::fmt;
use core::str::FromStr;

use log::{debug, warn};
use thiserror::Error;

use crate::layout::{FormatVersion, RawRecord, SEED_LEN, TITLE_KEY_LEN};

/// Manifest magic.
pub const MAGIC: [u8; 8] = *b"CIFINISH";
/// Size of the fixed header.
pub const HEADER_LEN: usize = 16;

/// Result alias returned by the decoder.
pub type Result<T> = core::result::Result<T, DecodeError>;

/// Errors that abort a decode. None of them produce a partial sequence.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The stream ends before the header or a declared record completes.
    #[error("manifest truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required by the header and declared records.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// The first eight bytes are not `CIFINISH`.
    #[error("CIFINISH magic not found (got {})", escape(.found))]
    BadMagic {
        /// Magic bytes found in the stream.
        found: [u8; 8],
    },
    /// The container is recognised but the record layout is not.
    #[error("unsupported manifest version {actual} (newest known is {max_known}); a newer finalizer is required")]
    UnsupportedVersion {
        /// Version declared by the header.
        actual: u32,
        /// Newest version this decoder understands.
        max_known: u32,
    },
}

/// Opaque 64-bit title identifier.
///
/// Compared by equality only; no ordering is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TitleId(pub u64);

impl TitleId {
    /// Raw bit pattern.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Big-endian presentation used inside ticket blobs.
    pub const fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Error returned when a title id string is not 1-16 hex digits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid title id `{0}`")]
pub struct ParseTitleIdError(pub String);

impl FromStr for TitleId {
    type Err = ParseTitleIdError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.is_empty() || digits.len() > 16 {
            return Err(ParseTitleIdError(s.to_string()));
        }
        u64::from_str_radix(digits, 16).map(TitleId).map_err(|_| ParseTitleIdError(s.to_string()))
    }
}

/// Supplemental 16-byte seed, copied verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed(pub [u8; SEED_LEN]);

impl Seed {
    /// Seed bytes.
    pub fn as_bytes(&self) -> &[u8; SEED_LEN] {
        &self.0
    }
}

/// Per-title key material carried by v1 records.
///
/// When present it replaces the template's common key index and title key in
/// the ticket written for the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LegacyKey {
    /// Common key slot the title key is encrypted under.
    pub common_key_index: u8,
    /// Encrypted title key.
    pub title_key: [u8; TITLE_KEY_LEN],
}

/// Version-independent manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalEntry {
    /// Title to register.
    pub title_id: TitleId,
    /// Seed to install after the ticket, present iff the record flagged one.
    pub seed: Option<Seed>,
    /// Key material for the ticket; only v1 records carry it.
    pub legacy_key: Option<LegacyKey>,
}

impl CanonicalEntry {
    /// True when the record carried seed material.
    pub fn has_seed(&self) -> bool {
        self.seed.is_some()
    }
}

/// Fixed manifest header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestHeader {
    /// Raw magic bytes.
    pub magic: [u8; 8],
    /// Raw layout version.
    pub format_version: u32,
    /// Number of records that follow.
    pub entry_count: u32,
}

impl ManifestHeader {
    /// Reads the header fields without validating them.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(DecodeError::Truncated { needed: HEADER_LEN, available: bytes.len() });
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let format_version = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        let entry_count = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        Ok(Self { magic, format_version, entry_count })
    }
}

/// A record skipped during decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordNotice {
    /// The record was complete but its tag was not `"TITLE\0"`.
    TagMismatch {
        /// Zero-based record index within the manifest.
        index: u32,
        /// Tag bytes found in place of `"TITLE\0"`.
        found: [u8; 6],
    },
}

impl fmt::Display for RecordNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TagMismatch { index, found } => {
                write!(f, "record {index}: TITLE magic not found (got {}), skipped", escape(found))
            }
        }
    }
}

/// Decoded manifest contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Record layout the manifest was written with.
    pub version: FormatVersion,
    /// Record count declared by the header.
    pub declared: u32,
    /// Entries that passed the tag check, in manifest order.
    pub entries: Vec<CanonicalEntry>,
    /// One notice per skipped record.
    pub notices: Vec<RecordNotice>,
    /// Bytes after the last declared record (ignored).
    pub trailing_bytes: usize,
}

impl Manifest {
    /// Decodes a complete manifest image.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = ManifestHeader::parse(bytes)?;
        if header.magic != MAGIC {
            return Err(DecodeError::BadMagic { found: header.magic });
        }
        let version = FormatVersion::from_raw(header.format_version).ok_or(
            DecodeError::UnsupportedVersion {
                actual: header.format_version,
                max_known: FormatVersion::MAX_KNOWN,
            },
        )?;

        let record_size = version.record_size();
        let needed = usize::try_from(header.entry_count)
            .ok()
            .and_then(|count| count.checked_mul(record_size))
            .and_then(|len| len.checked_add(HEADER_LEN))
            .unwrap_or(usize::MAX);
        if bytes.len() < needed {
            return Err(DecodeError::Truncated { needed, available: bytes.len() });
        }
        debug!(
            "manifest {version}: {} records of {record_size:#x} bytes",
            header.entry_count
        );

        let records = &bytes[HEADER_LEN..needed];
        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut notices = Vec::new();
        for (index, chunk) in (0u32..).zip(records.chunks_exact(record_size)) {
            let raw = RawRecord::parse(version, chunk)
                .ok_or(DecodeError::Truncated { needed, available: bytes.len() })?;
            if !raw.has_valid_tag() {
                let notice = RecordNotice::TagMismatch { index, found: *raw.tag() };
                warn!("{notice}");
                notices.push(notice);
                continue;
            }
            entries.push(raw.into_canonical());
        }

        let trailing_bytes = bytes.len() - needed;
        if trailing_bytes > 0 {
            debug!("ignoring {trailing_bytes} bytes after the last declared record");
        }

        Ok(Self { version, declared: header.entry_count, entries, notices, trailing_bytes })
    }
}

/// Decodes `bytes` into the canonical entry sequence.
pub fn decode(bytes: &[u8]) -> Result<Vec<CanonicalEntry>> {
    Manifest::parse(bytes).map(|manifest| manifest.entries)
}

fn escape(bytes: &[u8]) -> String {
    bytes.iter().flat_map(|b| core::ascii::escape_default(*b)).map(char::from).collect()
}
