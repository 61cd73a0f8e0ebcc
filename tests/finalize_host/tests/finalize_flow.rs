// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Integration tests for reconcile + execute + manifest lifecycle
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//!
//! TEST_SCOPE:
//!   - Reconcile is a set-union membership test and is idempotent
//!   - A fatal transaction failure halts the batch and keeps the manifest
//!   - Seed failures stay local and the manifest is still removed
//!   - Dry runs leave manifest and registry untouched
//!   - A rerun after a halted batch resumes where it stopped
//!   - v1 key material lands in the committed ticket

use std::collections::HashSet;
use std::fs;

use cifinish::ticket::key_from_ticket;
use cifinish::{
    reconcile, run_pass, Action, FileManifest, FormatVersion, HostRegistry, LegacyKey,
    PassOptions, RegistrarError, TitleId, TransactionStage,
};
use finalize_host::{entry, ticket_template, v1_entry, ManifestBuilder};
use proptest::prelude::*;

proptest! {
    #[test]
    fn reconcile_is_set_union_membership(
        ids in prop::collection::hash_set(any::<u64>(), 0..16),
        ticket_mask in any::<u16>(),
        title_mask in any::<u16>(),
    ) {
        let entries: Vec<_> = ids.iter().map(|id| entry(*id, None)).collect();
        let mut tickets = HashSet::new();
        let mut titles = HashSet::new();
        for (i, id) in ids.iter().enumerate() {
            if ticket_mask & (1 << i) != 0 { tickets.insert(TitleId(*id)); }
            if title_mask & (1 << i) != 0 { titles.insert(TitleId(*id)); }
        }

        let actions = reconcile(&entries, &tickets, &titles);
        prop_assert_eq!(actions.len(), entries.len());
        for (action, e) in actions.iter().zip(&entries) {
            prop_assert_eq!(action.title_id(), e.title_id);
            let known = tickets.contains(&e.title_id) || titles.contains(&e.title_id);
            prop_assert_eq!(action.is_act(), !known);
        }

        // Registering every Act entry turns a second reconcile into all skips.
        let mut after = tickets.clone();
        after.extend(actions.iter().filter(|a| a.is_act()).map(Action::title_id));
        prop_assert!(reconcile(&entries, &after, &titles).iter().all(|a| !a.is_act()));
    }
}

#[test]
fn write_failure_on_second_of_three_halts_and_keeps_manifest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    let bytes = ManifestBuilder::new(FormatVersion::V3)
        .entries(&[entry(0xA1, None), entry(0xA2, None), entry(0xA3, None)])
        .build();
    fs::write(&path, &bytes).expect("write manifest");

    let registry = HostRegistry::new();
    registry.fail_write_for(TitleId(0xA2), 0xD8E0_7001);
    let mut source = FileManifest::new(&path);
    let report = run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("pass");

    assert!(report.halted());
    assert!(!report.manifest_deleted);
    assert_eq!(fs::read(&path).expect("manifest kept"), bytes);
    assert_eq!(registry.committed(), vec![TitleId(0xA1)]);
    assert_eq!(registry.aborted(), 1);
    assert!(!registry.has_ticket(TitleId(0xA3)));

    let outcome = report.outcome.expect("executed");
    let halted = outcome.halted_at.expect("halted");
    assert_eq!(halted.stage, TransactionStage::Write);
    assert_eq!(halted.title_id, TitleId(0xA2));
    assert_eq!(halted.source, RegistrarError::Code(0xD8E0_7001));
}

#[test]
fn rerun_after_halt_finishes_the_rest() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(
        &path,
        ManifestBuilder::new(FormatVersion::V2)
            .entries(&[entry(1, None), entry(2, None), entry(3, None)])
            .build(),
    )
    .expect("write manifest");

    let registry = HostRegistry::new();
    registry.fail_begin_after(1, 0xC8A0_8BF0);
    let mut source = FileManifest::new(&path);
    let first = run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("first pass");
    assert!(first.halted());
    assert!(path.exists());

    registry.fail_begin_after(usize::MAX, 0);
    let second = run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("second pass");
    assert!(!second.halted());
    assert!(second.manifest_deleted);
    assert_eq!(second.summary().skip, 1);
    assert_eq!(registry.committed(), vec![TitleId(1), TitleId(2), TitleId(3)]);
    assert!(!path.exists());
}

#[test]
fn seed_failure_is_local_and_manifest_removed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(
        &path,
        ManifestBuilder::new(FormatVersion::V1)
            .entries(&[entry(0xB1, Some([1; 16])), entry(0xB2, Some([2; 16])), entry(0xB3, None)])
            .build(),
    )
    .expect("write manifest");

    let registry = HostRegistry::new();
    registry.fail_seed_for(TitleId(0xB1), 0xD900_4676);
    let mut source = FileManifest::new(&path);
    let report = run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("pass");

    assert!(report.manifest_deleted);
    assert!(!path.exists());
    let outcome = report.outcome.expect("executed");
    assert!(outcome.is_complete());
    assert_eq!(outcome.completed, vec![TitleId(0xB1), TitleId(0xB2), TitleId(0xB3)]);
    assert_eq!(outcome.seeds_added, vec![TitleId(0xB2)]);
    assert_eq!(outcome.seed_failures, vec![(TitleId(0xB1), RegistrarError::Code(0xD900_4676))]);
    assert_eq!(registry.seed_calls().len(), 2);
}

#[test]
fn already_registered_entries_are_skipped_by_either_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(
        &path,
        ManifestBuilder::new(FormatVersion::V3)
            .entries(&[entry(1, Some([1; 16])), entry(2, None), entry(3, None)])
            .build(),
    )
    .expect("write manifest");

    let registry = HostRegistry::new();
    registry.register_ticket(TitleId(1));
    registry.register_title(TitleId(2));
    let mut source = FileManifest::new(&path);
    let report = run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("pass");

    assert_eq!(registry.committed(), vec![TitleId(3)]);
    assert!(registry.seed_calls().is_empty());
    assert_eq!(report.outcome.expect("executed").skipped, vec![TitleId(1), TitleId(2)]);
}

#[test]
fn dry_run_leaves_everything_in_place() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(&path, ManifestBuilder::new(FormatVersion::V3).entry(entry(5, None)).build())
        .expect("write manifest");

    let registry = HostRegistry::new();
    let mut source = FileManifest::new(&path);
    let report =
        run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions { dry_run: true })
            .expect("pass");

    assert_eq!(report.summary().act, 1);
    assert!(report.outcome.is_none());
    assert!(path.exists());
    assert!(registry.committed().is_empty());
}

#[test]
fn v1_tickets_carry_their_own_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(
        &path,
        ManifestBuilder::new(FormatVersion::V1)
            .entries(&[v1_entry(0xD1, 0, [0x11; 16]), v1_entry(0xD2, 1, [0x22; 16])])
            .build(),
    )
    .expect("write manifest");

    let registry = HostRegistry::new();
    let mut source = FileManifest::new(&path);
    run_pass(&mut source, &registry, &registry, &ticket_template(), PassOptions::default())
        .expect("pass");

    let first = registry.committed_ticket(TitleId(0xD1)).expect("first ticket");
    assert_eq!(key_from_ticket(&first), Some(LegacyKey { common_key_index: 0, title_key: [0x11; 16] }));
    let second = registry.committed_ticket(TitleId(0xD2)).expect("second ticket");
    assert_eq!(key_from_ticket(&second), Some(LegacyKey { common_key_index: 1, title_key: [0x22; 16] }));
}

#[test]
fn seed_only_layouts_keep_the_template_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cifinish.bin");
    fs::write(&path, ManifestBuilder::new(FormatVersion::V3).entry(entry(0xE1, None)).build())
        .expect("write manifest");

    let template = ticket_template();
    let registry = HostRegistry::new();
    let mut source = FileManifest::new(&path);
    run_pass(&mut source, &registry, &registry, &template, PassOptions::default()).expect("pass");

    let blob = registry.committed_ticket(TitleId(0xE1)).expect("ticket");
    assert_eq!(key_from_ticket(&blob), key_from_ticket(template.as_bytes()));
}
