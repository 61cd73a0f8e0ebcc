// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Console rendering for the finalize tool.

use crate::execute::BatchOutcome;
use crate::pass::PassReport;
use crate::reconcile::Action;

/// Banner printed when the finalizer starts.
pub fn banner() -> String {
    format!("cifinish-finalize v{}", env!("CARGO_PKG_VERSION"))
}

/// Returns a short usage description.
pub fn help() -> &'static str {
    "cifinish-finalize registers titles pending in cifinish.bin. Usage: cifinish-finalize [options] <plan|run>"
}

/// One line per action, in manifest order.
pub fn render_actions(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .map(|action| match action {
            Action::Skip { title_id } => format!("skip     {title_id} (already registered)"),
            Action::Act(pending) if pending.seed.is_some() => {
                format!("finalize {} + seed", pending.title_id)
            }
            Action::Act(pending) => format!("finalize {}", pending.title_id),
        })
        .collect()
}

/// Closing summary for a batch.
pub fn render_outcome(outcome: &BatchOutcome) -> String {
    let mut line = format!(
        "{} finalized, {} skipped, {} seeds installed",
        outcome.completed.len(),
        outcome.skipped.len(),
        outcome.seeds_added.len()
    );
    if !outcome.seed_failures.is_empty() {
        line.push_str(&format!(", {} seed installs failed", outcome.seed_failures.len()));
    }
    if let Some(halted) = &outcome.halted_at {
        line.push_str(&format!("; halted: {halted}"));
    }
    line
}

/// Full report for a pass, notices first.
pub fn render_report(report: &PassReport) -> String {
    let mut lines: Vec<String> = report.notices.iter().map(|notice| notice.to_string()).collect();
    lines.extend(render_actions(&report.actions));
    match &report.outcome {
        Some(outcome) => lines.push(render_outcome(outcome)),
        None => {
            let summary = report.summary();
            lines.push(format!("dry run: {} to finalize, {} already present", summary.act, summary.skip));
        }
    }
    if report.manifest_deleted {
        lines.push("manifest removed".to_string());
    }
    lines.join("\n")
}
