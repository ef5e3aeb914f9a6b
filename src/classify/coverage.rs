//! Coverage filter: drop targets that attracted hits over too small a
//! fraction of their windows.
//!
//! Coverage of a target is the fraction of its windows hit by at least one
//! query (set semantics). Targets are walked in ascending coverage order and
//! removed until the cumulative coverage exceeds `percentile` of the total;
//! the target that crosses the cutoff is kept.

use std::collections::HashSet;

use crate::index::{Database, TargetId, WindowId};

use super::matches_per_target::MatchesPerTarget;

/// Remove low-coverage targets from the hit index.
///
/// `percentile <= 0` and an empty index are no-ops.
pub fn filter_targets_by_coverage(
    db: &Database,
    tgt_matches: &mut MatchesPerTarget,
    percentile: f32,
) {
    if percentile <= 0.0 || tgt_matches.is_empty() {
        return;
    }

    let mut coverages: Vec<(TargetId, f32)> = Vec::with_capacity(tgt_matches.len());
    let mut sum = 0.0f32;

    for (tgt, entries) in tgt_matches.iter() {
        let windows = db.windows(tgt);
        if windows == 0 {
            coverages.push((tgt, 0.0));
            continue;
        }
        let mut hit_windows: HashSet<WindowId> = HashSet::new();
        for entry in entries {
            for wh in &entry.window_hits {
                hit_windows.insert(wh.win);
            }
        }
        let cov = hit_windows.len() as f32 / windows as f32;
        sum += cov;
        coverages.push((tgt, cov));
    }

    // ascending coverage; equal coverages resolve by target id so the
    // filter is deterministic
    coverages.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let cutoff = percentile * sum;
    let mut part_sum = 0.0f32;
    for (tgt, cov) in coverages {
        part_sum += cov;
        if part_sum > cutoff {
            break;
        }
        tgt_matches.erase(tgt);
    }
}
