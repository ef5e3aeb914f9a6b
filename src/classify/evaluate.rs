//! Ground-truth resolution and per-query evaluation.
//!
//! Reads that come from simulators or relabeled reference slices usually
//! carry their origin in the header: an accession, a `taxid|NNN` tag, or
//! the full reference name. Resolution tries these in order and climbs to
//! the next ranked ancestor; failure is not an error, it just leaves the
//! truth unknown.

use crate::index::Database;
use crate::taxonomy::TaxonId;

use super::Classification;
use super::SequenceQuery;
use super::options::EvaluationOptions;
use super::statistics::ClassificationStatistics;

/// First whitespace-delimited token of a header.
fn header_token(header: &str) -> &str {
    header.split_whitespace().next().unwrap_or(header)
}

/// Extract an embedded decimal taxid, e.g. `taxid|1234`, `kraken:taxid|1234`
/// or `taxid=1234`.
fn extract_taxid(header: &str) -> Option<i64> {
    let pos = header.find("taxid")?;
    let rest = &header[pos + "taxid".len()..];
    let rest = rest.strip_prefix(['|', '=', ':'])?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Resolve the taxon a query claims to originate from.
pub fn ground_truth(db: &Database, header: &str) -> Option<TaxonId> {
    let token = header_token(header);

    // accession-shaped segments of the first token, e.g. "ref|NC_0001.1|"
    for segment in token.split('|') {
        if segment.is_empty() {
            continue;
        }
        if let Some(tax) = db.taxon_with_name(segment) {
            return db.next_ranked_ancestor(tax);
        }
        if let Some(tax) = db.taxon_with_similar_name(segment) {
            return db.next_ranked_ancestor(tax);
        }
    }

    if let Some(taxid) = extract_taxid(header) {
        if let Some(tax) = db.taxon_with_id(taxid) {
            return db.next_ranked_ancestor(tax);
        }
    }

    // last resort: the entire header as a sequence name
    if let Some(tax) = db.taxon_with_name(header) {
        return db.next_ranked_ancestor(tax);
    }

    None
}

/// Per-rank database-coverage confusion counts along the truth lineage.
fn update_coverage_statistics(
    db: &Database,
    cls: &Classification,
    stats: &mut ClassificationStatistics,
) {
    let Some(truth) = cls.ground_truth else {
        return;
    };
    let best_rank = cls.best.map(|b| db.rank(b));
    for tax in db.ranks(truth).into_iter().flatten() {
        let r = db.rank(tax);
        let classified_at_rank = matches!(best_rank, Some(br) if br <= r);
        if db.covers(tax) {
            if classified_at_rank {
                stats.count_coverage_true_pos(r);
            } else {
                stats.count_coverage_false_neg(r);
            }
        } else if classified_at_rank {
            stats.count_coverage_false_pos(r);
        } else {
            stats.count_coverage_true_neg(r);
        }
    }
}

/// Evaluate one query's classification against its (optional) ground truth
/// and record the outcome.
pub fn evaluate_classification(
    db: &Database,
    opt: &EvaluationOptions,
    query: &SequenceQuery,
    cls: &mut Classification,
    stats: &mut ClassificationStatistics,
) {
    if opt.wants_ground_truth() {
        cls.ground_truth = ground_truth(db, &query.header);
    }

    if opt.precision {
        let lca = match (cls.best, cls.ground_truth) {
            (Some(best), Some(truth)) => db.ranked_lca(best, truth),
            _ => None,
        };
        stats.assign_known_correct(
            cls.best.map(|b| db.rank(b)),
            cls.ground_truth.map(|g| db.rank(g)),
            lca.map(|l| db.rank(l)),
        );

        if opt.taxon_coverage {
            update_coverage_statistics(db, cls, stats);
        }
    } else {
        stats.assign(cls.best.map(|b| db.rank(b)));
    }
}
