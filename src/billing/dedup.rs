//! Merge and rank normalized purchase records across sources.
//!
//! The interesting invariant is determinism: the same multiset of records must
//! produce the same output sequence no matter which source contributed which
//! record or in what order. Ordering is therefore total — priority, then
//! recency, then the token itself as a last-resort key.

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::billing::record::PurchaseRecord;

/// True when `candidate` should replace `incumbent` for the same token:
/// strictly higher priority wins; on a priority tie the more recent
/// transaction wins; on an exact tie the incumbent (first seen) stays.
fn supersedes(candidate: &PurchaseRecord, incumbent: &PurchaseRecord) -> bool {
    match candidate
        .state
        .priority()
        .cmp(&incumbent.state.priority())
    {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => candidate.transaction_date_ms > incumbent.transaction_date_ms,
    }
}

fn rank(a: &PurchaseRecord, b: &PurchaseRecord) -> Ordering {
    b.state
        .priority()
        .cmp(&a.state.priority())
        .then(b.transaction_date_ms.cmp(&a.transaction_date_ms))
        .then(a.purchase_token.cmp(&b.purchase_token))
}

/// Collapse records sharing a purchase token and sort the survivors by
/// (priority desc, transaction date desc, token asc). Position 0 is "the"
/// legacy purchase for the user, if any.
pub fn dedupe_and_rank(records: Vec<PurchaseRecord>) -> Vec<PurchaseRecord> {
    let mut by_token: IndexMap<String, PurchaseRecord> = IndexMap::new();
    for rec in records {
        match by_token.get_mut(&rec.purchase_token) {
            Some(existing) => {
                if supersedes(&rec, existing) {
                    *existing = rec;
                }
            }
            None => {
                by_token.insert(rec.purchase_token.clone(), rec);
            }
        }
    }

    let mut out: Vec<PurchaseRecord> = by_token.into_values().collect();
    out.sort_by(rank);
    out
}
