//! To-many set reconciliation: merge, subtract and replace against the stored member set.

use crate::error::HelperError;
use crate::model::Identifier;
use crate::store::RelatedSet;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    /// Add `S - E`.
    Merge,
    /// Remove `S ∩ E`.
    Subtract,
    /// Add `S - E`, remove `E - S`.
    Replace,
}

/// Members to add and remove, in submission order (removals in stored order).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub add: Vec<Identifier>,
    pub remove: Vec<Identifier>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Computes the delta of `op` for submitted `submitted` against existing `existing`.
pub fn plan(op: SetOp, existing: &BTreeSet<Identifier>, submitted: &[Identifier]) -> Delta {
    let mut seen = BTreeSet::new();
    let submitted: Vec<&Identifier> = submitted.iter().filter(|id| seen.insert(*id)).collect();

    let missing = || {
        submitted
            .iter()
            .filter(|id| !existing.contains(**id))
            .map(|id| (*id).clone())
            .collect::<Vec<_>>()
    };
    match op {
        SetOp::Merge => Delta {
            add: missing(),
            remove: Vec::new(),
        },
        SetOp::Subtract => Delta {
            add: Vec::new(),
            remove: submitted
                .iter()
                .filter(|id| existing.contains(**id))
                .map(|id| (*id).clone())
                .collect(),
        },
        SetOp::Replace => Delta {
            add: missing(),
            remove: existing.iter().filter(|id| !seen.contains(id)).cloned().collect(),
        },
    }
}

/// Locks the parent, reads the current members, then adds before it removes.
/// Members for which `keep` is false are skipped. Returns what was actually applied.
pub async fn apply<Tx, S, F>(
    set: &S,
    tx: &mut Tx,
    op: SetOp,
    submitted: &[Identifier],
    keep: F,
) -> Result<Delta, HelperError>
where
    Tx: Send,
    S: RelatedSet<Tx> + ?Sized,
    F: Fn(&Identifier) -> bool,
{
    set.lock(tx).await?;
    let existing = set.current(tx).await?;
    let planned = plan(op, &existing, submitted);

    let mut applied = Delta::default();
    for member in planned.add.into_iter().filter(|m| keep(m)) {
        set.add(tx, &member).await?;
        applied.add.push(member);
    }
    for member in planned.remove.into_iter().filter(|m| keep(m)) {
        set.remove(tx, &member).await?;
        applied.remove.push(member);
    }
    tracing::debug!(
        op = ?op,
        added = applied.add.len(),
        removed = applied.remove.len(),
        "reconciled relationship"
    );
    Ok(applied)
}
