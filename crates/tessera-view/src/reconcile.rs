#![forbid(unsafe_code)]

//! Keyed list reconciliation.
//!
//! [`reconcile`] computes an [`EditScript`] that turns one ordered
//! collection into another, matching items across the two snapshots with a
//! caller-supplied key function. Items keep their identity across position
//! changes, so an item whose key and content are unchanged is never
//! reported, no matter where it moved.
//!
//! # Script semantics
//!
//! Ops are applied in order to a live sequence that starts equal to
//! `previous`. Every index refers to the live sequence at the moment the op
//! is applied, including items that are still waiting for their `Remove`:
//!
//! | Op | Effect on the live sequence |
//! |----|-----------------------------|
//! | `Insert { index, item }` | insert `item` at `index` |
//! | `Move { key, to }` | take the item with `key` out, reinsert it at `to` |
//! | `Update { key, item }` | replace the content of the item with `key` |
//! | `Remove { key }` | drop the item with `key` |
//!
//! All inserts, moves and updates come first, in `next` order. Removes come
//! last, in reverse order of their position in `previous`.
//!
//! # Move minimisation
//!
//! Items whose relative order is preserved form a longest increasing
//! subsequence of their old positions. Those items never move; every other
//! surviving item is moved directly behind its predecessor in `next`. A
//! plain index shift caused by an insert or a removal is not a move.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Duplicate key in `next` | `DuplicateKeyError` with `KeySide::Next` |
//! | Duplicate key in `previous` | `DuplicateKeyError` with `KeySide::Previous` |

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use crate::binding::Identity;

/// One step of an edit script.
#[derive(Debug, Clone)]
pub enum EditOp<T, K> {
    Insert { index: usize, item: T },
    Move { key: K, to: usize },
    Remove { key: K },
    Update { key: K, item: T },
}

impl<T, K> EditOp<T, K> {
    /// The key this op refers to, if it names one.
    pub fn key(&self) -> Option<&K> {
        match self {
            Self::Insert { .. } => None,
            Self::Move { key, .. } | Self::Remove { key } | Self::Update { key, .. } => Some(key),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Move { .. } => "move",
            Self::Remove { .. } => "remove",
            Self::Update { .. } => "update",
        }
    }
}

/// Op counts of an [`EditScript`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditCounts {
    pub inserts: usize,
    pub moves: usize,
    pub removes: usize,
    pub updates: usize,
}

/// Ordered list of edits produced by [`reconcile`].
#[derive(Debug, Clone)]
pub struct EditScript<T, K> {
    ops: Vec<EditOp<T, K>>,
}

impl<T, K> Default for EditScript<T, K> {
    fn default() -> Self {
        Self { ops: Vec::new() }
    }
}

impl<T, K> EditScript<T, K> {
    #[must_use]
    pub fn ops(&self) -> &[EditOp<T, K>] {
        &self.ops
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[must_use]
    pub fn counts(&self) -> EditCounts {
        let mut counts = EditCounts::default();
        for op in &self.ops {
            match op {
                EditOp::Insert { .. } => counts.inserts += 1,
                EditOp::Move { .. } => counts.moves += 1,
                EditOp::Remove { .. } => counts.removes += 1,
                EditOp::Update { .. } => counts.updates += 1,
            }
        }
        counts
    }

    pub fn into_ops(self) -> Vec<EditOp<T, K>> {
        self.ops
    }
}

impl<T: Clone, K: Eq + Clone> EditScript<T, K> {
    /// Apply the script to `live`, which must hold the `previous` snapshot
    /// the script was computed from.
    pub fn apply<F>(&self, live: &mut Vec<T>, key: F) -> Result<(), ApplyError<K>>
    where
        F: Fn(&T) -> K,
    {
        let find = |live: &[T], k: &K| {
            live.iter()
                .position(|item| key(item) == *k)
                .ok_or_else(|| ApplyError::MissingKey(k.clone()))
        };
        for op in &self.ops {
            match op {
                EditOp::Insert { index, item } => {
                    if *index > live.len() {
                        return Err(ApplyError::IndexOutOfBounds {
                            index: *index,
                            len: live.len(),
                        });
                    }
                    live.insert(*index, item.clone());
                }
                EditOp::Move { key: k, to } => {
                    let from = find(live, k)?;
                    let item = live.remove(from);
                    if *to > live.len() {
                        return Err(ApplyError::IndexOutOfBounds {
                            index: *to,
                            len: live.len(),
                        });
                    }
                    live.insert(*to, item);
                }
                EditOp::Update { key: k, item } => {
                    let at = find(live, k)?;
                    live[at] = item.clone();
                }
                EditOp::Remove { key: k } => {
                    let at = find(live, k)?;
                    live.remove(at);
                }
            }
        }
        Ok(())
    }
}

/// Which snapshot held the duplicate key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySide {
    Previous,
    Next,
}

/// Two items of one snapshot produced the same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateKeyError<K> {
    pub key: K,
    pub side: KeySide,
}

impl<K: fmt::Debug> fmt::Display for DuplicateKeyError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.side {
            KeySide::Previous => "previous",
            KeySide::Next => "next",
        };
        write!(f, "duplicate key {:?} in {side} collection", self.key)
    }
}

impl<K: fmt::Debug> std::error::Error for DuplicateKeyError<K> {}

/// A script did not fit the sequence it was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError<K> {
    MissingKey(K),
    IndexOutOfBounds { index: usize, len: usize },
}

impl<K: fmt::Debug> fmt::Display for ApplyError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey(key) => write!(f, "no live item with key {key:?}"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
        }
    }
}

impl<K: fmt::Debug> std::error::Error for ApplyError<K> {}

/// Compute the edit script turning `previous` into `next`.
///
/// # Example
///
/// ```
/// use tessera_view::reconcile::{reconcile, EditOp};
///
/// let previous = [1_i64, 2, 3];
/// let next = [3_i64, 1, 2, 4];
/// let script = reconcile(&previous, &next, |x| *x).unwrap();
///
/// let mut live = previous.to_vec();
/// script.apply(&mut live, |x| *x).unwrap();
/// assert_eq!(live, next);
/// assert!(matches!(script.ops()[0], EditOp::Move { key: 3, to: 0 }));
/// ```
pub fn reconcile<T, K, F>(
    previous: &[T],
    next: &[T],
    key: F,
) -> Result<EditScript<T, K>, DuplicateKeyError<K>>
where
    T: Identity + Clone,
    K: Hash + Eq + Clone,
    F: Fn(&T) -> K,
{
    let mut old_index: HashMap<K, usize> = HashMap::with_capacity(previous.len());
    let mut old_keys = Vec::with_capacity(previous.len());
    for (i, item) in previous.iter().enumerate() {
        let k = key(item);
        if old_index.insert(k.clone(), i).is_some() {
            return Err(DuplicateKeyError {
                key: k,
                side: KeySide::Previous,
            });
        }
        old_keys.push(k);
    }

    let mut new_keys = Vec::with_capacity(next.len());
    let mut seen: HashSet<K> = HashSet::with_capacity(next.len());
    for item in next {
        let k = key(item);
        if !seen.insert(k.clone()) {
            return Err(DuplicateKeyError {
                key: k,
                side: KeySide::Next,
            });
        }
        new_keys.push(k);
    }

    let mut ops = Vec::new();

    // Old positions of surviving items, in `next` order.
    let survivors: Vec<(usize, usize)> = new_keys
        .iter()
        .enumerate()
        .filter_map(|(i, k)| old_index.get(k).map(|&old| (i, old)))
        .collect();
    let stable_positions = longest_increasing_run(&survivors);
    let mut stable = vec![false; next.len()];
    for &s in &stable_positions {
        stable[survivors[s].0] = true;
    }

    let mut live: Vec<K> = old_keys.clone();
    // Live position of the previously placed `next` item.
    let mut anchor: Option<usize> = None;

    for (i, item) in next.iter().enumerate() {
        let k = &new_keys[i];
        let target = anchor.map_or(0, |a| a + 1);
        match old_index.get(k) {
            None => {
                live.insert(target, k.clone());
                ops.push(EditOp::Insert {
                    index: target,
                    item: item.clone(),
                });
                anchor = Some(target);
            }
            Some(&old) => {
                if stable[i] {
                    // Stable items sit after the anchor; scan forward from it.
                    let at = live[target.min(live.len())..]
                        .iter()
                        .position(|x| x == k)
                        .map(|p| p + target)
                        .or_else(|| live.iter().position(|x| x == k));
                    anchor = at.or(anchor);
                } else if let Some(from) = live.iter().position(|x| x == k) {
                    let moved = live.remove(from);
                    let to = if from < target { target - 1 } else { target };
                    live.insert(to, moved);
                    if from != to {
                        ops.push(EditOp::Move {
                            key: k.clone(),
                            to,
                        });
                    }
                    anchor = Some(to);
                }
                if !previous[old].is_same(item) {
                    ops.push(EditOp::Update {
                        key: k.clone(),
                        item: item.clone(),
                    });
                }
            }
        }
    }

    for k in old_keys.iter().rev() {
        if !seen.contains(k) {
            ops.push(EditOp::Remove { key: k.clone() });
        }
    }

    Ok(EditScript { ops })
}

/// Indices into `pairs` forming a longest run whose second components
/// strictly increase.
fn longest_increasing_run(pairs: &[(usize, usize)]) -> Vec<usize> {
    // tails[len] = index into `pairs` of the smallest tail of a run of length len + 1.
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];
    for (i, &(_, value)) in pairs.iter().enumerate() {
        let slot = tails.partition_point(|&t| pairs[t].1 < value);
        if slot > 0 {
            prev[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = prev[i];
    }
    run.reverse();
    run
}
