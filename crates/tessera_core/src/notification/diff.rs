//! Positional diffs between two orderings of a collection.
//!
//! Results hold each object at most once, so their diff keeps the longest
//! run of objects whose relative order is unchanged (a longest increasing
//! subsequence over old positions) and reports everything else as
//! deletions and insertions. Lists may repeat elements and use a longest
//! common subsequence instead. An element replaced in place is reported as
//! a modification only when the caller says the two elements share an
//! identity (a primitive slot rewritten); a different object at the same
//! position is a deletion plus an insertion.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use super::ChangeSet;

/// Largest `old.len() * new.len()` table the list diff will build.
const LCS_CELL_LIMIT: usize = 4 * 1024 * 1024;

/// Diffs two orderings of distinct keys.
///
/// `modified` reports whether a key present in both orderings changed.
pub fn diff_unique<K, F>(old: &[K], new: &[K], modified: F) -> ChangeSet
where
    K: Eq + Hash,
    F: Fn(&K) -> bool,
{
    let old_pos: HashMap<&K, usize> = old.iter().enumerate().map(|(i, k)| (k, i)).collect();
    let candidates: Vec<(usize, usize)> = new
        .iter()
        .enumerate()
        .filter_map(|(j, k)| old_pos.get(k).map(|&i| (i, j)))
        .collect();
    let kept = longest_increasing(&candidates);
    build(old.len(), new.len(), &kept, |_, j| modified(&new[j]), |_| false)
}

/// Diffs two sequences that may contain repeated elements. Every element
/// replaced at the same position is reported as a modification.
///
/// `modified` reports whether the element at a new position changed in
/// place (for example the linked object's row was written).
pub fn diff_sequence<T, F>(old: &[T], new: &[T], modified: F) -> ChangeSet
where
    T: PartialEq,
    F: Fn(usize) -> bool,
{
    diff_sequence_by(old, new, modified, |_, _| true)
}

/// Like [`diff_sequence`], but an element replaced at the same position
/// counts as a modification only when `same_slot(old, new)` holds.
/// Otherwise the replacement is a deletion plus an insertion.
pub fn diff_sequence_by<T, F, S>(old: &[T], new: &[T], modified: F, same_slot: S) -> ChangeSet
where
    T: PartialEq,
    F: Fn(usize) -> bool,
    S: Fn(&T, &T) -> bool,
{
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut kept: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();
    if old_mid.len().saturating_mul(new_mid.len()) <= LCS_CELL_LIMIT {
        kept.extend(
            lcs(old_mid, new_mid)
                .into_iter()
                .map(|(i, j)| (i + prefix, j + prefix)),
        );
    }
    kept.extend((0..suffix).map(|s| (old.len() - suffix + s, new.len() - suffix + s)));
    build(old.len(), new.len(), &kept, |_, j| modified(j), |p| {
        same_slot(&old[p], &new[p])
    })
}

/// `replaced_in_place(p)` decides whether a deletion and an insertion at the
/// same position `p` collapse into one modification.
fn build<F, R>(
    old_len: usize,
    new_len: usize,
    kept: &[(usize, usize)],
    modified: F,
    replaced_in_place: R,
) -> ChangeSet
where
    F: Fn(usize, usize) -> bool,
    R: Fn(usize) -> bool,
{
    let kept_old: BTreeSet<usize> = kept.iter().map(|&(i, _)| i).collect();
    let kept_new: BTreeSet<usize> = kept.iter().map(|&(_, j)| j).collect();
    let mut changes = ChangeSet {
        deletions: (0..old_len).filter(|i| !kept_old.contains(i)).collect(),
        insertions: (0..new_len).filter(|j| !kept_new.contains(j)).collect(),
        ..ChangeSet::default()
    };
    let mut modified_pairs: Vec<(usize, usize)> =
        kept.iter().copied().filter(|&(i, j)| modified(i, j)).collect();

    let deleted: BTreeSet<usize> = changes.deletions.iter().copied().collect();
    let replaced: BTreeSet<usize> = changes
        .insertions
        .iter()
        .copied()
        .filter(|&j| deleted.contains(&j) && replaced_in_place(j))
        .collect();
    changes.deletions.retain(|i| !replaced.contains(i));
    changes.insertions.retain(|j| !replaced.contains(j));
    modified_pairs.extend(replaced.iter().map(|&p| (p, p)));

    modified_pairs.sort_by_key(|&(_, j)| j);
    changes.modifications = modified_pairs.iter().map(|&(_, j)| j).collect();
    let mut old_mods: Vec<usize> = modified_pairs.iter().map(|&(i, _)| i).collect();
    old_mods.sort_unstable();
    changes.old_modifications = old_mods;
    changes
}

/// Longest subsequence of `pairs` (ordered by new position) whose old
/// positions strictly increase. Patience sorting, `O(n log n)`.
fn longest_increasing(pairs: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; pairs.len()];
    for (idx, &(old, _)) in pairs.iter().enumerate() {
        let pos = tails.partition_point(|&t| pairs[t].0 < old);
        if pos > 0 {
            prev[idx] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(idx);
        } else {
            tails[pos] = idx;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(idx) = cursor {
        out.push(pairs[idx]);
        cursor = prev[idx];
    }
    out.reverse();
    out
}

fn lcs<T: PartialEq>(a: &[T], b: &[T]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if a[i] == b[j] {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            out.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_is_an_insertion() {
        let c = diff_unique(&[1, 2], &[1, 2, 3], |_| false);
        assert_eq!(c.insertions, vec![2]);
        assert!(c.deletions.is_empty());
    }

    #[test]
    fn removal_uses_old_positions() {
        let c = diff_unique(&[1, 2, 3], &[1, 3], |_| false);
        assert_eq!(c.deletions, vec![1]);
        assert!(c.insertions.is_empty());
    }

    #[test]
    fn reorder_is_delete_plus_insert() {
        let c = diff_unique(&[1, 2, 3], &[3, 1, 2], |_| false);
        assert_eq!(c.deletions, vec![2]);
        assert_eq!(c.insertions, vec![0]);
    }

    #[test]
    fn modifications_report_both_positions() {
        let c = diff_unique(&[1, 2, 3], &[0, 1, 2, 3], |k| *k == 2);
        assert_eq!(c.insertions, vec![0]);
        assert_eq!(c.modifications, vec![2]);
        assert_eq!(c.old_modifications, vec![1]);
    }

    #[test]
    fn in_place_replacement_is_a_modification() {
        let c = diff_sequence(&[1, 2, 3], &[1, 9, 3], |_| false);
        assert!(c.insertions.is_empty());
        assert!(c.deletions.is_empty());
        assert_eq!(c.modifications, vec![1]);
    }

    #[test]
    fn replacement_with_a_different_identity_is_delete_plus_insert() {
        let c = diff_sequence_by(&[1, 2, 3], &[1, 9, 3], |_| false, |_, _| false);
        assert_eq!(c.deletions, vec![1]);
        assert_eq!(c.insertions, vec![1]);
        assert!(c.modifications.is_empty());
        assert!(c.old_modifications.is_empty());
    }

    #[test]
    fn repeated_elements() {
        let c = diff_sequence(&[1, 1, 2], &[1, 2], |_| false);
        assert_eq!(c.deletions, vec![1]);
        assert!(c.insertions.is_empty());
    }

    fn apply(old: &[u8], new: &[u8], c: &ChangeSet) -> bool {
        // Survivors of the old ordering must equal the non-inserted part
        // of the new one.
        let kept_old: Vec<u8> = old
            .iter()
            .enumerate()
            .filter(|(i, _)| !c.deletions.contains(i) && !c.old_modifications.contains(i))
            .map(|(_, v)| *v)
            .collect();
        let kept_new: Vec<u8> = new
            .iter()
            .enumerate()
            .filter(|(j, _)| !c.insertions.contains(j) && !c.modifications.contains(j))
            .map(|(_, v)| *v)
            .collect();
        kept_old == kept_new
            && old.len() - c.deletions.len() == new.len() - c.insertions.len()
    }

    proptest! {
        #[test]
        fn sequence_diff_is_consistent(
            old in proptest::collection::vec(0u8..6, 0..20),
            new in proptest::collection::vec(0u8..6, 0..20),
        ) {
            let c = diff_sequence(&old, &new, |_| false);
            prop_assert!(apply(&old, &new, &c));
        }

        #[test]
        fn unique_diff_is_consistent(
            old in proptest::sample::subsequence((0u16..40).collect::<Vec<_>>(), 0..40),
            new in proptest::sample::subsequence((0u16..40).collect::<Vec<_>>(), 0..40)
                .prop_shuffle(),
        ) {
            let c = diff_unique(&old, &new, |_| false);
            prop_assert_eq!(old.len() - c.deletions.len(), new.len() - c.insertions.len());
            for j in &c.insertions {
                prop_assert!(*j < new.len());
            }
            for i in &c.deletions {
                prop_assert!(*i < old.len());
            }
        }
    }
}
