//! Splitting key lists into upstream-sized batches.

use crate::data::models::ItemId;
use std::collections::HashSet;

/// Both upstreams reject requests for more than 100 items.
pub const MAX_BATCH_SIZE: usize = 100;

/// Split `keys` into consecutive batches of at most [`MAX_BATCH_SIZE`], in order.
pub fn batches(keys: &[ItemId]) -> std::slice::Chunks<'_, ItemId> {
    keys.chunks(MAX_BATCH_SIZE)
}

/// Drop repeated keys, keeping the first occurrence of each.
pub fn dedup_keys(keys: impl IntoIterator<Item = ItemId>) -> Vec<ItemId> {
    let mut seen = HashSet::new();
    keys.into_iter().filter(|key| seen.insert(*key)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_into_capped_batches() {
        let keys: Vec<ItemId> = (1..=250).collect();
        let sizes: Vec<usize> = batches(&keys).map(<[ItemId]>::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn batches_preserve_order() {
        let keys: Vec<ItemId> = (1..=201).rev().collect();
        let flattened: Vec<ItemId> = batches(&keys).flatten().copied().collect();
        assert_eq!(flattened, keys);
    }

    #[test]
    fn empty_input_has_no_batches() {
        assert_eq!(batches(&[]).count(), 0);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        assert_eq!(dedup_keys([3, 1, 3, 2, 1]), vec![3, 1, 2]);
    }
}
