//! The `Store` handle: a typed interface over the pooled connection (§4.1).

use crate::pool::PgPool;

/// Deduplicates parallel arrays by a key extracted from each row, keeping
/// either the first or last occurrence of each key (§4.1 "de-duplicate
/// within a batch"). `rows` is a list of (key, row-index) pairs already
/// paired with their position in the original arrays; callers rebuild the
/// parallel arrays from the surviving indices.
pub(crate) fn dedup_indices_first_wins<K: Eq + std::hash::Hash + Clone>(keys: &[K]) -> Vec<usize> {
    let mut seen = std::collections::HashSet::new();
    let mut indices = Vec::with_capacity(keys.len());
    for (i, k) in keys.iter().enumerate() {
        if seen.insert(k.clone()) {
            indices.push(i);
        }
    }
    indices
}

/// Same as [`dedup_indices_first_wins`] but keeps the *last* occurrence of
/// each key, used for upsert-style batches (§4.1 "last-wins for upserts").
pub(crate) fn dedup_indices_last_wins<K: Eq + std::hash::Hash + Clone>(keys: &[K]) -> Vec<usize> {
    let mut last_index = std::collections::HashMap::new();
    for (i, k) in keys.iter().enumerate() {
        last_index.insert(k.clone(), i);
    }
    let mut indices: Vec<usize> = last_index.into_values().collect();
    indices.sort_unstable();
    indices
}

/// Handle onto the shared content store. Cloning is cheap: it clones the
/// underlying `sqlx::Pool`, which is itself an `Arc`.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Store { pool }
    }

    /// Read-only access to the pool, for callers that need a raw connection
    /// (migrations, ad hoc diagnostics).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wins_keeps_earliest_occurrence() {
        let keys = vec!["a", "b", "a", "c", "b"];
        let indices = dedup_indices_first_wins(&keys);
        assert_eq!(indices, vec![0, 1, 3]);
    }

    #[test]
    fn last_wins_keeps_latest_occurrence() {
        let keys = vec!["a", "b", "a", "c", "b"];
        let indices = dedup_indices_last_wins(&keys);
        assert_eq!(indices, vec![2, 3, 4]);
    }
}
