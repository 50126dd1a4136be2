//! Dirty key bookkeeping

use std::collections::HashSet;

/// Keys whose durable copy is stale. Marking is idempotent.
#[derive(Debug, Default)]
pub struct DirtySet {
    keys: HashSet<String>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was not already pending.
    pub fn mark(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Hand off everything pending and start over with an empty set.
    pub fn drain(&mut self) -> FlushBatch {
        FlushBatch {
            keys: std::mem::take(&mut self.keys).into_iter().collect(),
        }
    }
}

/// Snapshot of the dirty set taken for one flush cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushBatch {
    keys: Vec<String>,
}

impl FlushBatch {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Consecutive slices of at most `size` keys, in batch order.
    pub fn sub_batches(&self, size: usize) -> std::slice::Chunks<'_, String> {
        self.keys.chunks(size.max(1))
    }
}

impl From<Vec<String>> for FlushBatch {
    fn from(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_collapses_duplicates() {
        let mut dirty = DirtySet::new();
        assert!(dirty.mark("players:1".into()));
        assert!(!dirty.mark("players:1".into()));
        assert!(dirty.mark("players:2".into()));
        assert_eq!(dirty.len(), 2);
    }

    #[test]
    fn test_drain_empties_the_set() {
        let mut dirty = DirtySet::new();
        dirty.mark("players:1".into());
        dirty.mark("items:9".into());

        let batch = dirty.drain();
        assert_eq!(batch.len(), 2);
        assert!(dirty.is_empty());

        dirty.mark("players:1".into());
        assert_eq!(dirty.len(), 1);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_sub_batch_sizes() {
        let keys: Vec<String> = (0..2500).map(|i| format!("players:{}", i)).collect();
        let batch = FlushBatch::from(keys);

        let sizes: Vec<usize> = batch.sub_batches(1024).map(|chunk| chunk.len()).collect();
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn test_sub_batches_keep_order() {
        let batch = FlushBatch::from(vec!["a:1".to_string(), "a:2".into(), "a:3".into()]);
        let chunks: Vec<&[String]> = batch.sub_batches(2).collect();
        assert_eq!(chunks[0], &["a:1".to_string(), "a:2".to_string()][..]);
        assert_eq!(chunks[1], &["a:3".to_string()][..]);
    }
}
