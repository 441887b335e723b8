use crate::error::BackendError;
use crate::models::{IndexHit, Passage, QueryFilters};

/// Persistent passage store with metadata-filtered nearest-neighbour search.
///
/// Implementations take `&self` and must tolerate concurrent writers; no
/// isolation between an upsert and a running query is promised.
pub trait VectorIndex {
    /// Inserts or replaces passages by id. Ids must be unique within a call.
    fn upsert(&self, passages: &[Passage]) -> Result<(), BackendError>;

    /// Up to `k` hits ranked by cosine similarity, restricted to passages
    /// whose metadata matches every predicate in `filters`.
    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<IndexHit>, BackendError>;
}

pub(crate) fn ensure_unique_ids(passages: &[Passage]) -> Result<(), BackendError> {
    let mut seen = std::collections::HashSet::new();
    for passage in passages {
        if !seen.insert(passage.id.as_str()) {
            return Err(BackendError::Request(format!(
                "duplicate passage id in upsert: {}",
                passage.id
            )));
        }
    }
    Ok(())
}
