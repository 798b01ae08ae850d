use parking_lot::RwLock;

use hnsw_rs::dist::DistDot;
use hnsw_rs::hnsw::Hnsw;

use crate::model::{EmbeddingRecord, MessageId, EMBEDDING_DIM};

/// HNSW parameters mandated by `spec.md` §4.5: enough connectivity and
/// search breadth to make recall failures rare at the scale of a single
/// channel's history.
const MAX_NB_CONNECTION: usize = 64;
const EF_CONSTRUCTION: usize = 400;
const EF_SEARCH: usize = 500;
const MAX_LAYER: usize = 16;

/// A built index over one channel's embeddings. The HNSW graph only ever
/// hands back internal ordinals; `ordinals` is the authoritative mapping
/// back to message identity, appended to in arrival order under the same
/// lock every insertion uses — nothing relies on the graph's internal
/// ordering carrying meaning beyond that lookup (`spec.md` §3 I4).
pub struct SemanticIndex {
    hnsw: Hnsw<'static, f32, DistDot>,
    ordinals: RwLock<Vec<MessageId>>,
}

impl SemanticIndex {
    /// Builds a fresh index from every embedding persisted for a channel at
    /// construction time. `records` must be non-empty; callers skip index
    /// construction entirely for channels with no embeddings yet.
    pub fn build(records: &[EmbeddingRecord]) -> Self {
        let hnsw = Hnsw::<f32, DistDot>::new(
            MAX_NB_CONNECTION,
            records.len().max(1),
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistDot {},
        );

        let data: Vec<(&Vec<f32>, usize)> = records
            .iter()
            .enumerate()
            .map(|(ordinal, r)| (leak_vector(r.vector.clone()), ordinal))
            .collect();
        hnsw.parallel_insert(&data);

        let ordinals = records.iter().map(|r| r.message_id).collect();
        Self {
            hnsw,
            ordinals: RwLock::new(ordinals),
        }
    }

    /// Appends one embedding to the live index under its write lock,
    /// assigning it the next ordinal — never a rebuild. Used whenever a new
    /// embedding is persisted for a channel that already has a built index.
    pub fn insert(&self, message_id: MessageId, vector: Vec<f32>) {
        let mut ordinals = self.ordinals.write();
        let ordinal = ordinals.len();
        self.hnsw.insert((leak_vector(vector), ordinal));
        ordinals.push(message_id);
    }

    /// Returns up to `k` message IDs ordered by decreasing similarity to
    /// `query`. `query` must be `EMBEDDING_DIM`-dimensional; a malformed
    /// query simply yields no results.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<MessageId> {
        if query.len() != EMBEDDING_DIM || k == 0 {
            return Vec::new();
        }
        let ordinals = self.ordinals.read();
        self.hnsw
            .search(query, k, EF_SEARCH)
            .into_iter()
            .filter_map(|neighbour| ordinals.get(neighbour.d_id).copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ordinals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordinals.read().is_empty()
    }
}

/// `hnsw_rs` ties inserted data to the index's own lifetime parameter, so
/// each vector handed to it must outlive the index. The index is never torn
/// down mid-process (only grown via `insert`), so leaking each vector here
/// is bounded by the channel's total embedding count, not by query volume.
fn leak_vector(vector: Vec<f32>) -> &'static Vec<f32> {
    Box::leak(Box::new(vector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snowflake::Snowflake;

    fn rec(id: u64, value: f32) -> EmbeddingRecord {
        EmbeddingRecord {
            channel_id: Snowflake(1),
            message_id: Snowflake(id),
            vector: vec![value; EMBEDDING_DIM],
        }
    }

    #[test]
    fn search_returns_message_ids_not_ordinals() {
        let records = vec![rec(100, 1.0), rec(200, 0.5), rec(300, -1.0)];
        let index = SemanticIndex::build(&records);

        let query = vec![1.0f32; EMBEDDING_DIM];
        let results = index.search(&query, 1);

        assert_eq!(results, vec![Snowflake(100)]);
    }

    #[test]
    fn malformed_query_dimension_yields_no_results() {
        let records = vec![rec(100, 1.0)];
        let index = SemanticIndex::build(&records);
        assert!(index.search(&[0.0, 1.0], 1).is_empty());
    }

    #[test]
    fn len_matches_record_count() {
        let records = vec![rec(100, 1.0), rec(200, 0.5)];
        let index = SemanticIndex::build(&records);
        assert_eq!(index.len(), 2);
        assert!(!index.is_empty());
    }

    #[test]
    fn insert_appends_in_arrival_order_without_rebuilding() {
        let records = vec![rec(100, 1.0)];
        let index = SemanticIndex::build(&records);
        assert_eq!(index.len(), 1);

        index.insert(Snowflake(200), vec![0.9; EMBEDDING_DIM]);
        assert_eq!(index.len(), 2);

        let results = index.search(&vec![0.9; EMBEDDING_DIM], 1);
        assert_eq!(results, vec![Snowflake(200)]);
    }
}
