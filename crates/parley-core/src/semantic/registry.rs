use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::model::{ChannelId, EmbeddingRecord};

use super::SemanticIndex;

/// Concurrent per-channel cache of built `SemanticIndex`es, generalizing
/// REDESIGN FLAG §9 the same way `PersistenceRegistry` does: the map's
/// entry API is the only thing that behaves like a registry-wide lock, and
/// it's held only long enough to get-or-create a channel's slot. Every
/// rebuild or search after that locks just that one channel's slot.
#[derive(Default)]
pub struct SemanticIndexRegistry {
    slots: DashMap<ChannelId, Arc<Mutex<Option<Arc<SemanticIndex>>>>>,
}

impl SemanticIndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the channel's current index, building it from `records` if
    /// this is the first request or the persisted record count has moved
    /// since (e.g. embeddings landed through an out-of-band path). The
    /// caller is expected to have already fetched `records` from
    /// persistence; this never touches the database itself.
    pub async fn get_or_build(
        &self,
        channel_id: ChannelId,
        records: &[EmbeddingRecord],
    ) -> Arc<SemanticIndex> {
        let slot = self
            .slots
            .entry(channel_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut guard = slot.lock().await;
        if let Some(existing) = guard.as_ref() {
            if existing.len() == records.len() {
                return existing.clone();
            }
        }

        let built = Arc::new(SemanticIndex::build(records));
        *guard = Some(built.clone());
        built
    }

    /// Appends a newly-persisted embedding to the channel's index if one is
    /// already built; a no-op otherwise (a channel with no index yet will
    /// pick the embedding up the first time `get_or_build` runs, since it
    /// always reads fresh from persistence). Never rebuilds — `spec.md` §3
    /// I4: new embeddings are inserted in arrival order, not merged via a
    /// full reconstruction.
    pub async fn insert(
        &self,
        channel_id: ChannelId,
        message_id: crate::model::MessageId,
        vector: Vec<f32>,
    ) {
        if let Some(slot) = self.slots.get(&channel_id) {
            let guard = slot.lock().await;
            if let Some(index) = guard.as_ref() {
                index.insert(message_id, vector);
            }
        }
    }
}
