//! `MessageArchiver`: the façade combining persistence, continuity tracking
//! and semantic retrieval behind a single per-channel API. See `spec.md`
//! §4.1, §4.3.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::error::{ParleyError, StorageError, TransportError};
use crate::model::{ChannelId, MessageId, MessageRecord};
use crate::persistence::{PersistenceRegistry, ServerStore};
use crate::semantic::SemanticIndexRegistry;
use crate::snowflake::Snowflake;
use crate::tracker::ContinuityTracker;

/// `spec.md` §4.3 step 4: the archival embedding batch RPC is allowed up to
/// this long before the archiver gives up on it for this round (the
/// messages themselves are already durably recorded by then).
const EMBED_BATCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Tracks, per channel, the highest message ID the archiver has recorded
/// live this process. Read by callers deciding whether an incoming message
/// is contiguous with what's already stored, without touching the database.
#[derive(Default)]
pub struct LatestMessagePerChannel {
    inner: DashMap<ChannelId, MessageId>,
}

impl LatestMessagePerChannel {
    pub fn get(&self, channel_id: ChannelId) -> Option<MessageId> {
        self.inner.get(&channel_id).map(|v| *v)
    }

    pub fn record(&self, channel_id: ChannelId, message_id: MessageId) {
        self.inner
            .entry(channel_id)
            .and_modify(|existing| {
                if message_id > *existing {
                    *existing = message_id;
                }
            })
            .or_insert(message_id);
    }
}

pub struct MessageArchiver {
    persistence: Arc<PersistenceRegistry>,
    semantic: Arc<SemanticIndexRegistry>,
    embedder: Arc<dyn EmbeddingClient>,
    latest: LatestMessagePerChannel,
}

impl MessageArchiver {
    pub fn new(
        persistence: Arc<PersistenceRegistry>,
        semantic: Arc<SemanticIndexRegistry>,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            persistence,
            semantic,
            embedder,
            latest: LatestMessagePerChannel::default(),
        }
    }

    /// Records a single message observed in real time. Infers whether it's
    /// contiguous with the last live message seen for this channel and
    /// merges continuity ranges accordingly, then embeds and indexes it if
    /// it qualifies. Persistence and continuity bookkeeping happen with the
    /// per-server lock held; the embedding RPC happens after the lock is
    /// dropped, per REDESIGN FLAG §9.
    pub async fn record_live(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        message: MessageRecord,
    ) -> Result<(), StorageError> {
        let store = self.persistence.get_or_create(server_id)?;
        let hint = self.latest.get(channel_id);

        {
            let tracker = ContinuityTracker::new(&store);
            tracker.record_contiguous(channel_id, std::slice::from_ref(&message), hint)?;
        }
        self.latest.record(channel_id, message.message_id);

        self.embed_qualifying(&store, channel_id, std::slice::from_ref(&message))
            .await?;
        Ok(())
    }

    /// Records a page of historically-fetched messages (backfill). No
    /// adjacency is assumed; the tracker widens or creates ranges purely
    /// from what's already on disk.
    pub async fn record_batch(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        batch: Vec<MessageRecord>,
    ) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        let store = self.persistence.get_or_create(server_id)?;
        {
            let tracker = ContinuityTracker::new(&store);
            tracker.record_contiguous(channel_id, &batch, None)?;
        }

        self.embed_qualifying(&store, channel_id, &batch).await?;
        Ok(())
    }

    pub fn count_continuous(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        since: MessageId,
    ) -> Result<u64, StorageError> {
        let store = self.persistence.get_or_create(server_id)?;
        ContinuityTracker::new(&store).count_continuous_from(channel_id, since)
    }

    pub fn oldest_continuous(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        since: MessageId,
    ) -> Result<MessageId, StorageError> {
        let store = self.persistence.get_or_create(server_id)?;
        ContinuityTracker::new(&store).oldest_continuous_from(channel_id, since)
    }

    /// Most recent `limit` messages, in descending-recency order.
    pub fn retrieve_recent(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        limit: u64,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let store = self.persistence.get_or_create(server_id)?;
        store.fetch_latest_by_channel(channel_id, limit as usize)
    }

    /// Semantic retrieval: embeds `query_text`, searches the channel's HNSW
    /// index and resolves the returned ordinals back to full message
    /// records via the persistence store.
    pub async fn retrieve_relevant(
        &self,
        server_id: crate::model::ServerId,
        channel_id: ChannelId,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<MessageRecord>, ParleyError> {
        let store = self.persistence.get_or_create(server_id)?;
        let all_embeddings: Vec<crate::model::EmbeddingRecord> = store
            .fetch_all_embeddings(channel_id)?
            .into_iter()
            .map(|(message_id, vector)| crate::model::EmbeddingRecord {
                channel_id,
                message_id,
                vector,
            })
            .collect();
        if all_embeddings.is_empty() {
            return Ok(Vec::new());
        }

        let index = self
            .semantic
            .get_or_build(channel_id, &all_embeddings)
            .await;

        let query_vector = self
            .embedder
            .embed(std::slice::from_ref(&query_text.to_string()))
            .await
            .map_err(|e| TransportError::RequestFailed {
                endpoint: "embedding".to_string(),
                message: e.to_string(),
            })?;
        let Some(query_vector) = query_vector.into_iter().next() else {
            return Ok(Vec::new());
        };

        let message_ids = index.search(&query_vector, k);
        let mut out = Vec::with_capacity(message_ids.len());
        for message_id in message_ids {
            if let Some(record) = store.find_message(channel_id, message_id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Collects every message in `batch` that qualifies for embedding and
    /// doesn't have one yet, submits them as a single batched request
    /// (`spec.md` §4.3 steps 3-4), and persists the vectors that come back.
    /// A transport failure, timeout, or length mismatch is logged and
    /// swallowed rather than propagated — embeddings are best-effort
    /// enrichment; archiving the messages themselves has already succeeded
    /// by the time this runs, and a missing embedding is recoverable the
    /// next time a sibling message in the same channel is observed.
    async fn embed_qualifying(
        &self,
        store: &ServerStore,
        channel_id: ChannelId,
        batch: &[MessageRecord],
    ) -> Result<(), StorageError> {
        let mut candidates = Vec::new();
        for message in batch {
            if !message.qualifies_for_embedding() {
                continue;
            }
            if store.has_embedding(channel_id, message.message_id)? {
                continue;
            }
            candidates.push(message);
        }
        if candidates.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = candidates.iter().map(|m| m.embed_text()).collect();
        let embed_call = self.embedder.embed(&texts);
        let outcome = tokio::time::timeout(EMBED_BATCH_TIMEOUT, embed_call).await;

        let vectors = match outcome {
            Ok(Ok(vectors)) => vectors,
            Ok(Err(err)) => {
                warn!(channel = %channel_id, error = %err, "embedding batch failed");
                return Ok(());
            }
            Err(_) => {
                warn!(channel = %channel_id, "embedding batch timed out");
                return Ok(());
            }
        };
        if vectors.len() != candidates.len() {
            warn!(
                channel = %channel_id,
                expected = candidates.len(),
                got = vectors.len(),
                "embedding batch returned a mismatched vector count"
            );
            return Ok(());
        }

        for (message, vector) in candidates.into_iter().zip(vectors.into_iter()) {
            store.insert_embedding(channel_id, message.message_id, &vector)?;
            self.semantic
                .insert(channel_id, message.message_id, vector)
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_message_per_channel_keeps_max() {
        let latest = LatestMessagePerChannel::default();
        let channel = Snowflake(1);
        latest.record(channel, Snowflake(10));
        latest.record(channel, Snowflake(5));
        latest.record(channel, Snowflake(20));
        assert_eq!(latest.get(channel), Some(Snowflake(20)));
    }

    #[test]
    fn latest_message_per_channel_starts_empty() {
        let latest = LatestMessagePerChannel::default();
        assert_eq!(latest.get(Snowflake(1)), None);
    }
}
