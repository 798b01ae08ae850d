//! The data model: snowflake-keyed messages, continuity ranges and
//! embeddings. See `spec.md` §3.

use serde::{Deserialize, Serialize};

use crate::snowflake::Snowflake;

pub type ServerId = Snowflake;
pub type ChannelId = Snowflake;
pub type MessageId = Snowflake;
pub type AuthorId = Snowflake;

/// Minimum content length, in characters, below which a message is not
/// submitted for embedding.
pub const MIN_EMBED_LEN: usize = 10;

/// Embedding vector dimensionality. Deployment-fixed; not stored per row.
pub const EMBEDDING_DIM: usize = 768;

/// An immutable record of an observed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author_id: AuthorId,
    pub author_user_name: String,
    pub author_global_name: String,
    pub timestamp_unix_ms: i64,
    pub timestamp_human_readable: String,
    pub content: String,
}

impl MessageRecord {
    /// Text submitted to the embedding service: a temporal prefix followed
    /// by the author's display name and the message content, so embeddings
    /// retain time-awareness.
    pub fn embed_text(&self) -> String {
        format!(
            "{} {} {}",
            self.timestamp_human_readable, self.author_global_name, self.content
        )
    }

    pub fn qualifies_for_embedding(&self) -> bool {
        self.content.chars().count() >= MIN_EMBED_LEN
    }
}

/// A maximal, known-contiguous interval `[begin_id, end_id]` of message IDs
/// for a channel. Invariant: `begin_id <= end_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuityRange {
    pub channel_id: ChannelId,
    pub begin_id: MessageId,
    pub end_id: MessageId,
}

impl ContinuityRange {
    pub fn new(channel_id: ChannelId, begin_id: MessageId, end_id: MessageId) -> Self {
        debug_assert!(begin_id <= end_id, "continuity range must be non-empty");
        Self {
            channel_id,
            begin_id,
            end_id,
        }
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.begin_id <= id && id <= self.end_id
    }

    /// Whether `self` shares at least one message ID with `[lo, hi]`. A
    /// range that merely abuts `[lo, hi]` with no shared ID (ending at
    /// `lo - 1` or starting at `hi + 1`) does not overlap by this
    /// predicate — that kind of touch is only merged when the caller's
    /// adjacency hint widens `[lo, hi]` to actually include the shared
    /// boundary id, not by this check.
    pub fn overlaps(&self, lo: MessageId, hi: MessageId) -> bool {
        self.begin_id.get() <= hi.get() && self.end_id.get() >= lo.get()
    }
}

/// A persisted sentence embedding for one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub vector: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> MessageRecord {
        MessageRecord {
            server_id: Snowflake(1),
            channel_id: Snowflake(2),
            message_id: Snowflake(3),
            author_id: Snowflake(4),
            author_user_name: "alice".into(),
            author_global_name: "Alice".into(),
            timestamp_unix_ms: 0,
            timestamp_human_readable: "2024-01-01 00:00:00".into(),
            content: content.into(),
        }
    }

    #[test]
    fn embedding_gated_by_min_length() {
        assert!(!msg("hi").qualifies_for_embedding());
        assert!(msg("hello world!!!").qualifies_for_embedding());
    }

    #[test]
    fn embed_text_has_temporal_prefix() {
        let text = msg("hello world!!!").embed_text();
        assert_eq!(text, "2024-01-01 00:00:00 Alice hello world!!!");
    }

    #[test]
    fn range_contains_endpoints() {
        let r = ContinuityRange::new(Snowflake(1), Snowflake(100), Snowflake(200));
        assert!(r.contains(Snowflake(100)));
        assert!(r.contains(Snowflake(200)));
        assert!(!r.contains(Snowflake(99)));
        assert!(!r.contains(Snowflake(201)));
    }

    #[test]
    fn shared_boundary_id_overlaps() {
        let r = ContinuityRange::new(Snowflake(1), Snowflake(100), Snowflake(200));
        // a query starting exactly at end_id shares that message ID
        assert!(r.overlaps(Snowflake(200), Snowflake(210)));
        // and one ending exactly at begin_id
        assert!(r.overlaps(Snowflake(90), Snowflake(100)));
    }

    #[test]
    fn adjacent_but_non_sharing_spans_do_not_overlap() {
        let r = ContinuityRange::new(Snowflake(1), Snowflake(100), Snowflake(200));
        // [201, 210] abuts but shares no id with (100, 200)
        assert!(!r.overlaps(Snowflake(201), Snowflake(210)));
        assert!(!r.overlaps(Snowflake(90), Snowflake(99)));
        assert!(!r.overlaps(Snowflake(300), Snowflake(310)));
    }
}
