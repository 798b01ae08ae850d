//! `ContinuityTracker`: maintains maximal, non-overlapping, non-adjacent
//! continuity ranges per channel under two write patterns — live append and
//! historical backfill. See `spec.md` §4.2.

use crate::error::StorageError;
use crate::model::{ChannelId, ContinuityRange, MessageId, MessageRecord};
use crate::persistence::ServerStore;
use crate::snowflake::Snowflake;

pub struct ContinuityTracker<'a> {
    store: &'a ServerStore,
}

impl<'a> ContinuityTracker<'a> {
    pub fn new(store: &'a ServerStore) -> Self {
        Self { store }
    }

    /// Inserts `batch` and merges continuity ranges in one logical
    /// transaction. `adjacent_hint`, if `Some` and non-zero, is a message ID
    /// the caller asserts is contiguous with the batch (the previous known
    /// live tail).
    pub fn record_contiguous(
        &self,
        channel_id: ChannelId,
        batch: &[MessageRecord],
        adjacent_hint: Option<MessageId>,
    ) -> Result<(), StorageError> {
        if batch.is_empty() && adjacent_hint.is_none_or(|h| h.is_unset()) {
            return Ok(());
        }

        self.store.insert_messages(batch)?;

        let Some((mut lo, mut hi)) = message_range(batch, adjacent_hint) else {
            return Ok(());
        };

        let overlapping = self.store.fetch_overlapping_ranges(channel_id, lo, hi)?;
        for range in &overlapping {
            lo = lo.min(range.begin_id);
            hi = hi.max(range.end_id);
        }
        for range in &overlapping {
            self.store
                .delete_continuity_range(channel_id, range.begin_id)?;
        }

        self.store
            .insert_continuity_range(channel_id, ContinuityRange::new(channel_id, lo, hi))?;

        Ok(())
    }

    /// `CountContinuousFrom`: the number of messages in the continuity
    /// range containing `since`, from that range's start up to `since`
    /// inclusive. `0` if no range contains `since`.
    pub fn count_continuous_from(
        &self,
        channel_id: ChannelId,
        since: MessageId,
    ) -> Result<u64, StorageError> {
        match self
            .store
            .find_continuity_range_containing(channel_id, since)?
        {
            Some(range) => self
                .store
                .count_messages_in_range(channel_id, range.begin_id, since),
            None => Ok(0),
        }
    }

    /// `OldestContinuousFrom`: the start of the continuity range containing
    /// `since`, or `since` itself if no range contains it.
    pub fn oldest_continuous_from(
        &self,
        channel_id: ChannelId,
        since: MessageId,
    ) -> Result<MessageId, StorageError> {
        Ok(self
            .store
            .find_continuity_range_containing(channel_id, since)?
            .map(|r| r.begin_id)
            .unwrap_or(since))
    }
}

/// Computes `[lo, hi]` = the span of `batch`'s message IDs, widened to
/// include `adjacent_hint` if present. Returns `None` when there's nothing
/// to merge (empty batch, no hint).
fn message_range(
    batch: &[MessageRecord],
    adjacent_hint: Option<MessageId>,
) -> Option<(MessageId, MessageId)> {
    let hint = adjacent_hint.filter(|h| !h.is_unset());

    if batch.is_empty() {
        return hint.map(|h| (h, h));
    }

    let mut lo = batch[0].message_id;
    let mut hi = batch[0].message_id;
    for m in &batch[1..] {
        lo = lo.min(m.message_id);
        hi = hi.max(m.message_id);
    }
    if let Some(h) = hint {
        lo = lo.min(h);
        hi = hi.max(h);
    }
    Some((lo, hi))
}
