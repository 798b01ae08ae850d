//! `ServerStore`: a single SQLite connection for one server's data, guarded
//! by a mutex so the whole connection is serialised (`spec.md` §4.1/§5 — one
//! connection per server, never a pool).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;
use crate::model::{ChannelId, ContinuityRange, MessageId, MessageRecord};
use crate::snowflake::Snowflake;

const DB_FILENAME: &str = "persistence.db";

fn messages_table(channel_id: ChannelId) -> String {
    format!("messages_{}", channel_id.get())
}

fn continuity_table(channel_id: ChannelId) -> String {
    format!("continuity_{}", channel_id.get())
}

fn embeddings_table(channel_id: ChannelId) -> String {
    format!("embeddings_{}", channel_id.get())
}

/// One server's SQLite database: `<working-root>/<serverId>/persistence.db`.
pub struct ServerStore {
    conn: Mutex<Connection>,
    /// Channels whose tables we've already created this process lifetime,
    /// so we don't re-run `CREATE TABLE IF NOT EXISTS` on every operation.
    tables_created: Mutex<HashSet<ChannelId>>,
}

impl ServerStore {
    pub fn open(server_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(server_dir).map_err(|_| StorageError::Open {
            path: server_dir.display().to_string(),
            source: rusqlite::Error::InvalidPath(PathBuf::from(server_dir)),
        })?;
        let path = server_dir.join(DB_FILENAME);
        let conn = Connection::open(&path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables_created: Mutex::new(HashSet::new()),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Self {
        Self {
            conn: Mutex::new(Connection::open_in_memory().expect("open in-memory sqlite")),
            tables_created: Mutex::new(HashSet::new()),
        }
    }

    fn ensure_channel_tables(
        &self,
        conn: &Connection,
        channel_id: ChannelId,
    ) -> Result<(), StorageError> {
        if self.tables_created.lock().contains(&channel_id) {
            return Ok(());
        }

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    snowflake INTEGER PRIMARY KEY,
                    channelsnowflake INTEGER NOT NULL,
                    authorUserName TEXT NOT NULL,
                    authorGlobalName TEXT NOT NULL,
                    authorId INTEGER NOT NULL,
                    timeStampUnixMs INTEGER NOT NULL,
                    timeStampFriendly TEXT NOT NULL,
                    message TEXT
                )",
                messages_table(channel_id)
            ),
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    snowflakeBegin INTEGER PRIMARY KEY,
                    snowflakeEnd INTEGER NOT NULL
                )",
                continuity_table(channel_id)
            ),
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    snowflake INTEGER PRIMARY KEY,
                    embedding BLOB
                )",
                embeddings_table(channel_id)
            ),
            [],
        )?;

        self.tables_created.lock().insert(channel_id);
        Ok(())
    }

    pub fn insert_message(&self, msg: &MessageRecord) -> Result<(), StorageError> {
        self.insert_messages(std::slice::from_ref(msg))
    }

    pub fn insert_messages(&self, batch: &[MessageRecord]) -> Result<(), StorageError> {
        let Some(first) = batch.first() else {
            return Ok(());
        };
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, first.channel_id)?;

        let table = messages_table(first.channel_id);
        let sql = format!(
            "INSERT OR IGNORE INTO {table} \
             (snowflake, channelsnowflake, authorUserName, authorGlobalName, authorId, \
              timeStampUnixMs, timeStampFriendly, message) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        for msg in batch {
            stmt.execute(params![
                msg.message_id.get() as i64,
                msg.channel_id.get() as i64,
                msg.author_user_name,
                msg.author_global_name,
                msg.author_id.get() as i64,
                msg.timestamp_unix_ms,
                msg.timestamp_human_readable,
                msg.content,
            ])?;
        }
        Ok(())
    }

    pub fn fetch_latest_by_channel(
        &self,
        channel_id: ChannelId,
        n: usize,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT snowflake, channelsnowflake, authorUserName, authorGlobalName, authorId, \
             timeStampUnixMs, timeStampFriendly, message FROM {} \
             ORDER BY snowflake DESC LIMIT ?1",
            messages_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![n as i64], row_to_message)?;
        let mut out = Vec::with_capacity(n);
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn find_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT snowflake, channelsnowflake, authorUserName, authorGlobalName, authorId, \
             timeStampUnixMs, timeStampFriendly, message FROM {} WHERE snowflake = ?1",
            messages_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let found = stmt
            .query_row(params![message_id.get() as i64], row_to_message)
            .optional()?;
        Ok(found)
    }

    pub fn find_continuity_range_containing(
        &self,
        channel_id: ChannelId,
        id: MessageId,
    ) -> Result<Option<ContinuityRange>, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT snowflakeBegin, snowflakeEnd FROM {} \
             WHERE snowflakeBegin <= ?1 AND snowflakeEnd >= ?1",
            continuity_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let found = stmt
            .query_row(params![id.get() as i64], |row| {
                Ok(ContinuityRange::new(
                    channel_id,
                    Snowflake(row.get::<_, i64>(0)? as u64),
                    Snowflake(row.get::<_, i64>(1)? as u64),
                ))
            })
            .optional()?;
        Ok(found)
    }

    pub fn fetch_overlapping_ranges(
        &self,
        channel_id: ChannelId,
        lo: MessageId,
        hi: MessageId,
    ) -> Result<Vec<ContinuityRange>, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        // inclusive overlap, accepting single-ID touches: an existing range
        // touches [lo, hi] if it starts no later than hi and ends no
        // earlier than lo — i.e. the two intervals share at least one
        // message ID. Adjacency with no shared ID (a range ending at lo-1
        // or starting at hi+1) is merged only when the caller's adjacency
        // hint widens [lo, hi] to actually include that boundary, not by
        // this predicate.
        let sql = format!(
            "SELECT snowflakeBegin, snowflakeEnd FROM {} \
             WHERE snowflakeBegin <= ?1 AND snowflakeEnd >= ?2",
            continuity_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![hi.get() as i64, lo.get() as i64],
            |row| {
                Ok(ContinuityRange::new(
                    channel_id,
                    Snowflake(row.get::<_, i64>(0)? as u64),
                    Snowflake(row.get::<_, i64>(1)? as u64),
                ))
            },
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_continuity_range(
        &self,
        channel_id: ChannelId,
        begin_id: MessageId,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "DELETE FROM {} WHERE snowflakeBegin = ?1",
            continuity_table(channel_id)
        );
        conn.execute(&sql, params![begin_id.get() as i64])?;
        Ok(())
    }

    pub fn insert_continuity_range(
        &self,
        channel_id: ChannelId,
        range: ContinuityRange,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "INSERT OR IGNORE INTO {} (snowflakeBegin, snowflakeEnd) VALUES (?1, ?2)",
            continuity_table(channel_id)
        );
        conn.execute(
            &sql,
            params![range.begin_id.get() as i64, range.end_id.get() as i64],
        )?;
        Ok(())
    }

    pub fn count_messages_in_range(
        &self,
        channel_id: ChannelId,
        lo: MessageId,
        hi: MessageId,
    ) -> Result<u64, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE snowflake >= ?1 AND snowflake <= ?2",
            messages_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let count: i64 = stmt.query_row(params![lo.get() as i64, hi.get() as i64], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn has_embedding(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE snowflake = ?1",
            embeddings_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let count: i64 = stmt.query_row(params![message_id.get() as i64], |r| r.get(0))?;
        Ok(count > 0)
    }

    pub fn insert_embedding(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        vector: &[f32],
    ) -> Result<(), StorageError> {
        if vector.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let blob = encode_vector(vector);
        let sql = format!(
            "INSERT OR IGNORE INTO {} (snowflake, embedding) VALUES (?1, ?2)",
            embeddings_table(channel_id)
        );
        conn.execute(&sql, params![message_id.get() as i64, blob])?;
        Ok(())
    }

    pub fn fetch_all_embeddings(
        &self,
        channel_id: ChannelId,
    ) -> Result<Vec<(MessageId, Vec<f32>)>, StorageError> {
        let conn = self.conn.lock();
        self.ensure_channel_tables(&conn, channel_id)?;
        let sql = format!(
            "SELECT snowflake, embedding FROM {} ORDER BY snowflake ASC",
            embeddings_table(channel_id)
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((Snowflake(id as u64), decode_vector(&blob)))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        message_id: Snowflake(row.get::<_, i64>(0)? as u64),
        channel_id: Snowflake(row.get::<_, i64>(1)? as u64),
        author_user_name: row.get(2)?,
        author_global_name: row.get(3)?,
        author_id: Snowflake(row.get::<_, i64>(4)? as u64),
        timestamp_unix_ms: row.get(5)?,
        timestamp_human_readable: row.get(6)?,
        content: row.get(7)?,
        // server_id is not stored per-message (it's implicit in which
        // server's database the row lives in); callers that need it set it
        // from context after the fact.
        server_id: Snowflake::UNSET,
    })
}

/// Raw little-endian float array, matching the original implementation's
/// blob layout exactly (dimensionality is a deployment invariant, not
/// stored per-row).
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
