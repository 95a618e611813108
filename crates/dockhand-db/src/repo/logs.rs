//! Durable job logs.
//!
//! Each write appends one chunk under the job's locator with the next
//! sequence number. Large chunks are zstd-compressed; the codec is stored
//! per chunk so replay never depends on the current threshold.

use async_trait::async_trait;
use dockhand_core::JobLocator;
use dockhand_core::executor::OutputSink;
use dockhand_core::store::JobLogger;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::{DbError, DbResult};

/// Chunks shorter than this are stored uncompressed.
const COMPRESS_THRESHOLD: usize = 256;

const ZSTD_LEVEL: i32 = 3;

/// How a stored chunk is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkCodec {
    Raw,
    Zstd,
}

impl ChunkCodec {
    fn as_i64(self) -> i64 {
        match self {
            ChunkCodec::Raw => 0,
            ChunkCodec::Zstd => 1,
        }
    }

    fn from_i64(value: i64) -> DbResult<Self> {
        match value {
            0 => Ok(ChunkCodec::Raw),
            1 => Ok(ChunkCodec::Zstd),
            other => Err(DbError::Corrupt(format!("unknown chunk codec {}", other))),
        }
    }
}

/// Encode a chunk for storage.
pub fn encode_chunk(chunk: &[u8]) -> DbResult<(ChunkCodec, Vec<u8>)> {
    if chunk.len() < COMPRESS_THRESHOLD {
        return Ok((ChunkCodec::Raw, chunk.to_vec()));
    }

    let compressed = zstd::bulk::compress(chunk, ZSTD_LEVEL)?;
    if compressed.len() >= chunk.len() {
        return Ok((ChunkCodec::Raw, chunk.to_vec()));
    }
    Ok((ChunkCodec::Zstd, compressed))
}

/// Decode a stored chunk back to the bytes originally written.
pub fn decode_chunk(codec: ChunkCodec, data: &[u8]) -> DbResult<Vec<u8>> {
    match codec {
        ChunkCodec::Raw => Ok(data.to_vec()),
        ChunkCodec::Zstd => Ok(zstd::stream::decode_all(data)?),
    }
}

/// A decoded log chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub seq: u64,
    pub data: Vec<u8>,
}

#[derive(sqlx::FromRow)]
struct LogRow {
    seq: i64,
    codec: i64,
    chunk: Vec<u8>,
}

/// Job logger backed by the SQLite job store.
pub struct SqliteJobLogger {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
    locator: JobLocator,
}

impl SqliteJobLogger {
    pub(crate) fn new(pool: SqlitePool, write_lock: Arc<Mutex<()>>, locator: JobLocator) -> Self {
        Self {
            pool,
            write_lock,
            locator,
        }
    }

    /// Append one chunk and return its sequence number.
    pub async fn append(&self, chunk: &[u8]) -> DbResult<u64> {
        let (codec, encoded) = encode_chunk(chunk)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let seq: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(seq), 0) + 1 FROM job_logs
            WHERE owner = ? AND repo = ? AND branch = ? AND number = ?
            "#,
        )
        .bind(&self.locator.owner)
        .bind(&self.locator.repo)
        .bind(&self.locator.branch)
        .bind(self.locator.number as i64)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO job_logs (owner, repo, branch, number, seq, codec, chunk)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.locator.owner)
        .bind(&self.locator.repo)
        .bind(&self.locator.branch)
        .bind(self.locator.number as i64)
        .bind(seq)
        .bind(codec.as_i64())
        .bind(encoded)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(seq as u64)
    }

    /// All chunks in sequence order.
    pub async fn chunks(&self) -> DbResult<Vec<LogChunk>> {
        let rows = sqlx::query_as::<_, LogRow>(
            r#"
            SELECT seq, codec, chunk FROM job_logs
            WHERE owner = ? AND repo = ? AND branch = ? AND number = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(&self.locator.owner)
        .bind(&self.locator.repo)
        .bind(&self.locator.branch)
        .bind(self.locator.number as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let codec = ChunkCodec::from_i64(row.codec)?;
                Ok(LogChunk {
                    seq: row.seq as u64,
                    data: decode_chunk(codec, &row.chunk)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OutputSink for SqliteJobLogger {
    async fn write(&self, chunk: &[u8]) -> dockhand_core::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.append(chunk).await?;
        Ok(())
    }
}

#[async_trait]
impl JobLogger for SqliteJobLogger {
    async fn replay(&self) -> dockhand_core::Result<Vec<u8>> {
        let chunks = self.chunks().await?;
        let mut out = Vec::with_capacity(chunks.iter().map(|c| c.data.len()).sum());
        for chunk in chunks {
            out.extend_from_slice(&chunk.data);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SqliteJobStore;
    use dockhand_core::Job;
    use dockhand_core::store::{JobStore, step_marker};
    use proptest::prelude::*;

    async fn saved_job(store: &SqliteJobStore, branch: &str) -> Job {
        let mut job = Job::new("acme", "widget", Some(branch.to_string()), None);
        store.save(&mut job).await.unwrap();
        job
    }

    #[test]
    fn test_small_chunks_stay_raw() {
        let (codec, data) = encode_chunk(b"hello\n").unwrap();
        assert_eq!(codec, ChunkCodec::Raw);
        assert_eq!(data, b"hello\n");
    }

    #[test]
    fn test_large_repetitive_chunks_compress() {
        let chunk = b"Compiling dockhand v0.1.0\n".repeat(100);
        let (codec, data) = encode_chunk(&chunk).unwrap();
        assert_eq!(codec, ChunkCodec::Zstd);
        assert!(data.len() < chunk.len());
        assert_eq!(decode_chunk(codec, &data).unwrap(), chunk);
    }

    #[test]
    fn test_unknown_codec_is_corrupt() {
        assert!(matches!(ChunkCodec::from_i64(9), Err(DbError::Corrupt(_))));
    }

    proptest! {
        #[test]
        fn prop_chunk_codec_preserves_bytes(chunk in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let (codec, data) = encode_chunk(&chunk).unwrap();
            prop_assert_eq!(decode_chunk(codec, &data).unwrap(), chunk);
        }
    }

    #[tokio::test]
    async fn test_replay_reproduces_writes_and_steps() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let job = saved_job(&store, "main").await;
        let logger = store.logger(&job).unwrap();

        let big = b"warning: unused variable `x`\n".repeat(64);
        let mut expected = Vec::new();

        logger.write_step("fetch sources").await.unwrap();
        expected.extend_from_slice(step_marker("fetch sources").as_bytes());

        logger.write(b"Cloning into '/dockhand/build'...\n").await.unwrap();
        expected.extend_from_slice(b"Cloning into '/dockhand/build'...\n");

        logger.write_step("build").await.unwrap();
        expected.extend_from_slice(step_marker("build").as_bytes());

        logger.write(&big).await.unwrap();
        expected.extend_from_slice(&big);

        logger.write(&[0, 159, 146, 150]).await.unwrap();
        expected.extend_from_slice(&[0, 159, 146, 150]);

        assert_eq!(logger.replay().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_sequence_numbers_are_per_job() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let first = store.sqlite_logger(&saved_job(&store, "main").await).unwrap();
        let second = store.sqlite_logger(&saved_job(&store, "main").await).unwrap();

        assert_eq!(first.append(b"a").await.unwrap(), 1);
        assert_eq!(first.append(b"b").await.unwrap(), 2);
        assert_eq!(second.append(b"c").await.unwrap(), 1);
        assert_eq!(first.append(b"d").await.unwrap(), 3);

        let chunks = first.chunks().await.unwrap();
        let seqs: Vec<u64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(first.replay().await.unwrap(), b"abd");
        assert_eq!(second.replay().await.unwrap(), b"c");
    }

    #[tokio::test]
    async fn test_empty_log_replays_nothing() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let job = saved_job(&store, "main").await;
        let logger = store.logger(&job).unwrap();

        logger.write(b"").await.unwrap();
        assert!(logger.replay().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_every_chunk() {
        let store = SqliteJobStore::in_memory().await.unwrap();
        let job = saved_job(&store, "main").await;
        let logger = Arc::new(store.sqlite_logger(&job).unwrap());

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let logger = logger.clone();
                tokio::spawn(async move { logger.append(format!("{i:02}\n").as_bytes()).await })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let chunks = logger.chunks().await.unwrap();
        let seqs: Vec<u64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, (1..=16).collect::<Vec<u64>>());

        let mut lines: Vec<Vec<u8>> = chunks.into_iter().map(|c| c.data).collect();
        lines.sort();
        let expected: Vec<Vec<u8>> = (0..16).map(|i| format!("{i:02}\n").into_bytes()).collect();
        assert_eq!(lines, expected);
    }
}
