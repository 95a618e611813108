//! Job store implementations.

pub mod jobs;
pub mod logs;
pub mod memory;

pub use jobs::SqliteJobStore;
pub use logs::{ChunkCodec, LogChunk, SqliteJobLogger};
pub use memory::{MemoryJobStore, WriterLogger};
