//! SQLite storage layer for Gradecast.
//!
//! Provides:
//! - Schema initialization for the change log and watched tables
//! - Dedicated writer thread with group commit for grade uploads
//! - Read connection pool for the change poller

pub mod reader;
pub mod schema;
pub mod writer;

pub use reader::{ChangeSource, ReaderError, ReaderPool};
pub use writer::{CommitLimits, Writer, WriterError, WriterHandle};
