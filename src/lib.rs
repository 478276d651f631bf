//! CinderKV: an embedded, persistent key/value store for opaque byte
//! strings, optimized for point reads and blind writes on working sets
//! whose index fits in memory but whose values do not.
//!
//! Writes append records to a log segment; an in-memory index maps each
//! key to the newest record's location. Deletes are logged as tombstones.
//! Superseded bytes are tracked per file, and a background merge rewrites
//! the live remainder of the worst files into fresh segments. Recovery
//! rebuilds the index from compact hint sidecars instead of re-reading
//! values.
//!
//! ```no_run
//! use cinderkv::{Config, Engine};
//!
//! # fn main() -> cinderkv::Result<()> {
//! let engine = Engine::open(Config::new("./db"))?;
//! engine.put(b"hello", b"world")?;
//! assert_eq!(engine.get(b"hello")?, Some(b"world".to_vec()));
//! engine.delete(b"hello")?;
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod flock;
pub mod index;
pub mod log;
pub mod scheduler;
pub mod stale;
#[cfg(test)]
pub(crate) mod tmpfs;

pub use config::{Config, MergeConfig};
pub use engine::Engine;
pub use error::{Error, Result};
pub use index::{KeyIndex, Locator};
