//! rollcall-store — Enrolled identities persisted as one snapshot file.
//!
//! Every mutation reads the whole file, edits it in memory and writes it
//! back. There is no incremental format. Concurrent writers to the same
//! file must go through a [`WriteLock`] such as [`LocationLocks`].

pub mod error;
pub mod lock;
pub mod snapshot;
pub mod store;

pub use error::StoreError;
pub use lock::{LocationLocks, Unlocked, WriteLock};
pub use snapshot::{IdentityRecord, Snapshot, UpsertAction};
pub use store::{load, save, Upsert, VectorStore};
