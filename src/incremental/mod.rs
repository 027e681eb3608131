// src/incremental/mod.rs

//! Content-based up-to-date checking.
//!
//! - [`hash`] computes file and directory-tree signatures.
//! - [`file_cache`] memoizes file hashes, validated by file stat.
//! - [`store`] persists what each task saw when it last succeeded.
//! - [`decision`] compares the two and produces a verdict per task.

pub mod decision;
pub mod file_cache;
pub mod hash;
pub mod store;

pub use decision::{Decision, DecisionEngine, Verdict};
pub use file_cache::FileCache;
pub use store::{
    BuildDatabase, BuildStateStore, DatabaseChanges, FileStateStore, MemoryStateStore, TaskRecord,
};
