//! Distributed key-value and map/reduce primitives for Strata.
//!
//! The columnar core treats the cluster substrate as two primitives:
//! - a key-value store with `put`/`get`, deterministic key-to-node
//!   homing, and an atomic compare-and-update per key;
//! - a data-parallel runner that executes a map function once per chunk
//!   index and merges partial results pairwise with a
//!   commutative/associative reduce.
//!
//! This crate provides both, with an in-memory store standing in for the
//! networked one. Keys encode enough structure (kind tag, member id,
//! chunk index) that a chunk's key — and therefore its home node — is
//! derived from its column's key in O(1), with no persisted index.

#![forbid(unsafe_code)]

mod key;
mod mapreduce;
mod store;

pub use crate::key::{Key, KeyKind, CHUNK_INDEX_NONE, MEMBER_NONE};
pub use crate::mapreduce::run_over_chunks;
pub use crate::store::{Store, StoreConfig};
