//! Columnar vector storage over a distributed key-value store.
//!
//! A column is a logically contiguous sequence of values, physically
//! partitioned into independently compressed chunks whose keys are
//! derived from the column key (one key per header, one key per chunk,
//! no separate index). This crate covers:
//! - the closed family of chunk encodings and their mutate-or-inflate
//!   write contract;
//! - the column layer: chunk addressing, lazily computed rollup
//!   statistics, categorical conversion;
//! - the write-once parallel build protocol (appendable columns and
//!   growable chunks);
//! - non-materializing derived views (row subsets and value remaps);
//! - column groups (shared chunk layouts) and frames (named collections
//!   of layout-compatible columns).
//!
//! The distributed substrate (key-value primitives, per-chunk
//! map/reduce) comes from `strata-store`.

#![forbid(unsafe_code)]

mod builder;
mod chunk;
mod column;
mod context;
mod error;
mod frame;
mod group;
mod rollup;
mod views;

pub use crate::builder::{AppendableColumn, ChunkBuilder};
pub use crate::chunk::Chunk;
pub use crate::column::{Column, MAX_DOMAIN_SIZE};
pub use crate::context::{Platform, PlatformOptions};
pub use crate::error::{ColumnarError, Result};
pub use crate::frame::{Frame, RowSelection, SMALL_COLUMN_ROWS};
pub use crate::group::ColumnGroup;
pub use crate::rollup::{RollupState, RollupStats};
