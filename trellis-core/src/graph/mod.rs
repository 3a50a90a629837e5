//! Dependency Graph
//!
//! This module holds the data the engine reasons about: the raw state tree and
//! the paths that address it, plus the reverse index from paths to the
//! computeds that read them.
//!
//! # Overview
//!
//! - A [`Node`] is a raw record or sequence. Nodes are shared by reference.
//! - A [`Path`] addresses a slot from a store root, segment by segment.
//! - The [`InvalidationIndex`] maps raw paths to the computeds that read them,
//!   and computeds to the computeds that read those, so a write can find
//!   everything it made stale without scanning.
//!
//! # Design Decisions
//!
//! 1. Edges are keyed by path, not by node. A computed that read `user.name`
//!    stays linked when `user` is replaced wholesale, and sees the new record.
//!
//! 2. Each store owns its own index; there is no process-wide graph.
//!
//! 3. We maintain both directions of the computed-to-computed edges so that a
//!    relink can remove exactly the edges a computed added.

mod index;
mod node;
mod path;

pub use index::InvalidationIndex;
pub use node::{Node, NodeId, NodeKind};
pub use path::{DepKey, Key, Path, COMPUTED_PREFIX, LENGTH, SEPARATOR};
