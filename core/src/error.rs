/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Error kinds for the compaction pipeline.
//!
//! Most call sites return `anyhow::Result`; these narrow, typed errors are
//! used where callers need to match on *what kind* of failure occurred
//! (validation before work begins, or an internal inconsistency that a
//! release build should abort on rather than silently continue).

use thiserror::Error;

/// Configuration rejected before any work begins.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("k must be odd, got {0}")]
    EvenK(usize),
    #[error("k = {k} exceeds the maximum supported k = {max}")]
    KTooLarge { k: usize, max: usize },
    #[error("l = {l} must be <= k = {k}")]
    LTooLarge { l: usize, k: usize },
    #[error("l = {0} exceeds 32")]
    LTooLarge32(usize),
    #[error("thread count {0} is out of the supported range {1}..={2}")]
    ThreadCountOutOfRange(usize, usize, usize),
    #[error("number of subgraphs G = {0} must be a power of two")]
    GNotPowerOfTwo(usize),
    #[error("source id {0} is out of range [1, {1})")]
    SourceIdOutOfRange(u32, u32),
    #[error("a strict memory bound was requested together with an unrestricted budget")]
    ConflictingMemoryBound,
    #[error("num_atlases = {num_atlases} must evenly divide num_subgraphs = {num_subgraphs} into a power-of-two quotient")]
    AtlasCountInvalid { num_atlases: usize, num_subgraphs: usize },
}

/// A programming error: an invariant the pipeline relies on was violated.
///
/// These are never expected to occur on valid input; debug builds should
/// panic loudly (via `debug_assert!`) and release builds abort via this
/// error type rather than silently producing wrong output.
#[derive(Error, Debug)]
pub enum InternalError {
    #[error("hash table overflow: capacity {capacity} exceeded while inserting k-mer")]
    HashTableOverflow { capacity: usize },
    #[error("vertex {0:?} has no incidence in the edge matrix column being contracted")]
    NoIncidence(String),
    #[error("expander could not infer path-info for an edge endpoint")]
    CannotInfer,
    #[error("discontinuity edge references a missing lm-tig (bucket {bucket}, index {index})")]
    MissingLmTig { bucket: usize, index: usize },
    #[error("vertex {0:?} was assigned two different path-infos")]
    DuplicatePathInfo(String),
}

/// Fatal I/O or resource exhaustion encountered while touching external
/// storage (atlas buckets, edge-matrix cells, path-info buckets, ...).
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("could not create working file {path}: {source}")]
    CreateFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not flush bucket {path}: {source}")]
    FlushFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
