/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unreachable_patterns)]
#![allow(clippy::type_complexity)]

pub mod bucket;
pub mod color;
pub mod config;
pub mod edge_matrix;
pub mod error;
pub mod fragment;
pub mod hashtable;
pub mod hll;
pub mod kmer;
pub mod lmtig;
pub mod minimizer;
pub mod mmap_helper;
pub mod superkmer;

pub mod prelude {
    pub use crate::bucket::*;
    pub use crate::color::*;
    pub use crate::config::*;
    pub use crate::edge_matrix::*;
    pub use crate::error::*;
    pub use crate::fragment::*;
    pub use crate::hashtable::*;
    pub use crate::hll::*;
    pub use crate::kmer::*;
    pub use crate::lmtig::*;
    pub use crate::minimizer::*;
    pub use crate::superkmer::*;
}
