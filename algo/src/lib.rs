/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![deny(unreachable_patterns)]

pub mod collator;
pub mod color_engine;
pub mod contractor;
pub mod expander;
pub mod partitioner;
pub mod path_info;
pub mod pipeline;
pub mod subgraph;

pub mod prelude {
    pub use crate::collator::*;
    pub use crate::color_engine::*;
    pub use crate::contractor::*;
    pub use crate::expander::*;
    pub use crate::partitioner::*;
    pub use crate::path_info::*;
    pub use crate::pipeline::*;
    pub use crate::subgraph::*;
}
