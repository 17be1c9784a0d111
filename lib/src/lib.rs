/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! Main file / top-level module for the single-path reduction library.

// Make the allocator public for fuzzing.
#[cfg(feature = "fuzzing")]
pub mod rainfo;
#[cfg(not(feature = "fuzzing"))]
mod rainfo;

mod checker;
mod code_insertion;
mod data_structures;
mod dense_set;
mod frame;
mod interface;
mod ldst_elim;
mod linearize;
mod merge;
mod reduce;
mod scope;
#[cfg(test)]
mod test_inst;

pub use crate::frame::CELL_BYTES;
pub use crate::interface::*;
