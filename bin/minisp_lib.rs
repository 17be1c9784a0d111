/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

//! The test harness of the single-path reduction, as a library, so that the
//! fuzz targets can use it.

pub mod fuzzing;
pub mod test_cases;
pub mod test_framework;
pub mod validator;
