// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to testmux statuses and run summaries.
//!
//! These types are shared between the runner, which produces them, and any tooling that wants to
//! consume a finished run without linking the runner.

mod errors;
#[cfg(feature = "proptest1")]
mod proptest_helpers;
mod status;
mod summary;

pub use errors::*;
pub use status::*;
pub use summary::*;
