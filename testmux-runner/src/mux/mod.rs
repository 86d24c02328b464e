// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The multiplexer.
//!
//! The main structure in this module is [`Multiplexer`]. Concurrent producers each hold a
//! [`Producer`] with its own route code; a single dispatcher applies their events to the run
//! session in arrival order.

mod dispatcher;
mod imp;

use dispatcher::DispatcherContext;
pub use imp::*;
