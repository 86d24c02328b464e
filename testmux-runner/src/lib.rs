// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Multiplexing and per-test state tracking for streams of test status events.
//!
//! Producers report [`TestEvent`](event::TestEvent)s, each a status change or a chunk of an
//! attachment for one test. The [`Multiplexer`](mux::Multiplexer) merges events from concurrent
//! producers, keeping them apart by route code, and applies them to a
//! [`RunSession`](session::RunSession), which tracks every test through
//! unstarted, in progress and finalized. Consumers see every applied event: the
//! [`StreamRecorder`](consumer::StreamRecorder) keeps the stream itself, and the
//! [`LegacyAdapter`](consumer::LegacyAdapter) drives a classic start/add/stop result object.

pub mod config;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod mux;
pub mod session;
pub mod state;
pub mod tags;
