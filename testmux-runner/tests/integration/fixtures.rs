// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use chrono::Utc;
use std::sync::Once;
use testmux_metadata::TestStatus;
use testmux_runner::{
    config::{DefaultConfigWarnings, MuxConfig},
    consumer::EventConsumer,
    event::{StatusReport, TestEvent},
    mux::StopHandle,
    session::RunSession,
    state::ApplyOutcome,
};

static INIT: Once = Once::new();

pub(crate) fn test_init() {
    INIT.call_once(|| {
        let _ = color_eyre::install();
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub(crate) fn mux_config(toml: &str) -> MuxConfig {
    MuxConfig::from_toml_str(toml, &mut DefaultConfigWarnings).expect("test config is valid")
}

/// A producer-stamped status event.
pub(crate) fn status(test_id: &str, status: TestStatus) -> TestEvent {
    StatusReport::for_test(test_id, status)
        .at(Utc::now())
        .build()
        .expect("valid report")
}

/// Requests a stop once `after` events have been applied.
pub(crate) struct StopAfter {
    pub(crate) after: usize,
    pub(crate) seen: usize,
    pub(crate) handle: StopHandle,
}

impl EventConsumer for StopAfter {
    fn event_applied(&mut self, _event: &TestEvent, _outcome: &ApplyOutcome, _session: &RunSession) {
        self.seen += 1;
        if self.seen == self.after {
            self.handle.stop();
        }
    }
}
