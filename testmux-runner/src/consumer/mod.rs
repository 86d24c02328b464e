// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consumers of applied events.
//!
//! The dispatcher calls an [`EventConsumer`] after every event it applies to the session. Two
//! consumers are provided:
//!
//! * [`StreamRecorder`] keeps the full event stream, with per-route and timestamp-ordered views.
//! * [`LegacyAdapter`] drives a classic start/add/stop [`LegacyResult`].
//!
//! Use a pair, `(StreamRecorder, LegacyAdapter<R>)`, to drive both from one run.

mod legacy;
mod stream;

pub use legacy::*;
pub use stream::*;

use crate::{event::TestEvent, session::RunSession, state::ApplyOutcome};

/// Receives events as the session applies them.
pub trait EventConsumer {
    /// Called once the session has started, before any event is applied.
    fn run_started(&mut self, session: &RunSession) {
        let _ = session;
    }

    /// Called after `event` was applied to `session`, with the outcome of applying it.
    ///
    /// Discarded events are passed through too; check `outcome` to tell them apart.
    fn event_applied(&mut self, event: &TestEvent, outcome: &ApplyOutcome, session: &RunSession);

    /// Called once the session has stopped. The failed-or-hung set is final at this point.
    fn run_stopped(&mut self, session: &RunSession) {
        let _ = session;
    }
}

impl<C: EventConsumer + ?Sized> EventConsumer for &mut C {
    fn run_started(&mut self, session: &RunSession) {
        (**self).run_started(session);
    }

    fn event_applied(&mut self, event: &TestEvent, outcome: &ApplyOutcome, session: &RunSession) {
        (**self).event_applied(event, outcome, session);
    }

    fn run_stopped(&mut self, session: &RunSession) {
        (**self).run_stopped(session);
    }
}

impl<A: EventConsumer, B: EventConsumer> EventConsumer for (A, B) {
    fn run_started(&mut self, session: &RunSession) {
        self.0.run_started(session);
        self.1.run_started(session);
    }

    fn event_applied(&mut self, event: &TestEvent, outcome: &ApplyOutcome, session: &RunSession) {
        self.0.event_applied(event, outcome, session);
        self.1.event_applied(event, outcome, session);
    }

    fn run_stopped(&mut self, session: &RunSession) {
        self.0.run_stopped(session);
        self.1.run_stopped(session);
    }
}
