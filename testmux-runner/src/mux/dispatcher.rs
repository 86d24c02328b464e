// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher: the single owner of the run session while the multiplexer runs.
//!
//! It receives events from producers and stop requests from [`StopHandle`]s, applies events to
//! the session, and forwards every outcome to the consumer.
//!
//! [`StopHandle`]: super::StopHandle

use super::MuxOutcome;
use crate::{
    consumer::EventConsumer, errors::SessionError, event::TestEvent, session::RunSession,
};
use debug_ignore::DebugIgnore;
use tokio::sync::{Notify, mpsc::Receiver};
use tracing::debug;

#[derive(Debug)]
pub(super) struct DispatcherContext<'a, C> {
    consumer: DebugIgnore<&'a mut C>,
    session: RunSession,
    applied: usize,
}

impl<'a, C> DispatcherContext<'a, C>
where
    C: EventConsumer,
{
    pub(super) fn new(session: RunSession, consumer: &'a mut C) -> Self {
        Self {
            consumer: DebugIgnore(consumer),
            session,
            applied: 0,
        }
    }

    pub(super) fn run_started(&mut self) -> Result<(), SessionError> {
        self.session.start()?;
        self.consumer.run_started(&self.session);
        Ok(())
    }

    /// Runs until every producer is gone or a stop is requested, then stops the session.
    ///
    /// Stop requests take priority over queued events: once a stop is seen, nothing else is
    /// applied.
    pub(super) async fn run(
        mut self,
        mut event_rx: Receiver<TestEvent>,
        stop: &Notify,
    ) -> Result<MuxOutcome, SessionError> {
        let cancelled = loop {
            tokio::select! {
                biased;

                () = stop.notified() => {
                    debug!(applied = self.applied, "stop requested, stopping the test run");
                    break true;
                }
                event = event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(&event)?,
                        None => {
                            // All producers have been dropped.
                            debug!(applied = self.applied, "all producers finished");
                            break false;
                        }
                    }
                }
            }
        };

        // Producers see SubmitError::Closed from here on. A submit that reserved its slot before
        // the close still sends, and recv only returns None once every such slot is used.
        event_rx.close();
        let mut rejected_after_stop = 0;
        while event_rx.recv().await.is_some() {
            rejected_after_stop += 1;
        }
        if rejected_after_stop > 0 {
            debug!(
                rejected = rejected_after_stop,
                "events queued after stop were not applied"
            );
        }

        self.session.stop()?;
        self.consumer.run_stopped(&self.session);

        Ok(MuxOutcome {
            session: self.session,
            cancelled,
            rejected_after_stop,
        })
    }

    fn handle_event(&mut self, event: &TestEvent) -> Result<(), SessionError> {
        let outcome = self.session.apply(event)?;
        self.applied += 1;
        self.consumer.event_applied(event, &outcome, &self.session);
        Ok(())
    }
}
