// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::DispatcherContext;
use crate::{
    config::MuxConfig,
    consumer::EventConsumer,
    errors::{MuxError, SessionError, SubmitError},
    event::{RouteCode, TestEvent},
    session::RunSession,
};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::sync::{
    Notify,
    mpsc::{self, Receiver, Sender, error::TrySendError},
};
use tracing::debug;

/// Merges events from concurrent producers into one run session.
///
/// Register producers first, hand them to the tasks that report events, then [`run`](Self::run)
/// the multiplexer. The run ends when every producer has been dropped, or early when a
/// [`StopHandle`] asks it to.
///
/// All producers share one bounded channel, so events from one route are applied in the order
/// they were submitted.
#[derive(Debug)]
pub struct Multiplexer {
    session: RunSession,
    sender: Sender<TestEvent>,
    receiver: Receiver<TestEvent>,
    submit_timeout: Duration,
    routes: BTreeSet<RouteCode>,
    next_route: usize,
    stop: Arc<Notify>,
}

impl Multiplexer {
    /// Creates a new multiplexer with a fresh session.
    pub fn new(config: &MuxConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.channel_capacity());
        Self {
            session: RunSession::new(config.session_settings()),
            sender,
            receiver,
            submit_timeout: config.submit_timeout(),
            routes: BTreeSet::new(),
            next_route: 0,
            stop: Arc::new(Notify::new()),
        }
    }

    /// Registers a producer with this route code.
    ///
    /// Every event the producer submits is stamped with the route code, so identical test ids
    /// from different producers stay apart.
    pub fn producer(&mut self, route_code: impl Into<RouteCode>) -> Result<Producer, MuxError> {
        let route_code = route_code.into();
        if !self.routes.insert(route_code.clone()) {
            return Err(MuxError::DuplicateRoute { route_code });
        }
        debug!(%route_code, "registered producer");
        Ok(self.make_producer(Some(route_code)))
    }

    /// Registers a producer with the lowest numeric route code not yet in use.
    pub fn next_producer(&mut self) -> Producer {
        loop {
            let route_code = RouteCode::new(self.next_route.to_string());
            self.next_route += 1;
            if let Ok(producer) = self.producer(route_code) {
                return producer;
            }
        }
    }

    /// Creates a producer that leaves route codes as submitted.
    ///
    /// Events from unrouted producers that carry the same test id and no route code are treated
    /// as the same test. Route codes from unrouted producers aren't checked against registered
    /// routes either: an unrouted event carrying `r1` updates the same record as an event from
    /// the producer registered as `r1`.
    pub fn unrouted_producer(&self) -> Producer {
        self.make_producer(None)
    }

    /// Returns a handle that can stop the run early.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
        }
    }

    /// Starts the session and applies events until every producer is dropped or a stop is
    /// requested, then stops the session.
    ///
    /// `consumer` sees every applied event, then the stopped session.
    pub async fn run<C: EventConsumer>(self, consumer: &mut C) -> Result<MuxOutcome, SessionError> {
        let Self {
            session,
            sender,
            receiver,
            stop,
            ..
        } = self;
        // Only producers keep the channel open.
        drop(sender);

        let mut dispatcher_cx = DispatcherContext::new(session, consumer);
        dispatcher_cx.run_started()?;
        dispatcher_cx.run(receiver, &stop).await
    }

    fn make_producer(&self, route_code: Option<RouteCode>) -> Producer {
        Producer {
            route_code,
            sender: self.sender.clone(),
            submit_timeout: self.submit_timeout,
        }
    }
}

/// What a finished [`Multiplexer::run`] produced.
#[derive(Debug)]
pub struct MuxOutcome {
    /// The stopped session.
    pub session: RunSession,

    /// True if the run was stopped through a [`StopHandle`].
    pub cancelled: bool,

    /// The number of events that were still queued when the run stopped, and were not applied.
    ///
    /// This includes events from submits that had already reserved queue space when the stop
    /// took effect.
    pub rejected_after_stop: usize,
}

/// Stops a running [`Multiplexer`] early.
///
/// A stop requested before the multiplexer starts running takes effect as soon as it does.
#[derive(Clone, Debug)]
pub struct StopHandle {
    stop: Arc<Notify>,
}

impl StopHandle {
    /// Requests that the run stop.
    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Submits events to a [`Multiplexer`] on behalf of one producer.
#[derive(Debug)]
pub struct Producer {
    route_code: Option<RouteCode>,
    sender: Sender<TestEvent>,
    submit_timeout: Duration,
}

impl Producer {
    /// The route code stamped on this producer's events.
    pub fn route_code(&self) -> Option<&RouteCode> {
        self.route_code.as_ref()
    }

    /// Returns true if the run has stopped and no longer accepts events.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Submits an event, waiting up to the configured submit timeout for queue space.
    pub async fn submit(&self, event: TestEvent) -> Result<(), SubmitError> {
        let event = self.route(event);
        match tokio::time::timeout(self.submit_timeout, self.sender.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(event);
                Ok(())
            }
            Ok(Err(_)) => Err(SubmitError::Closed {
                event: Box::new(event),
            }),
            Err(_) => Err(SubmitError::Timeout {
                event: Box::new(event),
                timeout: self.submit_timeout,
            }),
        }
    }

    /// Submits an event without waiting.
    pub fn try_submit(&self, event: TestEvent) -> Result<(), SubmitError> {
        self.sender
            .try_send(self.route(event))
            .map_err(|error| match error {
                TrySendError::Full(event) => SubmitError::Full {
                    event: Box::new(event),
                },
                TrySendError::Closed(event) => SubmitError::Closed {
                    event: Box::new(event),
                },
            })
    }

    fn route(&self, event: TestEvent) -> TestEvent {
        let Some(outer) = &self.route_code else {
            return event;
        };
        let route_code = match event.route_code() {
            Some(inner) => outer.nest(inner),
            None => outer.clone(),
        };
        event.with_route_code(Some(route_code))
    }
}
