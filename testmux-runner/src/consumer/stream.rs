// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::EventConsumer;
use crate::{
    event::{RouteCode, TestEvent},
    session::RunSession,
    state::ApplyOutcome,
};
use itertools::Itertools;
use testmux_metadata::RunSummary;

/// An event as seen by a [`StreamRecorder`].
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    arrival: usize,
    event: TestEvent,
    outcome: ApplyOutcome,
}

impl RecordedEvent {
    /// The position of this event in the order events were applied, starting at zero.
    pub fn arrival(&self) -> usize {
        self.arrival
    }

    /// The event.
    pub fn event(&self) -> &TestEvent {
        &self.event
    }

    /// What applying the event did.
    pub fn outcome(&self) -> &ApplyOutcome {
        &self.outcome
    }

    /// Returns true if any part of the event was discarded.
    pub fn is_discarded(&self) -> bool {
        self.outcome.discards().next().is_some()
    }
}

/// Records every applied event, for consumers that want the stream itself rather than per-test
/// calls.
///
/// Events are kept in arrival order, which preserves the order within each route. Across routes,
/// [`in_timestamp_order`](Self::in_timestamp_order) gives a total order by producer timestamp.
#[derive(Clone, Debug, Default)]
pub struct StreamRecorder {
    events: Vec<RecordedEvent>,
    summary: Option<RunSummary>,
}

impl StreamRecorder {
    /// Creates a new, empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, in arrival order.
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    /// The number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no events were recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The route codes seen, in the order they first appeared.
    pub fn routes(&self) -> Vec<Option<&RouteCode>> {
        self.events
            .iter()
            .map(|recorded| recorded.event.route_code())
            .unique()
            .collect()
    }

    /// Events from one route, in arrival order.
    pub fn by_route<'a>(
        &'a self,
        route_code: Option<&'a RouteCode>,
    ) -> impl Iterator<Item = &'a RecordedEvent> + 'a {
        self.events
            .iter()
            .filter(move |recorded| recorded.event.route_code() == route_code)
    }

    /// All events ordered by timestamp, with ties broken by arrival order.
    pub fn in_timestamp_order(&self) -> Vec<&RecordedEvent> {
        // sorted_by_key is stable, and events are stored in arrival order.
        self.events
            .iter()
            .sorted_by_key(|recorded| recorded.event.timestamp())
            .collect()
    }

    /// Events with a discarded part, in arrival order.
    pub fn discarded(&self) -> impl Iterator<Item = &RecordedEvent> {
        self.events.iter().filter(|recorded| recorded.is_discarded())
    }

    /// The summary of the run, once it has stopped.
    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }
}

impl EventConsumer for StreamRecorder {
    fn event_applied(&mut self, event: &TestEvent, outcome: &ApplyOutcome, _session: &RunSession) {
        self.events.push(RecordedEvent {
            arrival: self.events.len(),
            event: event.clone(),
            outcome: *outcome,
        });
    }

    fn run_stopped(&mut self, session: &RunSession) {
        self.summary = Some(session.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StatusReport;
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use testmux_metadata::TestStatus;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(test_id: &str, status: TestStatus, route: &str, at: i64) -> TestEvent {
        StatusReport::for_test(test_id, status)
            .on_route(route)
            .at(ts(at))
            .build()
            .unwrap()
    }

    fn record(events: &[TestEvent]) -> (StreamRecorder, RunSession) {
        let mut session = RunSession::default();
        let mut recorder = StreamRecorder::new();
        session.start().unwrap();
        recorder.run_started(&session);
        for event in events {
            let outcome = session.apply(event).unwrap();
            recorder.event_applied(event, &outcome, &session);
        }
        session.stop().unwrap();
        recorder.run_stopped(&session);
        (recorder, session)
    }

    #[test]
    fn per_route_and_timestamp_views() {
        let (recorder, _) = record(&[
            event("a", TestStatus::InProgress, "r1", 2),
            event("b", TestStatus::InProgress, "r2", 1),
            event("a", TestStatus::Success, "r1", 4),
            event("b", TestStatus::Success, "r2", 2),
        ]);

        let r1 = RouteCode::new("r1");
        let r2 = RouteCode::new("r2");
        assert_eq!(recorder.routes(), vec![Some(&r1), Some(&r2)]);
        assert_eq!(
            recorder
                .by_route(Some(&r1))
                .map(RecordedEvent::arrival)
                .collect::<Vec<_>>(),
            vec![0, 2]
        );

        // The events at ts(2) tie, and arrival order breaks the tie.
        assert_eq!(
            recorder
                .in_timestamp_order()
                .into_iter()
                .map(RecordedEvent::arrival)
                .collect::<Vec<_>>(),
            vec![1, 0, 3, 2]
        );
    }

    #[test]
    fn discards_and_summary() {
        let (recorder, session) = record(&[
            event("a", TestStatus::Fail, "r1", 0),
            event("a", TestStatus::Success, "r1", 1),
            event("b", TestStatus::InProgress, "r1", 2),
        ]);

        assert_eq!(recorder.len(), 3);
        assert_eq!(
            recorder
                .discarded()
                .map(RecordedEvent::arrival)
                .collect::<Vec<_>>(),
            vec![1]
        );

        let summary = recorder.summary().expect("run stopped");
        assert_eq!(summary, &session.summary());
        assert_eq!(summary.discarded.post_final_status, 1);
        assert_eq!(summary.failed_or_hung.len(), 1);
        assert_eq!(summary.failed_or_hung[0].test_id, "b");
        assert!(!summary.successful);
    }
}
