// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The run session: brackets a test run and owns every test record in it.
//!
//! A session is driven by exactly one owner at a time, usually the
//! [`Multiplexer`](crate::mux::Multiplexer)'s dispatcher. Events are only accepted between
//! [`RunSession::start`] and [`RunSession::stop`]; stopping computes the failed-or-hung set, the
//! tests that started but never finished.

use crate::{
    errors::{SessionError, SessionOp},
    event::{RouteCode, TestEvent},
    state::{ApplyOutcome, AttachmentSet, RecordLimits, TestKey, TestRecord, TestState},
    tags::TagContext,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, btree_map::Entry};
use testmux_metadata::{DiscardCounts, RunSummary, StatusCounts, TestStatus};
use tracing::debug;

/// What to do when a finalized test reports another status.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalizedPolicy {
    /// Count the event as discarded and leave the record unchanged.
    #[default]
    Discard,

    /// Treat the event as the start of a new occurrence of the test, for example a retry that
    /// reuses the test id and route. The finished record moves to
    /// [`RunSession::superseded`].
    NewOccurrence,
}

/// Settings for a [`RunSession`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionSettings {
    /// What to do when a finalized test reports another status.
    pub finalized_policy: FinalizedPolicy,

    /// Limits applied to each record.
    pub limits: RecordLimits,
}

/// The lifecycle phase of a [`RunSession`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    /// Not started yet.
    Idle,

    /// Accepting events.
    Running,

    /// Stopped. No further events are accepted.
    Stopped,
}

/// Tests that started but never reached a final status before the run stopped.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FailedOrHung {
    keys: BTreeSet<TestKey>,
}

impl FailedOrHung {
    /// Returns true if this key is in the set.
    pub fn contains(&self, key: &TestKey) -> bool {
        self.keys.contains(key)
    }

    /// Iterates over the keys in the set, in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &TestKey> {
        self.keys.iter()
    }

    /// The number of tests in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if every started test finished.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<'a> IntoIterator for &'a FailedOrHung {
    type Item = &'a TestKey;
    type IntoIter = std::collections::btree_set::Iter<'a, TestKey>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.iter()
    }
}

/// A test run: the window in which events are valid, and the state of every test seen in it.
#[derive(Clone, Debug)]
pub struct RunSession {
    settings: SessionSettings,
    phase: SessionPhase,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    tags: TagContext,
    records: BTreeMap<TestKey, TestRecord>,
    run_attachments: BTreeMap<Option<RouteCode>, AttachmentSet>,
    superseded: Vec<(TestKey, TestRecord)>,
    discards: DiscardCounts,
    failed_or_hung: FailedOrHung,
}

impl Default for RunSession {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

impl RunSession {
    /// Creates a new, idle session.
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            phase: SessionPhase::Idle,
            started_at: None,
            stopped_at: None,
            tags: TagContext::new(),
            records: BTreeMap::new(),
            run_attachments: BTreeMap::new(),
            superseded: Vec::new(),
            discards: DiscardCounts::default(),
            failed_or_hung: FailedOrHung::default(),
        }
    }

    /// Starts the run.
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Idle => {
                self.phase = SessionPhase::Running;
                self.started_at = Some(Utc::now());
                self.tags = TagContext::new();
                debug!("test run started");
                Ok(())
            }
            SessionPhase::Running => Err(SessionError::AlreadyStarted {
                op: SessionOp::Start,
            }),
            SessionPhase::Stopped => Err(SessionError::AlreadyStopped {
                op: SessionOp::Start,
            }),
        }
    }

    /// Applies an event to the record for its `(test id, route code)`.
    ///
    /// Tag changes carried by the event are applied to the tag context first, so they cover the
    /// event's own test. Late events are not errors: they show up as discards in the returned
    /// outcome and in [`discards`](Self::discards).
    pub fn apply(&mut self, event: &TestEvent) -> Result<ApplyOutcome, SessionError> {
        self.check_running(SessionOp::Apply)?;

        self.tags.apply(event.tags_added(), event.tags_removed());

        let outcome = match TestKey::for_event(event) {
            Some(key) => self.apply_to_record(key, event),
            None => self.apply_to_run(event),
        };

        for reason in outcome.discards() {
            self.discards.record(reason);
            debug!(
                test_id = ?event.test_id(),
                route_code = ?event.route_code(),
                status = %event.status(),
                %reason,
                "discarded late event",
            );
        }

        Ok(outcome)
    }

    /// Changes the tag context directly, outside of any event.
    pub fn change_tags(
        &mut self,
        new_tags: &BTreeSet<String>,
        gone_tags: &BTreeSet<String>,
    ) -> Result<(), SessionError> {
        self.check_running(SessionOp::Tags)?;
        self.tags.apply(new_tags, gone_tags);
        Ok(())
    }

    /// Stops the run and returns the failed-or-hung set.
    ///
    /// Stopping is idempotent: later calls return the set computed by the first one.
    pub fn stop(&mut self) -> Result<&FailedOrHung, SessionError> {
        match self.phase {
            SessionPhase::Idle => {
                return Err(SessionError::NotStarted {
                    op: SessionOp::Stop,
                });
            }
            SessionPhase::Running => {
                let keys = self
                    .records
                    .iter()
                    .filter(|(_, record)| record.state() == TestState::InProgress)
                    .map(|(key, _)| key.clone())
                    .collect();
                self.failed_or_hung = FailedOrHung { keys };
                self.phase = SessionPhase::Stopped;
                self.stopped_at = Some(Utc::now());
                self.tags = TagContext::new();
                debug!(
                    records = self.records.len(),
                    failed_or_hung = self.failed_or_hung.len(),
                    discarded = self.discards.total(),
                    "test run stopped",
                );
            }
            SessionPhase::Stopped => {}
        }

        Ok(&self.failed_or_hung)
    }

    /// Returns true if no test has failed so far and, once stopped, no test was left hanging.
    ///
    /// Only the latest occurrence of each test counts.
    pub fn was_successful(&self) -> bool {
        let any_failed = self.records.values().any(|record| {
            record
                .state()
                .final_status()
                .is_some_and(TestStatus::is_failure)
        });
        !any_failed && self.failed_or_hung.is_empty()
    }

    /// The session's current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// When the session was started, by the consumer's clock.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// When the session was stopped, by the consumer's clock.
    pub fn stopped_at(&self) -> Option<DateTime<Utc>> {
        self.stopped_at
    }

    /// The tag context. Empty before start and after stop.
    pub fn tags(&self) -> &TagContext {
        &self.tags
    }

    /// The failed-or-hung set. Empty until the session is stopped.
    pub fn failed_or_hung(&self) -> &FailedOrHung {
        &self.failed_or_hung
    }

    /// Returns the record for this key.
    pub fn record(&self, key: &TestKey) -> Option<&TestRecord> {
        self.records.get(key)
    }

    /// Returns the record for this test id and route code.
    pub fn get(&self, test_id: &str, route_code: Option<&str>) -> Option<&TestRecord> {
        self.records
            .get(&TestKey::new(test_id, route_code.map(RouteCode::new)))
    }

    /// Iterates over all current records, sorted by key.
    pub fn records(&self) -> impl Iterator<Item = (&TestKey, &TestRecord)> {
        self.records.iter()
    }

    /// Attachments reported for the run as a whole on this route.
    pub fn run_attachments(&self, route_code: Option<&RouteCode>) -> Option<&AttachmentSet> {
        self.run_attachments.get(&route_code.cloned())
    }

    /// Earlier occurrences replaced under [`FinalizedPolicy::NewOccurrence`], oldest first.
    pub fn superseded(&self) -> &[(TestKey, TestRecord)] {
        &self.superseded
    }

    /// Counts of discarded events.
    pub fn discards(&self) -> &DiscardCounts {
        &self.discards
    }

    /// Summarizes the session in serializable form.
    pub fn summary(&self) -> RunSummary {
        let mut counts = StatusCounts::default();
        for status in self
            .records
            .values()
            .filter_map(|record| record.state().final_status())
        {
            counts.record(status);
        }

        RunSummary {
            counts,
            failed_or_hung: self.failed_or_hung.iter().map(TestKey::to_summary).collect(),
            discarded: self.discards,
            superseded: self.superseded.len(),
            successful: self.was_successful(),
        }
    }

    // ---
    // Helper methods
    // ---

    fn check_running(&self, op: SessionOp) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Running => Ok(()),
            SessionPhase::Idle => Err(SessionError::NotStarted { op }),
            SessionPhase::Stopped => Err(SessionError::AlreadyStopped { op }),
        }
    }

    fn apply_to_record(&mut self, key: TestKey, event: &TestEvent) -> ApplyOutcome {
        let Self {
            settings,
            tags,
            records,
            superseded,
            ..
        } = self;

        let record = match records.entry(key) {
            Entry::Vacant(entry) => entry.insert(TestRecord::new(event.timestamp(), 0)),
            Entry::Occupied(entry) => {
                let starts_new_occurrence = settings.finalized_policy
                    == FinalizedPolicy::NewOccurrence
                    && entry.get().state().is_finalized()
                    && event.status() != TestStatus::None;
                if starts_new_occurrence {
                    let key = entry.key().clone();
                    let record = entry.into_mut();
                    let next = TestRecord::new(event.timestamp(), record.occurrence() + 1);
                    debug!(
                        test = %key,
                        occurrence = next.occurrence(),
                        "finalized test reported again, starting a new occurrence",
                    );
                    superseded.push((key, std::mem::replace(record, next)));
                    record
                } else {
                    entry.into_mut()
                }
            }
        };

        record.apply(event, tags, &settings.limits)
    }

    fn apply_to_run(&mut self, event: &TestEvent) -> ApplyOutcome {
        // Events for the run as a whole carry no status (enforced when the event is built), so
        // only the attachment matters.
        let attachment = event.attachment().map(|chunk| {
            self.run_attachments
                .entry(event.route_code().cloned())
                .or_default()
                .append(chunk, self.settings.limits.max_attachment_bytes)
        });

        ApplyOutcome {
            transition: None,
            attachment,
        }
    }
}
