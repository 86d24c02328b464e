// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::EventConsumer;
use crate::{
    event::{TestEvent, TimestampSource},
    session::RunSession,
    state::{ApplyOutcome, AttachmentSet, TestKey, Transition},
    tags::TagContext,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::collections::BTreeSet;
use testmux_metadata::TestStatus;
use tracing::debug;

/// The name of the detail that carries a skip reason, or the reason a test was reported as an
/// error.
pub const REASON_DETAIL: &str = "reason";

/// One named piece of content attached to a legacy outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Detail {
    mime_type: SmolStr,
    content: Bytes,
}

impl Detail {
    /// Creates a new detail.
    pub fn new(mime_type: impl AsRef<str>, content: impl Into<Bytes>) -> Self {
        Self {
            mime_type: SmolStr::new(mime_type),
            content: content.into(),
        }
    }

    /// Creates a `text/plain` detail.
    pub fn text_plain(text: impl Into<String>) -> Self {
        Self::new("text/plain; charset=utf8", text.into())
    }

    /// The detail's MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The detail's content.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// The content as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

/// The details passed with a legacy outcome, by name, in the order the attachments were first
/// seen.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Details {
    entries: IndexMap<String, Detail>,
}

impl Details {
    /// Creates an empty set of details.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies out every attachment in `attachments`.
    pub fn from_attachments(attachments: &AttachmentSet) -> Self {
        let entries = attachments
            .iter()
            .map(|(name, buffer)| {
                let content = Bytes::copy_from_slice(buffer.content());
                (name.to_owned(), Detail::new(buffer.mime_type(), content))
            })
            .collect();
        Self { entries }
    }

    /// Adds or replaces a detail.
    pub fn insert(&mut self, name: impl Into<String>, detail: Detail) {
        self.entries.insert(name.into(), detail);
    }

    /// Returns the detail with this name.
    pub fn get(&self, name: &str) -> Option<&Detail> {
        self.entries.get(name)
    }

    /// Iterates over details in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Detail)> {
        self.entries
            .iter()
            .map(|(name, detail)| (name.as_str(), detail))
    }

    /// The number of details.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no details.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A classic per-test result object: `start_test`, one `add_*` outcome, `stop_test`.
///
/// Legacy results only know test ids, so the same id reported on two routes shows up as two
/// separate tests with the same name.
pub trait LegacyResult {
    /// A test is about to report its outcome.
    fn start_test(&mut self, test_id: &str);

    /// The test has finished reporting.
    fn stop_test(&mut self, test_id: &str);

    /// The test passed. Also used for tests that were only enumerated.
    fn add_success(&mut self, test_id: &str, details: &Details);

    /// The test failed.
    fn add_failure(&mut self, test_id: &str, details: &Details);

    /// The test could not complete, for example because the run stopped while it was in progress.
    fn add_error(&mut self, test_id: &str, details: &Details);

    /// The test was skipped, with the reason if one was attached.
    fn add_skip(&mut self, test_id: &str, reason: Option<&str>, details: &Details);

    /// The test failed, as expected.
    fn add_expected_failure(&mut self, test_id: &str, details: &Details);

    /// The test passed, but was expected to fail.
    fn add_unexpected_success(&mut self, test_id: &str, details: &Details);

    /// Returns true if nothing has gone wrong so far.
    fn was_successful(&self) -> bool;

    /// Tags were added or removed for subsequent tests.
    fn tags(&mut self, new_tags: &BTreeSet<String>, gone_tags: &BTreeSet<String>);

    /// Reports the current time, as seen by the producer.
    fn time(&mut self, timestamp: DateTime<Utc>);
}

/// Drives a [`LegacyResult`] from the applied event stream.
///
/// `start_test` is called when a test reports `inprogress`, and synthesized just before the
/// outcome for tests that never did. Each test gets exactly one `add_*` call, followed by
/// `stop_test`. Tests left in progress when the run stops are reported through `add_error`.
#[derive(Debug)]
pub struct LegacyAdapter<R> {
    result: R,
    started: BTreeSet<TestKey>,
}

impl<R: LegacyResult> LegacyAdapter<R> {
    /// Creates a new adapter around `result`.
    pub fn new(result: R) -> Self {
        Self {
            result,
            started: BTreeSet::new(),
        }
    }

    /// Returns the wrapped result.
    pub fn result(&self) -> &R {
        &self.result
    }

    /// Consumes the adapter, returning the wrapped result.
    pub fn into_result(self) -> R {
        self.result
    }

    fn ensure_started(&mut self, key: &TestKey) {
        if !self.started.remove(key) {
            debug!(test = %key, "synthesizing start_test before outcome");
            self.result.start_test(key.test_id());
        }
    }

    fn report(&mut self, key: &TestKey, status: TestStatus, details: &Details) {
        let test_id = key.test_id();
        match status {
            TestStatus::Success | TestStatus::Exists => self.result.add_success(test_id, details),
            TestStatus::Fail => self.result.add_failure(test_id, details),
            TestStatus::Skip => {
                let reason = details.get(REASON_DETAIL).and_then(Detail::text);
                self.result.add_skip(test_id, reason, details);
            }
            TestStatus::Xfail => self.result.add_expected_failure(test_id, details),
            TestStatus::UxSuccess => self.result.add_unexpected_success(test_id, details),
            TestStatus::None | TestStatus::InProgress => {
                // Transitions only finalize on final statuses.
                return;
            }
        }
        self.result.stop_test(test_id);
    }
}

impl<R: LegacyResult> EventConsumer for LegacyAdapter<R> {
    fn event_applied(&mut self, event: &TestEvent, outcome: &ApplyOutcome, session: &RunSession) {
        if event.timestamp_source() == TimestampSource::Producer {
            self.result.time(event.timestamp());
        }
        if event.changes_tags() {
            self.result.tags(event.tags_added(), event.tags_removed());
        }

        let Some(key) = TestKey::for_event(event) else {
            return;
        };

        match outcome.transition {
            Some(Transition::Started) if event.attachment().is_none() => {
                self.result.start_test(key.test_id());
                self.started.insert(key);
            }
            Some(Transition::Finalized(status)) => {
                self.ensure_started(&key);
                let details = session
                    .record(&key)
                    .map(|record| Details::from_attachments(record.attachments()))
                    .unwrap_or_default();
                self.report(&key, status, &details);
            }
            _ => {}
        }
    }

    fn run_stopped(&mut self, session: &RunSession) {
        for key in session.failed_or_hung() {
            self.ensure_started(key);
            let mut details = session
                .record(key)
                .map(|record| Details::from_attachments(record.attachments()))
                .unwrap_or_default();
            details.insert(
                REASON_DETAIL,
                Detail::text_plain("test did not finish before the run stopped"),
            );
            debug!(test = %key, "reporting failed-or-hung test as an error");
            self.result.add_error(key.test_id(), &details);
            self.result.stop_test(key.test_id());
        }
        self.started.clear();
    }
}

/// How a test collected by a [`LegacyCollector`] finished.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CollectedOutcome {
    /// `add_success`.
    Success,

    /// `add_failure`.
    Failure,

    /// `add_error`.
    Error,

    /// `add_skip`, with the reason.
    Skip {
        /// The skip reason, if one was given.
        reason: Option<String>,
    },

    /// `add_expected_failure`.
    ExpectedFailure,

    /// `add_unexpected_success`.
    UnexpectedSuccess,
}

impl CollectedOutcome {
    /// Returns true if this outcome makes the run unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure | Self::Error | Self::UnexpectedSuccess)
    }
}

/// A test recorded by a [`LegacyCollector`].
#[derive(Clone, Debug)]
pub struct CollectedTest {
    /// The test id.
    pub test_id: String,

    /// How the test finished.
    pub outcome: CollectedOutcome,

    /// The details passed with the outcome.
    pub details: Details,

    /// The tags in effect when the outcome was reported.
    pub tags: BTreeSet<String>,
}

/// A [`LegacyResult`] that keeps everything it's told, like a classic test result object.
///
/// Tag changes made while a test is running apply to that test only: each `start_test` opens a
/// tag scope that the matching `stop_test` closes. Once every started test has stopped, the tags
/// are back to what they were before the first of them started.
#[derive(Clone, Debug, Default)]
pub struct LegacyCollector {
    tests_run: usize,
    tests: Vec<CollectedTest>,
    tags: TagContext,
    open_tests: Vec<String>,
    last_time: Option<DateTime<Utc>>,
}

impl LegacyCollector {
    /// Creates a new, empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of `start_test` calls.
    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    /// Every outcome, in the order it was reported.
    pub fn tests(&self) -> &[CollectedTest] {
        &self.tests
    }

    /// Outcomes reported through `add_failure`.
    pub fn failures(&self) -> impl Iterator<Item = &CollectedTest> {
        self.with_outcome(|outcome| *outcome == CollectedOutcome::Failure)
    }

    /// Outcomes reported through `add_error`.
    pub fn errors(&self) -> impl Iterator<Item = &CollectedTest> {
        self.with_outcome(|outcome| *outcome == CollectedOutcome::Error)
    }

    /// Outcomes reported through `add_skip`.
    pub fn skips(&self) -> impl Iterator<Item = &CollectedTest> {
        self.with_outcome(|outcome| matches!(outcome, CollectedOutcome::Skip { .. }))
    }

    /// Outcomes reported through `add_expected_failure`.
    pub fn expected_failures(&self) -> impl Iterator<Item = &CollectedTest> {
        self.with_outcome(|outcome| *outcome == CollectedOutcome::ExpectedFailure)
    }

    /// Outcomes reported through `add_unexpected_success`.
    pub fn unexpected_successes(&self) -> impl Iterator<Item = &CollectedTest> {
        self.with_outcome(|outcome| *outcome == CollectedOutcome::UnexpectedSuccess)
    }

    /// The tags currently in effect.
    pub fn current_tags(&self) -> &BTreeSet<String> {
        self.tags.current()
    }

    /// The last time reported through `time`.
    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }

    fn with_outcome(
        &self,
        pred: impl Fn(&CollectedOutcome) -> bool,
    ) -> impl Iterator<Item = &CollectedTest> {
        self.tests.iter().filter(move |test| pred(&test.outcome))
    }

    fn push(&mut self, test_id: &str, outcome: CollectedOutcome, details: &Details) {
        self.tests.push(CollectedTest {
            test_id: test_id.to_owned(),
            outcome,
            details: details.clone(),
            tags: self.tags.snapshot(),
        });
    }
}

impl LegacyResult for LegacyCollector {
    fn start_test(&mut self, test_id: &str) {
        self.tests_run += 1;
        self.tags.push_scope();
        self.open_tests.push(test_id.to_owned());
    }

    fn stop_test(&mut self, test_id: &str) {
        // Tests may stop in any order, so close one scope per matching start.
        if let Some(pos) = self.open_tests.iter().rposition(|open| open == test_id) {
            self.open_tests.remove(pos);
            self.tags.pop_scope();
        }
    }

    fn add_success(&mut self, test_id: &str, details: &Details) {
        self.push(test_id, CollectedOutcome::Success, details);
    }

    fn add_failure(&mut self, test_id: &str, details: &Details) {
        self.push(test_id, CollectedOutcome::Failure, details);
    }

    fn add_error(&mut self, test_id: &str, details: &Details) {
        self.push(test_id, CollectedOutcome::Error, details);
    }

    fn add_skip(&mut self, test_id: &str, reason: Option<&str>, details: &Details) {
        let reason = reason.map(ToOwned::to_owned);
        self.push(test_id, CollectedOutcome::Skip { reason }, details);
    }

    fn add_expected_failure(&mut self, test_id: &str, details: &Details) {
        self.push(test_id, CollectedOutcome::ExpectedFailure, details);
    }

    fn add_unexpected_success(&mut self, test_id: &str, details: &Details) {
        self.push(test_id, CollectedOutcome::UnexpectedSuccess, details);
    }

    fn was_successful(&self) -> bool {
        !self.tests.iter().any(|test| test.outcome.is_failure())
    }

    fn tags(&mut self, new_tags: &BTreeSet<String>, gone_tags: &BTreeSet<String>) {
        self.tags.apply(new_tags, gone_tags);
    }

    fn time(&mut self, timestamp: DateTime<Utc>) {
        self.last_time = Some(timestamp);
    }
}
