// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test state tracking.
//!
//! Each distinct `(test id, route code)` pair gets a [`TestRecord`], which moves through
//! [`TestState::Unstarted`], [`TestState::InProgress`] and [`TestState::Finalized`]. Applying an
//! event to a record never fails: events that arrive too late are reported back as discards in
//! the [`ApplyOutcome`].

use crate::{
    event::{Attachment, RouteCode, TestEvent},
    tags::TagContext,
};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::{collections::BTreeSet, fmt, time::Duration};
use testmux_metadata::{DiscardReason, TestKeySummary, TestStatus};

/// Identifies a test occurrence: a test id as reported on one route.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TestKey {
    test_id: String,
    route_code: Option<RouteCode>,
}

impl TestKey {
    /// Creates a new key.
    pub fn new(test_id: impl Into<String>, route_code: Option<RouteCode>) -> Self {
        Self {
            test_id: test_id.into(),
            route_code,
        }
    }

    /// Returns the key for an event, or `None` if the event is about the run as a whole.
    pub fn for_event(event: &TestEvent) -> Option<Self> {
        event
            .test_id()
            .map(|test_id| Self::new(test_id, event.route_code().cloned()))
    }

    /// The test id.
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    /// The route code, if any.
    pub fn route_code(&self) -> Option<&RouteCode> {
        self.route_code.as_ref()
    }

    /// Returns this key in serializable form.
    pub fn to_summary(&self) -> TestKeySummary {
        TestKeySummary {
            test_id: self.test_id.clone(),
            route_code: self.route_code.as_ref().map(|route| route.as_str().to_owned()),
        }
    }
}

impl fmt::Display for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.route_code {
            Some(route_code) => write!(f, "{} [{route_code}]", self.test_id),
            None => f.write_str(&self.test_id),
        }
    }
}

/// The lifecycle state of a [`TestRecord`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestState {
    /// Only events with no status have been seen.
    Unstarted,

    /// The test reported `inprogress` and hasn't finished yet.
    InProgress,

    /// The test reached a final status. Terminal for this occurrence.
    Finalized(TestStatus),
}

impl TestState {
    /// Returns the final status, if the test has one.
    pub fn final_status(self) -> Option<TestStatus> {
        match self {
            Self::Finalized(status) => Some(status),
            Self::Unstarted | Self::InProgress => None,
        }
    }

    /// Returns true if the test reached a final status.
    pub fn is_finalized(self) -> bool {
        matches!(self, Self::Finalized(_))
    }
}

/// The accumulated content of one attachment.
#[derive(Clone, Debug)]
pub struct AttachmentBuffer {
    content: BytesMut,
    mime_type: SmolStr,
    eof: bool,
}

impl AttachmentBuffer {
    /// The bytes received so far.
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// The MIME type given by the first chunk.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// True once the end-of-file chunk arrived. Later chunks are discarded.
    pub fn is_closed(&self) -> bool {
        self.eof
    }
}

/// Attachments accumulated for a test (or for the run as a whole), by name, in arrival order.
#[derive(Clone, Debug, Default)]
pub struct AttachmentSet {
    buffers: IndexMap<String, AttachmentBuffer>,
    buffered_bytes: usize,
}

impl AttachmentSet {
    /// Returns the attachment with this name.
    pub fn get(&self, name: &str) -> Option<&AttachmentBuffer> {
        self.buffers.get(name)
    }

    /// Iterates over attachments in the order they were first seen.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttachmentBuffer)> {
        self.buffers
            .iter()
            .map(|(name, buffer)| (name.as_str(), buffer))
    }

    /// The number of attachments.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// True if there are no attachments.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// The total number of bytes buffered across all attachments.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    pub(crate) fn append(
        &mut self,
        chunk: &Attachment,
        max_bytes: Option<usize>,
    ) -> AttachmentOutcome {
        if self
            .buffers
            .get(chunk.name())
            .is_some_and(|buffer| buffer.eof)
        {
            return AttachmentOutcome::Discarded(DiscardReason::PostEofChunk);
        }

        let len = chunk.bytes().len();
        let over_budget = max_bytes.is_some_and(|max| self.buffered_bytes + len > max);
        if over_budget && !chunk.eof() {
            return AttachmentOutcome::Discarded(DiscardReason::OverBudget);
        }

        let buffer = self
            .buffers
            .entry(chunk.name().to_owned())
            .or_insert_with(|| AttachmentBuffer {
                content: BytesMut::new(),
                mime_type: SmolStr::new(chunk.mime_type()),
                eof: false,
            });
        if over_budget {
            // The bytes are dropped, but the producer's eof still closes the attachment.
            buffer.eof = true;
            return AttachmentOutcome::Discarded(DiscardReason::OverBudget);
        }
        buffer.content.extend_from_slice(chunk.bytes());
        self.buffered_bytes += len;

        if chunk.eof() {
            buffer.eof = true;
            AttachmentOutcome::Closed
        } else {
            AttachmentOutcome::Appended
        }
    }
}

/// What applying an event's status did to a record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transition {
    /// The test moved from unstarted to in progress.
    Started,

    /// The test was already in progress and reported `inprogress` again.
    Progress,

    /// The test reached this final status.
    Finalized(TestStatus),

    /// The status was discarded.
    Discarded(DiscardReason),
}

/// What applying an event's attachment chunk did to a record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttachmentOutcome {
    /// The chunk was appended.
    Appended,

    /// The chunk was appended and closed the attachment.
    Closed,

    /// The chunk was discarded.
    Discarded(DiscardReason),
}

/// The result of applying one event.
///
/// An event may carry a status, an attachment chunk, or both; each part has its own outcome.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ApplyOutcome {
    /// The outcome of the status part, or `None` if the status was `none`.
    pub transition: Option<Transition>,

    /// The outcome of the attachment part, or `None` if there was no attachment.
    pub attachment: Option<AttachmentOutcome>,
}

impl ApplyOutcome {
    /// Returns the final status this event moved the test to, if any.
    pub fn finalized(&self) -> Option<TestStatus> {
        match self.transition {
            Some(Transition::Finalized(status)) => Some(status),
            _ => None,
        }
    }

    /// Returns true if this event started the test.
    pub fn started(&self) -> bool {
        self.transition == Some(Transition::Started)
    }

    /// Iterates over the reasons any part of this event was discarded.
    pub fn discards(&self) -> impl Iterator<Item = DiscardReason> {
        let transition = match self.transition {
            Some(Transition::Discarded(reason)) => Some(reason),
            _ => None,
        };
        let attachment = match self.attachment {
            Some(AttachmentOutcome::Discarded(reason)) => Some(reason),
            _ => None,
        };
        transition.into_iter().chain(attachment)
    }
}

/// Limits applied to every record in a session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordLimits {
    /// The maximum number of attachment bytes buffered per record, or `None` for no limit.
    pub max_attachment_bytes: Option<usize>,
}

/// The state of one test occurrence.
#[derive(Clone, Debug)]
pub struct TestRecord {
    state: TestState,
    attachments: AttachmentSet,
    tags: BTreeSet<String>,
    runnable: bool,
    occurrence: usize,
    first_seen: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TestRecord {
    pub(crate) fn new(first_seen: DateTime<Utc>, occurrence: usize) -> Self {
        Self {
            state: TestState::Unstarted,
            attachments: AttachmentSet::default(),
            tags: BTreeSet::new(),
            runnable: true,
            occurrence,
            first_seen,
            started_at: None,
            finished_at: None,
        }
    }

    /// The current state.
    pub fn state(&self) -> TestState {
        self.state
    }

    /// The attachments accumulated so far.
    pub fn attachments(&self) -> &AttachmentSet {
        &self.attachments
    }

    /// The tags in effect when the test started or, once finalized, when it finished.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// False if the test was reported as not runnable on its own.
    pub fn runnable(&self) -> bool {
        self.runnable
    }

    /// Zero for the first occurrence of this key, incremented for each later occurrence.
    pub fn occurrence(&self) -> usize {
        self.occurrence
    }

    /// The producer timestamp of the first event for this record.
    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// The producer timestamp of the `inprogress` event that started the test.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// The producer timestamp of the finalizing event.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// How long the test took, measured with producer timestamps only.
    ///
    /// Measured from the start (or, if the test never reported `inprogress`, from the first
    /// event) to finalization. `None` if the test isn't finalized, or if the timestamps run
    /// backwards.
    pub fn duration(&self) -> Option<Duration> {
        let finished_at = self.finished_at?;
        let started_at = self.started_at.unwrap_or(self.first_seen);
        (finished_at - started_at).to_std().ok()
    }

    /// Applies an event to this record.
    ///
    /// The attachment chunk is applied before the status, so a finalizing event can carry the
    /// last chunk of an attachment.
    pub(crate) fn apply(
        &mut self,
        event: &TestEvent,
        tags: &TagContext,
        limits: &RecordLimits,
    ) -> ApplyOutcome {
        let attachment = event.attachment().map(|chunk| {
            if self.state.is_finalized() {
                AttachmentOutcome::Discarded(DiscardReason::PostFinalAttachment)
            } else {
                self.attachments.append(chunk, limits.max_attachment_bytes)
            }
        });
        let transition = self.apply_status(event, tags);

        ApplyOutcome {
            transition,
            attachment,
        }
    }

    fn apply_status(&mut self, event: &TestEvent, tags: &TagContext) -> Option<Transition> {
        let transition = match (self.state, event.status()) {
            (_, TestStatus::None) => return None,
            (TestState::Finalized(_), _) => {
                return Some(Transition::Discarded(DiscardReason::PostFinalStatus));
            }
            (TestState::InProgress, TestStatus::InProgress) => return Some(Transition::Progress),
            (TestState::Unstarted, TestStatus::InProgress) => {
                self.state = TestState::InProgress;
                self.started_at = Some(event.timestamp());
                Transition::Started
            }
            (TestState::Unstarted | TestState::InProgress, status) => {
                self.state = TestState::Finalized(status);
                self.finished_at = Some(event.timestamp());
                Transition::Finalized(status)
            }
        };

        self.tags = tags.snapshot();
        self.runnable = event.runnable();
        Some(transition)
    }
}
