// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event model: one immutable value per status change or attachment chunk.
//!
//! Events are built from a [`StatusReport`], a plain struct with one named field per parameter of
//! the protocol's `status` call. Building validates the report and produces a [`TestEvent`] whose
//! fields can no longer change.

use crate::errors::EventBuildError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use smol_str::SmolStr;
use std::{collections::BTreeSet, fmt};
use testmux_metadata::TestStatus;
use tracing::warn;

/// The MIME type assumed for attachments that don't specify one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Identifies the producer an event came from.
///
/// Route codes keep identical test ids reported by different concurrent producers apart.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RouteCode(SmolStr);

impl RouteCode {
    /// Creates a new route code.
    pub fn new(route_code: impl AsRef<str>) -> Self {
        Self(SmolStr::new(route_code))
    }

    /// Returns the route code as a string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the route code for `inner`, as seen through this route.
    ///
    /// Multiplexers compose: an event that already carries a route from a downstream multiplexer
    /// keeps it as a suffix.
    pub fn nest(&self, inner: &RouteCode) -> RouteCode {
        Self(SmolStr::new(format!("{}/{}", self.0, inner.0)))
    }
}

impl fmt::Display for RouteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RouteCode {
    fn from(route_code: &str) -> Self {
        Self::new(route_code)
    }
}

impl From<String> for RouteCode {
    fn from(route_code: String) -> Self {
        Self(SmolStr::from(route_code))
    }
}

/// Where an event's timestamp came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimestampSource {
    /// The producer stamped the event when it was emitted.
    Producer,

    /// The producer supplied no timestamp, so it was stamped when the event was built.
    ///
    /// Such timestamps include any transport latency and must not be used for precise timing.
    Consumer,
}

/// A named, possibly partial chunk of a file attached to an event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    name: String,
    bytes: Bytes,
    eof: bool,
    mime_type: SmolStr,
}

impl Attachment {
    /// The attachment's name, for example `stdout` or `traceback`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bytes in this chunk. Empty if the chunk only signals end-of-file.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// True if this is the last chunk for this name.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// The attachment's MIME type.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// The parameters of one `status` call, with named fields.
///
/// Every field except `test_status` and `runnable` is optional. Use struct update syntax together
/// with [`StatusReport::for_test`] or [`StatusReport::file`], then [`build`](Self::build) the
/// event.
#[derive(Clone, Debug)]
pub struct StatusReport {
    /// The test this event is about, or `None` for the run as a whole.
    pub test_id: Option<String>,

    /// The status being reported.
    pub test_status: TestStatus,

    /// Tags added to the tag context from this event on (the protocol's `test_tags`).
    pub tags_added: BTreeSet<String>,

    /// Tags removed from the tag context from this event on.
    pub tags_removed: BTreeSet<String>,

    /// False for reporting units that can't be run on their own, like subtests.
    pub runnable: bool,

    /// The name of the attached file.
    pub file_name: Option<String>,

    /// A chunk of the attached file.
    pub file_bytes: Option<Bytes>,

    /// True if `file_bytes` is the last chunk. Ignored without `file_name`.
    pub eof: bool,

    /// The attachment's MIME type. Ignored without `file_name`.
    pub mime_type: Option<String>,

    /// The producer this event came from.
    pub route_code: Option<RouteCode>,

    /// When the producer emitted the event.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            test_id: None,
            test_status: TestStatus::None,
            tags_added: BTreeSet::new(),
            tags_removed: BTreeSet::new(),
            runnable: true,
            file_name: None,
            file_bytes: None,
            eof: false,
            mime_type: None,
            route_code: None,
            timestamp: None,
        }
    }
}

impl StatusReport {
    /// A report of `status` for `test_id`.
    pub fn for_test(test_id: impl Into<String>, status: TestStatus) -> Self {
        Self {
            test_id: Some(test_id.into()),
            test_status: status,
            ..Self::default()
        }
    }

    /// A report of one attachment chunk for `test_id`.
    pub fn file(
        test_id: impl Into<String>,
        file_name: impl Into<String>,
        file_bytes: impl Into<Bytes>,
        eof: bool,
    ) -> Self {
        Self {
            test_id: Some(test_id.into()),
            file_name: Some(file_name.into()),
            file_bytes: Some(file_bytes.into()),
            eof,
            ..Self::default()
        }
    }

    /// Sets the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the route code.
    pub fn on_route(mut self, route_code: impl Into<RouteCode>) -> Self {
        self.route_code = Some(route_code.into());
        self
    }

    /// Validates this report and builds the event.
    ///
    /// If no timestamp was supplied, the current time is used and the event is marked as
    /// consumer-stamped.
    pub fn build(self) -> Result<TestEvent, EventBuildError> {
        let attachment = match (self.file_name, self.file_bytes) {
            (Some(name), Some(bytes)) => Some(Attachment {
                name,
                bytes,
                eof: self.eof,
                mime_type: mime_type_or_default(self.mime_type),
            }),
            (Some(name), None) if self.eof => Some(Attachment {
                name,
                bytes: Bytes::new(),
                eof: true,
                mime_type: mime_type_or_default(self.mime_type),
            }),
            (Some(name), None) => return Err(EventBuildError::NameWithoutBytes { name }),
            (None, Some(bytes)) => {
                return Err(EventBuildError::BytesWithoutName { len: bytes.len() });
            }
            (None, None) => None,
        };

        if self.test_id.is_none() && self.test_status != TestStatus::None {
            return Err(EventBuildError::StatusWithoutTestId {
                status: self.test_status,
            });
        }

        let (timestamp, timestamp_source) = match self.timestamp {
            Some(timestamp) => (timestamp, TimestampSource::Producer),
            None => {
                let now = Utc::now();
                warn!(
                    test_id = ?self.test_id,
                    status = %self.test_status,
                    timestamp = %now,
                    "event has no producer timestamp, using consumer-assigned time \
                     (durations derived from it include transport latency)",
                );
                (now, TimestampSource::Consumer)
            }
        };

        Ok(TestEvent {
            test_id: self.test_id,
            status: self.test_status,
            tags_added: self.tags_added,
            tags_removed: self.tags_removed,
            runnable: self.runnable,
            attachment,
            route_code: self.route_code,
            timestamp,
            timestamp_source,
        })
    }
}

fn mime_type_or_default(mime_type: Option<String>) -> SmolStr {
    mime_type.map_or_else(|| SmolStr::new_static(DEFAULT_MIME_TYPE), SmolStr::from)
}

/// One occurrence in a test run: a status change, an attachment chunk, or both.
///
/// Built from a [`StatusReport`]. Events are never mutated after construction;
/// [`with_route_code`](Self::with_route_code) produces a new event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestEvent {
    test_id: Option<String>,
    status: TestStatus,
    tags_added: BTreeSet<String>,
    tags_removed: BTreeSet<String>,
    runnable: bool,
    attachment: Option<Attachment>,
    route_code: Option<RouteCode>,
    timestamp: DateTime<Utc>,
    timestamp_source: TimestampSource,
}

impl TestEvent {
    /// The test this event is about, or `None` for the run as a whole.
    pub fn test_id(&self) -> Option<&str> {
        self.test_id.as_deref()
    }

    /// The reported status.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Tags this event adds to the tag context.
    pub fn tags_added(&self) -> &BTreeSet<String> {
        &self.tags_added
    }

    /// Tags this event removes from the tag context.
    pub fn tags_removed(&self) -> &BTreeSet<String> {
        &self.tags_removed
    }

    /// Returns true if this event changes the tag context.
    pub fn changes_tags(&self) -> bool {
        !self.tags_added.is_empty() || !self.tags_removed.is_empty()
    }

    /// False for reporting units that can't be run on their own.
    pub fn runnable(&self) -> bool {
        self.runnable
    }

    /// The attachment chunk carried by this event, if any.
    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    /// The producer this event came from.
    pub fn route_code(&self) -> Option<&RouteCode> {
        self.route_code.as_ref()
    }

    /// When the event was emitted.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether the timestamp was assigned by the producer or by the consumer.
    pub fn timestamp_source(&self) -> TimestampSource {
        self.timestamp_source
    }

    /// Returns this event with its route code replaced.
    pub fn with_route_code(self, route_code: Option<RouteCode>) -> Self {
        Self { route_code, ..self }
    }
}
