// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testmux.
//!
//! Only usage errors live here. Late or redundant events are never errors: they are counted as
//! [`DiscardReason`](testmux_metadata::DiscardReason)s by the session.

use crate::event::{RouteCode, TestEvent};
use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{fmt, time::Duration};
use testmux_metadata::TestStatus;
use thiserror::Error;

/// An error that occurred while building a [`TestEvent`] from a
/// [`StatusReport`](crate::event::StatusReport).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum EventBuildError {
    /// File bytes were supplied without a file name.
    #[error("file bytes ({len} bytes) supplied without a file name")]
    BytesWithoutName {
        /// The number of bytes that were supplied.
        len: usize,
    },

    /// A file name was supplied with neither bytes nor an end-of-file marker.
    #[error("file name `{name}` supplied without file bytes or eof")]
    NameWithoutBytes {
        /// The file name.
        name: String,
    },

    /// A status other than `none` was supplied for the run as a whole.
    #[error("status `{status}` supplied without a test id")]
    StatusWithoutTestId {
        /// The status that was supplied.
        status: TestStatus,
    },
}

/// An operation on a [`RunSession`](crate::session::RunSession) was called out of sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum SessionError {
    /// The session has not been started yet.
    #[error("{op} called before the test run was started")]
    NotStarted {
        /// The operation that was attempted.
        op: SessionOp,
    },

    /// The session was already started.
    #[error("{op} called, but the test run was already started")]
    AlreadyStarted {
        /// The operation that was attempted.
        op: SessionOp,
    },

    /// The session was already stopped.
    #[error("{op} called after the test run was stopped")]
    AlreadyStopped {
        /// The operation that was attempted.
        op: SessionOp,
    },
}

impl SessionError {
    /// Returns the operation that was attempted.
    pub fn op(&self) -> SessionOp {
        match self {
            Self::NotStarted { op } | Self::AlreadyStarted { op } | Self::AlreadyStopped { op } => {
                *op
            }
        }
    }
}

/// An operation on a [`RunSession`](crate::session::RunSession), used in [`SessionError`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionOp {
    /// Starting the run.
    Start,

    /// Applying an event.
    Apply,

    /// Changing the tag context.
    Tags,

    /// Stopping the run.
    Stop,
}

impl fmt::Display for SessionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Apply => write!(f, "apply"),
            Self::Tags => write!(f, "tags"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

/// An error that occurred while registering a producer with a
/// [`Multiplexer`](crate::mux::Multiplexer).
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum MuxError {
    /// A producer with this route code is already registered.
    #[error("route code `{route_code}` is already registered with this multiplexer")]
    DuplicateRoute {
        /// The route code.
        route_code: RouteCode,
    },
}

/// An error that occurred while submitting an event through a
/// [`Producer`](crate::mux::Producer).
///
/// The event is handed back so the producer can decide whether to retry, buffer or drop it.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The channel was full and the submission was not allowed to wait.
    #[error("event channel is full")]
    Full {
        /// The event that was not submitted.
        event: Box<TestEvent>,
    },

    /// The channel stayed full for the whole submit timeout.
    #[error("event channel stayed full for {timeout:?}")]
    Timeout {
        /// The event that was not submitted.
        event: Box<TestEvent>,

        /// How long the submission waited.
        timeout: Duration,
    },

    /// The run has stopped, or the multiplexer was dropped.
    #[error("test run is no longer accepting events")]
    Closed {
        /// The event that was not submitted.
        event: Box<TestEvent>,
    },
}

impl SubmitError {
    /// Returns the event that could not be submitted.
    pub fn into_event(self) -> TestEvent {
        match self {
            Self::Full { event } | Self::Timeout { event, .. } | Self::Closed { event } => *event,
        }
    }
}

/// An error that occurred while parsing the testmux config.
#[derive(Debug, Error)]
#[error(
    "failed to parse testmux config{}",
    .config_file.as_ref().map_or_else(String::new, |file| format!(" at `{file}`"))
)]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Option<Utf8PathBuf>,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: Option<&Utf8Path>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.map(ToOwned::to_owned),
            kind,
        }
    }

    /// Returns the config file that failed to parse, or `None` for the default config.
    pub fn config_file(&self) -> Option<&Utf8Path> {
        self.config_file.as_deref()
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the layered config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// The channel capacity was zero.
    #[error("mux.channel-capacity must be at least 1")]
    InvalidChannelCapacity,

    /// The channel capacity was larger than the channel supports.
    #[error("mux.channel-capacity is {capacity}, but must be at most {max}")]
    ChannelCapacityTooLarge {
        /// The configured capacity.
        capacity: usize,

        /// The largest supported capacity.
        max: usize,
    },
}
