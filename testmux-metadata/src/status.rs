// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestStatusParseError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The status reported for a test by a single event.
///
/// There are two sorts of status: interim statuses ([`None`](Self::None) and
/// [`InProgress`](Self::InProgress)), of which any number may be reported, and final statuses, of
/// which at most one is honored per test occurrence.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// No particular status is being reported, for example when the event only carries an
    /// attachment chunk.
    #[default]
    None,

    /// The test is currently running.
    ///
    /// Emitted when a test starts, and at any intermediate point where the test wants to signal
    /// that it is still alive.
    InProgress,

    /// The test exists but is not being executed, as when enumerating the tests a run could
    /// select.
    Exists,

    /// The test failed, but that was expected. Not considered a failure.
    Xfail,

    /// The test passed, but was expected to fail. Considered a failure.
    UxSuccess,

    /// The test finished without error.
    Success,

    /// The test failed or errored.
    Fail,

    /// The test was selected to run but chose to be skipped.
    Skip,
}

impl TestStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::None,
        Self::InProgress,
        Self::Exists,
        Self::Xfail,
        Self::UxSuccess,
        Self::Success,
        Self::Fail,
        Self::Skip,
    ];

    /// Returns the string representations of all known variants.
    pub fn variants() -> [&'static str; 8] {
        Self::ALL.map(Self::as_str)
    }

    /// Returns the string representation of this status, as used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::InProgress => "inprogress",
            Self::Exists => "exists",
            Self::Xfail => "xfail",
            Self::UxSuccess => "uxsuccess",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Skip => "skip",
        }
    }

    /// Returns true if this status closes a test's lifecycle.
    pub fn is_final(self) -> bool {
        !self.is_interim()
    }

    /// Returns true if this status is a progress signal rather than an outcome.
    pub fn is_interim(self) -> bool {
        matches!(self, Self::None | Self::InProgress)
    }

    /// Returns true if a test finalized with this status makes the run unsuccessful.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::UxSuccess)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = TestStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TestStatusParseError::new(s))
    }
}
