// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{DiscardReasonParseError, TestStatus};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The reason an event (or part of an event) was discarded rather than applied.
///
/// Discarding is never an error: late events are expected in a distributed run, and are only
/// counted so that they remain auditable.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscardReason {
    /// A status other than `none` arrived for a test that had already reached a final status.
    PostFinalStatus,

    /// An attachment chunk arrived for a name whose end-of-file had already been signalled.
    PostEofChunk,

    /// An attachment chunk arrived for a test that had already reached a final status.
    PostFinalAttachment,

    /// An attachment chunk would have exceeded the per-test attachment budget.
    OverBudget,
}

impl DiscardReason {
    /// Every discard reason, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::PostFinalStatus,
        Self::PostEofChunk,
        Self::PostFinalAttachment,
        Self::OverBudget,
    ];

    /// Returns the string representations of all known variants.
    pub fn variants() -> [&'static str; 4] {
        Self::ALL.map(Self::as_str)
    }

    /// Returns the string representation of this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PostFinalStatus => "post-final-status",
            Self::PostEofChunk => "post-eof-chunk",
            Self::PostFinalAttachment => "post-final-attachment",
            Self::OverBudget => "over-budget",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscardReason {
    type Err = DiscardReasonParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| DiscardReasonParseError::new(s))
    }
}

/// Counts of discarded events, broken down by reason.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiscardCounts {
    /// Statuses that arrived after a final status.
    pub post_final_status: usize,

    /// Attachment chunks that arrived after their end-of-file.
    pub post_eof_chunk: usize,

    /// Attachment chunks that arrived after a final status.
    pub post_final_attachment: usize,

    /// Attachment chunks over the per-test budget.
    pub over_budget: usize,
}

impl DiscardCounts {
    /// Records one discarded event.
    pub fn record(&mut self, reason: DiscardReason) {
        *self.slot_mut(reason) += 1;
    }

    /// Returns the number of events discarded for this reason.
    pub fn get(&self, reason: DiscardReason) -> usize {
        match reason {
            DiscardReason::PostFinalStatus => self.post_final_status,
            DiscardReason::PostEofChunk => self.post_eof_chunk,
            DiscardReason::PostFinalAttachment => self.post_final_attachment,
            DiscardReason::OverBudget => self.over_budget,
        }
    }

    /// Returns the total number of discarded events.
    pub fn total(&self) -> usize {
        DiscardReason::ALL
            .into_iter()
            .map(|reason| self.get(reason))
            .sum()
    }

    fn slot_mut(&mut self, reason: DiscardReason) -> &mut usize {
        match reason {
            DiscardReason::PostFinalStatus => &mut self.post_final_status,
            DiscardReason::PostEofChunk => &mut self.post_eof_chunk,
            DiscardReason::PostFinalAttachment => &mut self.post_final_attachment,
            DiscardReason::OverBudget => &mut self.over_budget,
        }
    }
}

/// Counts of finalized tests, broken down by final status.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StatusCounts {
    /// Tests that were enumerated but not run.
    pub exists: usize,

    /// Tests that failed as expected.
    pub xfail: usize,

    /// Tests that passed unexpectedly.
    pub uxsuccess: usize,

    /// Tests that passed.
    pub success: usize,

    /// Tests that failed.
    pub fail: usize,

    /// Tests that were skipped.
    pub skip: usize,
}

impl StatusCounts {
    /// Records one finalized test. Interim statuses are ignored.
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::None | TestStatus::InProgress => {}
            TestStatus::Exists => self.exists += 1,
            TestStatus::Xfail => self.xfail += 1,
            TestStatus::UxSuccess => self.uxsuccess += 1,
            TestStatus::Success => self.success += 1,
            TestStatus::Fail => self.fail += 1,
            TestStatus::Skip => self.skip += 1,
        }
    }

    /// Returns the number of tests that finalized with a failing status.
    pub fn failures(&self) -> usize {
        self.fail + self.uxsuccess
    }

    /// Returns the total number of finalized tests.
    pub fn total(&self) -> usize {
        self.exists + self.xfail + self.uxsuccess + self.success + self.fail + self.skip
    }
}

/// Identifies one test occurrence in a summary.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestKeySummary {
    /// The test's identifier.
    pub test_id: String,

    /// The route the test was reported on, if any.
    pub route_code: Option<String>,
}

/// A summary of a finished run, suitable for serialization.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunSummary {
    /// Finalized tests by status.
    pub counts: StatusCounts,

    /// Tests that started but never reached a final status before the run stopped.
    pub failed_or_hung: Vec<TestKeySummary>,

    /// Discarded events by reason.
    pub discarded: DiscardCounts,

    /// Earlier occurrences of tests that were reported again under the `new-occurrence` policy.
    pub superseded: usize,

    /// True if no test failed and none were left failed-or-hung.
    pub successful: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn discard_counts_total() {
        let mut counts = DiscardCounts::default();
        counts.record(DiscardReason::PostEofChunk);
        counts.record(DiscardReason::PostEofChunk);
        counts.record(DiscardReason::OverBudget);

        assert_eq!(counts.get(DiscardReason::PostEofChunk), 2);
        assert_eq!(counts.get(DiscardReason::PostFinalStatus), 0);
        assert_eq!(counts.total(), 3);
    }

    #[test_case("post-final-status", DiscardReason::PostFinalStatus; "post final status")]
    #[test_case("post-eof-chunk", DiscardReason::PostEofChunk; "post eof chunk")]
    #[test_case("over-budget", DiscardReason::OverBudget; "over budget")]
    fn parse_discard_reason(input: &str, expected: DiscardReason) {
        assert_eq!(input.parse::<DiscardReason>(), Ok(expected));
    }

    #[test_case("post_final_status"; "snake case is not accepted")]
    #[test_case("OverBudget"; "case sensitive")]
    fn parse_discard_reason_error(input: &str) {
        let err = input
            .parse::<DiscardReason>()
            .expect_err("parse should fail");
        assert_eq!(err.input(), input);
        assert!(
            err.to_string().contains("known values: post-final-status"),
            "error lists known values: {err}"
        );
    }

    #[test]
    fn status_counts_ignore_interim() {
        let mut counts = StatusCounts::default();
        for status in TestStatus::ALL {
            counts.record(status);
        }
        assert_eq!(counts.total(), 6);
        assert_eq!(counts.failures(), 2);
    }

    #[test]
    fn summary_json_shape() {
        let summary = RunSummary {
            counts: StatusCounts {
                success: 1,
                ..StatusCounts::default()
            },
            failed_or_hung: vec![TestKeySummary {
                test_id: "t2".to_owned(),
                route_code: Some("r1".to_owned()),
            }],
            discarded: DiscardCounts::default(),
            superseded: 0,
            successful: false,
        };

        let value = serde_json::to_value(&summary).expect("summary serializes");
        assert_eq!(value["failed-or-hung"][0]["test-id"], "t2");
        assert_eq!(value["failed-or-hung"][0]["route-code"], "r1");
        assert_eq!(value["discarded"]["post-final-status"], 0);
        assert_eq!(value["counts"]["success"], 1);
        assert_eq!(value["successful"], false);
    }
}
