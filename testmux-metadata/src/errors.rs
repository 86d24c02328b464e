// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{DiscardReason, TestStatus};
use std::{error, fmt};

/// An error returned while parsing a [`TestStatus`] from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestStatusParseError {
    input: String,
}

impl TestStatusParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for TestStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unrecognized test status: {}\n(known values: {})",
            self.input,
            TestStatus::variants().join(", ")
        )
    }
}

impl error::Error for TestStatusParseError {}

/// An error returned while parsing a [`DiscardReason`] from a string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DiscardReasonParseError {
    input: String,
}

impl DiscardReasonParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for DiscardReasonParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "unrecognized discard reason: {}\n(known values: {})",
            self.input,
            DiscardReason::variants().join(", ")
        )
    }
}

impl error::Error for DiscardReasonParseError {}
