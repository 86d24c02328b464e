// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{DiscardReason, TestStatus};
use proptest::prelude::*;

impl Arbitrary for TestStatus {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        // Weight final statuses up a little so that sequences finalize early and the post-final
        // paths get exercised.
        prop_oneof![
            1 => Just(TestStatus::None),
            2 => Just(TestStatus::InProgress),
            3 => prop::sample::select(TestStatus::ALL[2..].to_vec()),
        ]
        .boxed()
    }
}

impl Arbitrary for DiscardReason {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::sample::select(DiscardReason::ALL.to_vec()).boxed()
    }
}
