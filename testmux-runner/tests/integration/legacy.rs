// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use bytes::Bytes;
use chrono::Utc;
use color_eyre::eyre::Result;
use maplit::btreeset;
use pretty_assertions::assert_eq;
use testmux_metadata::TestStatus;
use testmux_runner::{
    consumer::{
        CollectedOutcome, LegacyAdapter, LegacyCollector, LegacyResult, REASON_DETAIL,
        StreamRecorder,
    },
    event::{RouteCode, StatusReport, TestEvent},
    mux::Multiplexer,
};

fn chunk(test_id: &str, name: &str, bytes: &'static [u8], eof: bool) -> TestEvent {
    StatusReport::file(test_id, name, bytes, eof)
        .at(Utc::now())
        .build()
        .expect("valid report")
}

#[tokio::test]
async fn legacy_outcomes_through_the_mux() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(""));
    let producer = mux.producer("r1")?;
    let events = [
        StatusReport {
            tags_added: btreeset! {"worker-0".to_owned()},
            ..StatusReport::default()
        }
        .at(Utc::now())
        .build()?,
        status("pass", TestStatus::InProgress),
        chunk("pass", "stdout", b"ok\n", true),
        status("pass", TestStatus::Success),
        StatusReport {
            file_name: Some(REASON_DETAIL.to_owned()),
            file_bytes: Some(Bytes::from_static(b"not on this platform")),
            eof: true,
            ..StatusReport::for_test("skipped", TestStatus::Skip)
        }
        .at(Utc::now())
        .build()?,
        status("broken", TestStatus::InProgress),
        chunk("broken", "traceback", b"assertion failed", true),
        status("broken", TestStatus::Fail),
        status("lucky", TestStatus::UxSuccess),
        status("hung", TestStatus::InProgress),
        chunk("hung", "stdout", b"waiting...", false),
    ];
    for event in events {
        producer.submit(event).await?;
    }
    drop(producer);

    let mut consumer = (
        StreamRecorder::new(),
        LegacyAdapter::new(LegacyCollector::new()),
    );
    let outcome = mux.run(&mut consumer).await?;
    let collector = consumer.1.into_result();

    assert_eq!(collector.tests_run(), 5);
    let outcomes: Vec<_> = collector
        .tests()
        .iter()
        .map(|test| (test.test_id.as_str(), test.outcome.clone()))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("pass", CollectedOutcome::Success),
            (
                "skipped",
                CollectedOutcome::Skip {
                    reason: Some("not on this platform".to_owned())
                }
            ),
            ("broken", CollectedOutcome::Failure),
            ("lucky", CollectedOutcome::UnexpectedSuccess),
            ("hung", CollectedOutcome::Error),
        ]
    );

    let pass = &collector.tests()[0];
    assert_eq!(pass.tags, btreeset! {"worker-0".to_owned()});
    assert_eq!(
        pass.details.get("stdout").map(|detail| detail.content().as_ref()),
        Some(&b"ok\n"[..])
    );

    let hung = collector.errors().next().expect("hung test reported");
    assert_eq!(
        hung.details.get("stdout").map(|detail| detail.content().as_ref()),
        Some(&b"waiting..."[..])
    );
    assert!(hung.details.get(REASON_DETAIL).is_some());

    assert!(!collector.was_successful());
    assert!(!outcome.session.was_successful());
    assert_eq!(outcome.session.failed_or_hung().len(), 1);

    // The tag-only event has no test id, so it belongs to the run as a whole.
    assert_eq!(
        consumer.0.events()[0].event().route_code(),
        Some(&RouteCode::new("r1"))
    );
    assert_eq!(consumer.0.len(), 11);

    Ok(())
}

#[tokio::test]
async fn new_occurrences_are_reported_again() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(
        "[session]\nfinalized-policy = \"new-occurrence\"\n",
    ));
    let producer = mux.producer("r1")?;
    for status_ in [
        TestStatus::InProgress,
        TestStatus::Fail,
        TestStatus::InProgress,
        TestStatus::Success,
    ] {
        producer.submit(status("flaky", status_)).await?;
    }
    drop(producer);

    let mut adapter = LegacyAdapter::new(LegacyCollector::new());
    let outcome = mux.run(&mut adapter).await?;
    let collector = adapter.into_result();

    assert_eq!(collector.tests_run(), 2);
    assert_eq!(collector.failures().count(), 1);
    assert_eq!(outcome.session.superseded().len(), 1);
    assert!(outcome.session.was_successful());

    Ok(())
}
