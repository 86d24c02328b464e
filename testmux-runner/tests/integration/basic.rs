// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use pretty_assertions::assert_eq;
use std::time::Duration;
use testmux_metadata::TestStatus;
use testmux_runner::{
    consumer::{LegacyAdapter, LegacyCollector, LegacyResult, StreamRecorder},
    errors::SubmitError,
    event::RouteCode,
    mux::Multiplexer,
    state::{TestKey, TestState},
};

const PRODUCERS: usize = 4;
const TESTS_PER_PRODUCER: usize = 5;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(""));
    let mut tasks = Vec::new();
    for _ in 0..PRODUCERS {
        let producer = mux.next_producer();
        tasks.push(tokio::spawn(async move {
            // Every producer reports the same test ids.
            for n in 0..TESTS_PER_PRODUCER {
                let test_id = format!("test_{n}");
                producer
                    .submit(status(&test_id, TestStatus::InProgress))
                    .await?;
                producer.submit(status(&test_id, TestStatus::Success)).await?;
            }
            Ok::<_, SubmitError>(())
        }));
    }

    let mut consumer = (
        StreamRecorder::new(),
        LegacyAdapter::new(LegacyCollector::new()),
    );
    let outcome = mux.run(&mut consumer).await?;
    for task in tasks {
        task.await??;
    }

    let (recorder, adapter) = consumer;
    ensure!(!outcome.cancelled, "run finished on its own");
    assert_eq!(outcome.rejected_after_stop, 0);

    let session = &outcome.session;
    assert_eq!(session.records().count(), PRODUCERS * TESTS_PER_PRODUCER);
    for route in 0..PRODUCERS {
        let route = route.to_string();
        let record = session
            .get("test_0", Some(&route))
            .expect("each route has its own record");
        assert_eq!(record.state(), TestState::Finalized(TestStatus::Success));
    }
    assert!(session.was_successful());

    // Within each route, arrival order is submission order.
    for route in recorder.routes() {
        let statuses: Vec<_> = recorder
            .by_route(route)
            .map(|recorded| {
                (
                    recorded.event().test_id().map(ToOwned::to_owned),
                    recorded.event().status(),
                )
            })
            .collect();
        let expected: Vec<_> = (0..TESTS_PER_PRODUCER)
            .flat_map(|n| {
                let test_id = Some(format!("test_{n}"));
                [
                    (test_id.clone(), TestStatus::InProgress),
                    (test_id, TestStatus::Success),
                ]
            })
            .collect();
        assert_eq!(statuses, expected, "order for route {route:?}");
    }

    let collector = adapter.result();
    assert_eq!(collector.tests_run(), PRODUCERS * TESTS_PER_PRODUCER);
    assert!(collector.was_successful());

    let summary = recorder.summary().expect("run stopped");
    assert_eq!(summary.counts.success, PRODUCERS * TESTS_PER_PRODUCER);
    assert!(summary.successful);

    Ok(())
}

#[tokio::test]
async fn early_stop_reports_hung_tests() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(""));
    let producer = mux.producer("r1")?;
    for event in [
        status("t1", TestStatus::InProgress),
        status("t2", TestStatus::InProgress),
        status("t2", TestStatus::Success),
        status("t3", TestStatus::InProgress),
        status("t3", TestStatus::Success),
    ] {
        producer.try_submit(event)?;
    }

    let mut consumer = StopAfter {
        after: 2,
        seen: 0,
        handle: mux.stop_handle(),
    };
    let mut outcome = mux.run(&mut consumer).await?;

    ensure!(outcome.cancelled, "run was stopped early");
    assert_eq!(outcome.rejected_after_stop, 3);

    let r1 = Some(RouteCode::new("r1"));
    let hung: Vec<_> = outcome.session.stop()?.iter().cloned().collect();
    assert_eq!(
        hung,
        vec![TestKey::new("t1", r1.clone()), TestKey::new("t2", r1)]
    );
    assert!(!outcome.session.was_successful());
    assert!(outcome.session.get("t3", Some("r1")).is_none());

    ensure!(producer.is_closed(), "producer sees the stopped run");
    let err = producer
        .try_submit(status("t4", TestStatus::InProgress))
        .expect_err("run has stopped");
    assert!(matches!(err, SubmitError::Closed { .. }), "{err:?}");

    Ok(())
}

#[tokio::test]
async fn submit_times_out_when_full() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(indoc::indoc! {r#"
        [mux]
        channel-capacity = 1
        submit-timeout = "50ms"
    "#}));
    let producer = mux.producer("r1")?;

    producer.submit(status("t1", TestStatus::InProgress)).await?;
    let err = producer
        .submit(status("t1", TestStatus::Success))
        .await
        .expect_err("channel is full");
    match err {
        SubmitError::Timeout { event, timeout } => {
            assert_eq!(timeout, Duration::from_millis(50));
            assert_eq!(event.status(), TestStatus::Success);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }

    // The run still drains what was queued.
    drop(producer);
    let outcome = mux.run(&mut StreamRecorder::new()).await?;
    assert_eq!(
        outcome.session.get("t1", Some("r1")).map(|record| record.state()),
        Some(TestState::InProgress)
    );
    assert_eq!(outcome.session.failed_or_hung().len(), 1);

    Ok(())
}

#[tokio::test]
async fn nested_multiplexers() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(""));
    let producer = mux.producer("worker-1")?;
    // An event already routed by a downstream multiplexer.
    let inner = status("t1", TestStatus::Success).with_route_code(Some(RouteCode::new("0")));
    producer.submit(inner).await?;
    drop(producer);

    let outcome = mux.run(&mut StreamRecorder::new()).await?;
    let record = outcome
        .session
        .get("t1", Some("worker-1/0"))
        .expect("route codes nest");
    assert_eq!(record.state(), TestState::Finalized(TestStatus::Success));

    Ok(())
}

#[tokio::test]
async fn summary_serializes() -> Result<()> {
    test_init();

    let mut mux = Multiplexer::new(&mux_config(""));
    let producer = mux.producer("r1")?;
    producer.submit(status("t1", TestStatus::Fail)).await?;
    producer.submit(status("t1", TestStatus::Success)).await?;
    producer.submit(status("t2", TestStatus::InProgress)).await?;
    drop(producer);

    let outcome = mux.run(&mut StreamRecorder::new()).await?;
    let summary = serde_json::to_value(outcome.session.summary())?;

    assert_eq!(
        summary,
        serde_json::json!({
            "counts": {
                "exists": 0,
                "xfail": 0,
                "uxsuccess": 0,
                "success": 0,
                "fail": 1,
                "skip": 0,
            },
            "failed-or-hung": [{"test-id": "t2", "route-code": "r1"}],
            "discarded": {
                "post-final-status": 1,
                "post-eof-chunk": 0,
                "post-final-attachment": 0,
                "over-budget": 0,
            },
            "superseded": 0,
            "successful": false,
        })
    );

    Ok(())
}
