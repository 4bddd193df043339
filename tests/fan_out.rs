//! Coordinator rounds against real sessions over in-memory streams.

use std::time::Duration;

use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;
use workvisor::{
    Bus, Coordinator, DispatchError, EventKind, ExecState, JobContext, JobError, JobRef, Limits,
    Session, Supervisor, WarningPolicy, int64_job,
};

fn factorial() -> JobRef {
    int64_job("factorial", |n: i64, _ctx: JobContext| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        (1..=n).try_fold(1i64, |acc, k| acc.checked_mul(k))
            .ok_or_else(|| JobError::Fail("overflow".into()))
    })
}

fn failing() -> JobRef {
    int64_job("failing", |_n: i64, _ctx: JobContext| async move {
        Err(JobError::Fail("division by zero".into()))
    })
}

fn slow() -> JobRef {
    int64_job("slow", |n: i64, ctx: JobContext| async move {
        ctx.cancelled().await;
        Ok(n)
    })
}

fn spawn_worker(job: JobRef, bus: Bus) -> DuplexStream {
    let (coordinator_side, worker_side) = tokio::io::duplex(64 * 1024);
    let limits = Limits::new(Duration::from_secs(5), Duration::from_secs(10)).unwrap();
    let supervisor = Supervisor::new(limits, WarningPolicy::Once, bus.clone());
    tokio::spawn(Session::new(worker_side, supervisor, job, bus).run(CancellationToken::new()));
    coordinator_side
}

#[tokio::test]
async fn scenario_c_sums_results_from_both_workers() {
    let streams = vec![
        ("w1", spawn_worker(factorial(), Bus::new(64))),
        ("w2", spawn_worker(factorial(), Bus::new(64))),
    ];
    let coordinator = Coordinator::from_streams(streams, Bus::new(64));

    let aggregate = coordinator.dispatch(workvisor::DataPayload::int64(5)).await.unwrap();
    assert_eq!(aggregate.round(), 1);
    assert_eq!(aggregate.outcomes().len(), 2);
    assert_eq!(aggregate.total().unwrap(), 240);

    for (worker, status) in coordinator.statuses().await {
        assert_eq!(status.unwrap().state, ExecState::Succeeded, "{worker}");
    }
}

#[tokio::test]
async fn scenario_c_fatal_reply_cancels_the_other_worker() {
    let slow_bus = Bus::new(256);
    let mut slow_events = slow_bus.subscribe();
    let streams = vec![
        ("slow", spawn_worker(slow(), slow_bus)),
        ("failing", spawn_worker(failing(), Bus::new(64))),
    ];
    let coordinator_bus = Bus::new(256);
    let mut coordinator_events = coordinator_bus.subscribe();
    let coordinator = Coordinator::from_streams(streams, coordinator_bus);

    let err = coordinator.dispatch_int64(5).await.unwrap_err();
    match &err {
        DispatchError::WorkerFatal { worker, reason } => {
            assert_eq!(worker, "failing");
            assert!(reason.contains("division by zero"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let cancelled = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let ev = slow_events.recv().await.unwrap();
            if ev.kind == EventKind::ExecutionCancelled {
                return ev;
            }
        }
    })
    .await
    .expect("slow worker was never cancelled");
    assert_eq!(cancelled.kind, EventKind::ExecutionCancelled);

    let mut cancel_sent_to = Vec::new();
    while let Ok(ev) = coordinator_events.try_recv() {
        if ev.kind == EventKind::CancelSent {
            cancel_sent_to.push(ev.source.unwrap().to_string());
        }
    }
    assert_eq!(cancel_sent_to, vec!["slow".to_string()]);
}

/// Blocks until cancelled for input 1, answers immediately otherwise.
fn stalls_on_one() -> JobRef {
    int64_job("stalls-on-one", |n: i64, ctx: JobContext| async move {
        if n == 1 {
            ctx.cancelled().await;
        }
        Ok(n)
    })
}

/// Fails for input 1, echoes otherwise.
fn fails_on_one() -> JobRef {
    int64_job("fails-on-one", |n: i64, _ctx: JobContext| async move {
        if n == 1 {
            return Err(JobError::Fail("bad input".into()));
        }
        Ok(n)
    })
}

#[tokio::test]
async fn next_round_skips_the_cancelled_reply_of_an_aborted_round() {
    let streams = vec![
        ("a", spawn_worker(stalls_on_one(), Bus::new(64))),
        ("b", spawn_worker(fails_on_one(), Bus::new(64))),
    ];
    let coordinator = Coordinator::from_streams(streams, Bus::new(64));

    let err = coordinator.dispatch_int64(1).await.unwrap_err();
    assert_eq!(err.worker(), Some("b"));

    // Worker "a" answers round 1 with "cancelled" before answering round 2.
    assert_eq!(coordinator.dispatch_int64(2).await.unwrap(), 4);
    assert!(coordinator.link_states().iter().all(|s| s.outstanding == 0));
}

#[tokio::test]
async fn cancel_all_stops_an_inflight_round() {
    let streams = vec![
        ("a", spawn_worker(slow(), Bus::new(64))),
        ("b", spawn_worker(slow(), Bus::new(64))),
    ];
    let coordinator = std::sync::Arc::new(Coordinator::from_streams(streams, Bus::new(64)));

    let round = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.dispatch_int64(3).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel_all().await;

    let err = round.await.unwrap().unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled));
}
