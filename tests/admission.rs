//! End-to-end admission behaviour on a paused tokio clock.
use futures::future::{join_all, BoxFuture};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tollgate::{Regulator, RegulatorConfig, Target, TrackingSleeper};

type Log = Arc<Mutex<Vec<(&'static str, Duration)>>>;

fn config(max_burst: u32, replenish: u32, max_queue: usize) -> RegulatorConfig {
    RegulatorConfig::builder()
        .max_burst(max_burst)
        .replenish_per_tick(replenish)
        .tick_interval(Duration::from_millis(1_000))
        .max_queue_length(max_queue)
        .jitter(Duration::ZERO)
        .regulate_host("hooks.example.com")
        .build()
        .expect("valid config")
}

fn hook() -> Target {
    Target::new("hooks.example.com", "/catch/42")
}

/// Operation that records its label and start offset on every attempt.
fn recorded(
    log: &Log,
    label: &'static str,
    start: Instant,
) -> impl FnMut() -> BoxFuture<'static, Result<u16, io::Error>> + Send {
    let log = log.clone();
    move || {
        log.lock().unwrap().push((label, start.elapsed()));
        Box::pin(async { Ok(200) })
    }
}

#[tokio::test(start_paused = true)]
async fn burst_runs_without_queueing_delay() {
    let regulator = Regulator::new(config(5, 1, 10));
    let log: Log = Arc::default();
    let start = Instant::now();

    let calls = ["a", "b", "c", "d", "e"].map(|label| {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), op).await }
    });
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.as_ref().is_ok_and(|s| *s == 200)));
    assert!(log.lock().unwrap().iter().all(|(_, at)| at.is_zero()));
    let m = regulator.metrics();
    assert_eq!((m.admitted, m.enqueued), (5, 0));
    assert_eq!(m.tokens_available, 0);
}

#[tokio::test(start_paused = true)]
async fn overflow_waits_for_the_next_tick() {
    let regulator = Regulator::new(config(3, 1, 10));
    let log: Log = Arc::default();
    let start = Instant::now();

    let calls = ["a", "b", "c", "late"].map(|label| {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), op).await }
    });
    join_all(calls).await;

    let log = log.lock().unwrap().clone();
    assert_eq!(log.len(), 4);
    assert_eq!(log[3], ("late", Duration::from_millis(1_000)));
    let m = regulator.metrics();
    assert_eq!((m.enqueued, m.dequeued), (1, 1));
}

#[tokio::test(start_paused = true)]
async fn full_queue_rejects_synchronously_and_earlier_calls_resolve() {
    let regulator = Regulator::new(config(1, 1, 2));
    let log: Log = Arc::default();
    let start = Instant::now();

    let mut accepted = Vec::new();
    for label in ["first", "q1", "q2"] {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        accepted.push(tokio::spawn(async move { regulator.execute(&hook(), op).await }));
    }
    while regulator.metrics().enqueued < 2 {
        tokio::task::yield_now().await;
    }

    let err = regulator
        .execute(&hook(), recorded(&log, "overflow", start))
        .await
        .expect_err("queue is full");
    assert!(err.is_queue_full());
    assert_eq!(err.queue_capacity(), Some((2, 2)));
    assert!(start.elapsed().is_zero(), "rejection must not wait for a tick");

    for handle in accepted {
        assert_eq!(handle.await.unwrap().unwrap(), 200);
    }
    assert!(log.lock().unwrap().iter().all(|(label, _)| *label != "overflow"));
    assert_eq!(regulator.metrics().rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn queued_calls_start_in_arrival_order() {
    let regulator = Regulator::new(config(1, 1, 10));
    regulator.execute(&hook(), || async { Ok::<u16, io::Error>(200) }).await.unwrap();

    let log: Log = Arc::default();
    let start = Instant::now();
    let calls = ["A", "B", "C"].map(|label| {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), op).await }
    });
    join_all(calls).await;

    let order: Vec<_> = log.lock().unwrap().iter().map(|(label, at)| (*label, at.as_millis())).collect();
    assert_eq!(order, vec![("A", 1_000), ("B", 2_000), ("C", 3_000)]);
}

#[tokio::test(start_paused = true)]
async fn refill_leaves_spare_tokens_banked_after_draining() {
    // maxBurst=3, replenishPerTick=2, maxQueueLength=2; four calls at t=0.
    let regulator = Regulator::new(config(3, 2, 2));
    let log: Log = Arc::default();
    let start = Instant::now();

    let calls = ["a", "b", "c", "d"].map(|label| {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), op).await }
    });
    join_all(calls).await;

    assert_eq!(log.lock().unwrap()[3], ("d", Duration::from_millis(1_000)));
    let m = regulator.metrics();
    assert_eq!(m.tokens_available, 1);
    assert_eq!(m.queue_length, 0);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(regulator.metrics().tokens_available, 3, "refill clamps at max burst");
}

#[tokio::test(start_paused = true)]
async fn bucket_and_queue_stay_within_bounds() {
    let regulator = Regulator::new(config(2, 5, 3));

    regulator.start();
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(regulator.metrics().tokens_available, 2);

    let calls = (0..8).map(|_| {
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), || async { Ok::<u16, io::Error>(200) }).await }
    });
    let results = join_all(calls).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    assert_eq!(results.iter().filter(|r| matches!(r, Err(e) if e.is_queue_full())).count(), 3);
    let m = regulator.metrics();
    assert!(m.tokens_available <= 2);
    assert_eq!(m.queue_length, 0);
}

#[tokio::test(start_paused = true)]
async fn unbuffered_bucket_releases_replenish_per_tick() {
    let regulator = Regulator::new(config(0, 2, 10));
    let log: Log = Arc::default();
    let start = Instant::now();

    let calls = ["a", "b", "c"].map(|label| {
        let op = recorded(&log, label, start);
        let regulator = regulator.clone();
        async move { regulator.execute(&hook(), op).await }
    });
    join_all(calls).await;

    let at: Vec<_> = log.lock().unwrap().iter().map(|(_, at)| at.as_millis()).collect();
    assert_eq!(at, vec![1_000, 1_000, 2_000]);
    assert_eq!(regulator.metrics().tokens_available, 0);
}

#[tokio::test(start_paused = true)]
async fn persistent_503_is_attempted_max_retries_plus_one() {
    let sleeper = TrackingSleeper::new();
    let config = RegulatorConfig::builder()
        .max_burst(1)
        .max_retries(3)
        .base_delay(Duration::from_millis(100))
        .jitter(Duration::from_millis(50))
        .regulate_host("hooks.example.com")
        .build()
        .unwrap();
    let regulator = Regulator::builder(config).with_sleeper(sleeper.clone()).build();

    let attempts = Arc::new(Mutex::new(0u32));
    let counter = attempts.clone();
    let status = regulator
        .execute(&hook(), move || {
            *counter.lock().unwrap() += 1;
            async { Ok::<u16, io::Error>(503) }
        })
        .await
        .expect("exhausted retries return the last response");

    assert_eq!(status, 503);
    assert_eq!(*attempts.lock().unwrap(), 4);

    let delays = sleeper.calls();
    assert_eq!(delays.len(), 3);
    for (retry, delay) in delays.iter().enumerate() {
        let floor = Duration::from_millis(100 * (1 << retry));
        assert!(*delay >= floor, "retry {retry}: {delay:?} < {floor:?}");
        assert!(*delay <= floor + Duration::from_millis(50));
    }
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn persistent_transport_error_surfaces_unmodified() {
    let config = RegulatorConfig::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(10))
        .jitter(Duration::ZERO)
        .regulate_host("hooks.example.com")
        .build()
        .unwrap();
    let regulator = Regulator::builder(config).with_sleeper(TrackingSleeper::new()).build();

    let err = regulator
        .execute(&hook(), || async {
            Err::<u16, _>(io::Error::new(io::ErrorKind::TimedOut, "upstream timed out"))
        })
        .await
        .unwrap_err();

    let inner = err.into_transport().expect("transport error");
    assert_eq!(inner.kind(), io::ErrorKind::TimedOut);
    assert_eq!(inner.to_string(), "upstream timed out");
}

#[tokio::test(start_paused = true)]
async fn unregulated_targets_ignore_an_exhausted_bucket() {
    let regulator = Regulator::new(config(0, 0, 0));
    let start = Instant::now();

    let regulated = regulator.execute(&hook(), || async { Ok::<u16, io::Error>(200) }).await;
    assert!(regulated.unwrap_err().is_queue_full());

    let other = Target::new("api.example.com", "/v1/shifts");
    for _ in 0..20 {
        assert_eq!(
            regulator.execute(&other, || async { Ok::<u16, io::Error>(204) }).await.unwrap(),
            204
        );
    }

    assert!(start.elapsed().is_zero());
    let m = regulator.metrics();
    assert_eq!(m.bypassed, 20);
    assert_eq!((m.enqueued, m.rejected), (0, 1));
}

#[tokio::test(start_paused = true)]
async fn installing_twice_runs_one_refill_driver() {
    let regulator = Regulator::new(config(1, 1, 10));
    let _first = regulator.install();
    let _second = regulator.clone().install();
    assert!(regulator.is_started());

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    assert_eq!(regulator.metrics().ticks, 5);
}

#[tokio::test(start_paused = true)]
async fn first_regulated_call_starts_the_driver() {
    let regulator = Regulator::new(config(1, 1, 10));
    assert!(!regulator.is_started());
    regulator.execute(&hook(), || async { Ok::<u16, io::Error>(200) }).await.unwrap();
    assert!(regulator.is_started());
}

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("runtime")
}

#[test]
fn driver_is_replaced_after_its_runtime_shuts_down() {
    let regulator = Regulator::new(config(1, 1, 4));
    let ok = || async { Ok::<u16, io::Error>(200) };

    let first = paused_runtime();
    first.block_on(async { regulator.execute(&hook(), ok).await.unwrap() });
    assert!(regulator.is_started());
    drop(first);
    assert!(!regulator.is_started(), "driver went down with its runtime");

    let second = paused_runtime();
    let outcome = second.block_on(async {
        // The only token was spent in the first runtime, so this call has to queue.
        tokio::time::timeout(Duration::from_secs(30), regulator.execute(&hook(), ok)).await
    });
    assert_eq!(outcome.expect("queued call was released").unwrap(), 200);
    assert!(regulator.is_started());
    assert_eq!(regulator.metrics().dequeued, 1);
}

#[test]
fn start_replaces_a_dead_driver() {
    let regulator = Regulator::new(config(1, 1, 4));

    let first = paused_runtime();
    assert!(first.block_on(async { regulator.start() }));
    drop(first);

    let second = paused_runtime();
    second.block_on(async {
        assert!(regulator.start(), "dead driver counts as not started");
        assert!(!regulator.start());
        tokio::time::sleep(Duration::from_millis(2_500)).await;
    });
    assert_eq!(regulator.metrics().ticks, 2);
}
