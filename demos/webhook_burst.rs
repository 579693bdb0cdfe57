//! A burst of webhook deliveries against a throttled automation host.
//!
//! Ten deliveries fire at once against a bucket of three. Three go out immediately, five wait
//! for refill ticks, two are turned away. One hook answers 503 once and is retried.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tollgate::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let config = RegulatorConfig::builder()
        .max_burst(3)
        .replenish_per_tick(2)
        .tick_interval(Duration::from_millis(500))
        .max_queue_length(5)
        .base_delay(Duration::from_millis(100))
        .jitter(Duration::from_millis(50))
        .log_threshold(4)
        .regulate_host("automation.example.com")
        .build()?;
    let sink = MemorySink::new();
    let regulator = Regulator::builder(config).with_sink(sink.clone()).build();
    regulator.start();

    let flaky = Arc::new(AtomicUsize::new(0));
    let mut deliveries = Vec::new();
    for id in 0..10 {
        let regulator = regulator.clone();
        let flaky = flaky.clone();
        deliveries.push(tokio::spawn(async move {
            let target = Target::new("automation.example.com", format!("/hooks/{id}"));
            let result = regulator
                .execute(&target, || {
                    let first_try = id == 4 && flaky.fetch_add(1, Ordering::SeqCst) == 0;
                    async move { Ok::<u16, std::io::Error>(if first_try { 503 } else { 200 }) }
                })
                .await;
            (id, result)
        }));
    }

    for delivery in deliveries {
        match delivery.await? {
            (id, Ok(status)) => println!("hook {id}: {status}"),
            (id, Err(err)) => println!("hook {id}: {err}"),
        }
    }

    println!("\n{:#?}", regulator.metrics());
    println!("\nevents:");
    for event in sink.events() {
        println!("  {event}");
    }
    Ok(())
}
