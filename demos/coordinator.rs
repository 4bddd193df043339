//! # Example: Summing Coordinator
//!
//! Sends the same input to every worker in `WORKVISOR_WORKERS`
//! (default `localhost:8001,localhost:8002`) and prints the sum of the results.
//!
//! ```text
//! cargo run --example coordinator -- 5
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use workvisor::{Bus, Config, Coordinator, Subscribe, SubscriberSet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let input: i64 = std::env::args()
        .nth(1)
        .map(|raw| raw.parse::<i64>())
        .transpose()?
        .unwrap_or(5);
    let workers = std::env::var("WORKVISOR_WORKERS")
        .unwrap_or_else(|_| "localhost:8001,localhost:8002".to_string());
    let addrs: Vec<&str> = workers.split(',').map(str::trim).filter(|a| !a.is_empty()).collect();

    let cfg = Config::from_env()?;
    let bus = Bus::new(cfg.bus_capacity_clamped());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(workvisor::LogWriter)];
    let set = Arc::new(SubscriberSet::new(subs, bus.clone()));
    let events = CancellationToken::new();
    let forwarder = set.attach(events.clone());

    let coordinator = Coordinator::connect(&addrs, &cfg, bus).await?;
    let outcome = coordinator.dispatch(workvisor::DataPayload::int64(input)).await;

    for (worker, status) in coordinator.statuses().await {
        match status {
            Ok(status) => tracing::info!(%worker, state = ?status.state, elapsed = ?status.elapsed, "worker status"),
            Err(err) => tracing::warn!(%worker, error = %err, "status unavailable"),
        }
    }

    events.cancel();
    forwarder.await?;

    let aggregate = outcome?;
    for o in aggregate.outcomes() {
        println!("{}: {:?} (warnings: {})", o.worker, o.payload.as_int64(), o.warnings.len());
    }
    println!("sum = {}", aggregate.total()?);
    Ok(())
}
