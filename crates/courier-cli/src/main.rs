use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_core::config::{CourierConfig, RetryPolicyConfig};
use courier_core::domain::{EventEnvelope, HandlerError};
use courier_core::lookup::{
    AdapterError, AttemptPolicy, VehicleModel, VinAdapterRegistry, VinCode, VinQueryResult,
    VinRouter,
};
use courier_core::observability::{LogFormat, init_tracing};
use courier_core::ports::LookupAdapter;
use courier_core::typed::{EventHandler, Topic};
use courier_core::{Courier, CourierBuilder};

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

impl Topic for Greeting {
    const TOPIC: &'static str = "demo.greeting";
}

struct GreetingHandler {
    remaining_failures: AtomicU32,
}

#[async_trait]
impl EventHandler<Greeting> for GreetingHandler {
    async fn handle(&self, event: EventEnvelope<Greeting>) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::SeqCst);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            return Err(HandlerError::transient(format!("intentional failure (left={left})")));
        }
        info!(message_id = %event.id, "Hello, {}!", event.data.name);
        Ok(())
    }
}

/// Lookup adapter with a canned answer; `healthy = false` always errors.
struct CannedVinAdapter {
    name: &'static str,
    priority: i32,
    healthy: bool,
}

#[async_trait]
impl LookupAdapter<VinCode, VehicleModel> for CannedVinAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn query(&self, vin: &VinCode) -> Result<VehicleModel, AdapterError> {
        if !self.healthy {
            return Err(AdapterError::call(format!("{} is unreachable", self.name)));
        }
        Ok(VehicleModel {
            model_code: format!("MDL-{}", &vin.as_str()[..3]),
            model_name: "Demo Hatchback".into(),
            brand: "Courier Motors".into(),
            power_type: Some("hybrid".into()),
        })
    }
}

fn load_config() -> anyhow::Result<CourierConfig> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => CourierConfig::from_path(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => CourierConfig::default(),
    };
    // デモ用に短い遅延で再試行する
    config
        .task_retry
        .strategies
        .entry(Greeting::TOPIC.to_string())
        .or_insert(RetryPolicyConfig {
            max_attempts: 3,
            delays_ms: vec![200, 400],
            backoff_multiplier: 2.0,
            max_delay_ms: 1_000,
        });
    config.worker.poll_interval_ms = config.worker.poll_interval_ms.min(100);
    config.lookup.retry_interval_ms = config.lookup.retry_interval_ms.min(200);
    Ok(config)
}

async fn run_dispatch(courier: &Courier) -> anyhow::Result<()> {
    let record = courier
        .service()
        .enqueue(Greeting {
            name: "courier".into(),
        })
        .await?;
    let message_id = record.message_id().clone();
    info!(%message_id, "enqueued greeting");

    loop {
        let task = courier
            .service()
            .find(&message_id)
            .await?
            .context("enqueued task disappeared")?;
        if task.state().is_terminal() {
            info!(
                state = %task.state(),
                retry_count = task.retry_count(),
                last_error = ?task.error_message(),
                "final status"
            );
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    let status = courier
        .reclaimer()
        .status(courier.config().worker.processing_timeout())
        .await?;
    info!(counts = ?status.counts, healthy = status.is_healthy(), "outbox status");
    Ok(())
}

async fn run_lookup(config: &CourierConfig, cancel: &CancellationToken) -> anyhow::Result<()> {
    let registry = Arc::new(VinAdapterRegistry::new());
    registry.register(Arc::new(CannedVinAdapter {
        name: "remote-vin",
        priority: 10,
        healthy: false,
    }))?;
    registry.register(Arc::new(CannedVinAdapter {
        name: "local-vin",
        priority: 20,
        healthy: true,
    }))?;
    registry.reload(&config.lookup);

    let router = VinRouter::new(registry, AttemptPolicy::from_config(&config.lookup));
    let vin = VinCode::new("lsvam4187c2184847")?;
    let result = VinQueryResult::from_lookup(router.query_with_cancel(&vin, cancel).await);
    info!(%vin, result = %serde_json::to_string(&result)?, "vin lookup finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::Pretty);
    let config = load_config()?;

    let courier = CourierBuilder::new(config.clone())
        .register::<Greeting, _>(GreetingHandler {
            remaining_failures: AtomicU32::new(2),
        })?
        .expect_topics(&[Greeting::TOPIC])
        .build()?;

    let cancel = CancellationToken::new();
    let handle = courier.start_with(&cancel);

    let demo = async {
        run_dispatch(&courier).await?;
        run_lookup(&config, &cancel).await
    };
    let outcome = tokio::select! {
        outcome = demo => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(())
        }
    };

    cancel.cancel();
    handle.shutdown().await;
    outcome
}
