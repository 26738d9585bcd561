//! # Breaker Monitor
//!
//! Loads a manager configuration, drives a short simulated workload through the
//! declared breakers and prints the resulting global health report as JSON.
//!
//! ```bash
//! breaker-monitor [config.toml]
//! ```

use anyhow::{Context, Result};
use breaker_core::config::ConfigLoader;
use breaker_core::events::TracingEventSink;
use breaker_core::logging::init_structured_logging;
use breaker_core::resilience::{CallContext, CircuitBreakerManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SIMULATED_CALLS: usize = 40;

#[tokio::main]
async fn main() -> Result<()> {
    init_structured_logging();

    let mut loader = ConfigLoader::new();
    if let Some(path) = std::env::args().nth(1) {
        loader = loader.with_file(path);
    }
    let config = loader.load().context("failed to load breaker configuration")?;

    let manager = Arc::new(CircuitBreakerManager::new(config)?);
    let notifier = manager.spawn_notifier(Arc::new(TracingEventSink));
    manager.initialize()?;

    if manager.names().is_empty() {
        manager.create_from_template("external_api", "external_api", Default::default())?;
        manager.create_from_template("database", "database", Default::default())?;
    }

    let names = manager.names();
    info!(breakers = ?names, "🚀 Running simulated workload");

    for call in 0..SIMULATED_CALLS {
        for (index, name) in names.iter().enumerate() {
            // Every other breaker sees a dependency that fails two calls in three
            let failing = index % 2 == 0 && call % 3 != 0;
            let result = manager
                .execute_with_breaker(
                    name,
                    move || async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        if failing {
                            Err("dependency unavailable".to_string())
                        } else {
                            Ok(())
                        }
                    },
                    CallContext::for_operation("simulated_call"),
                )
                .await;

            if let Err(e) = result {
                warn!(component = %name, kind = %e.kind(), "Simulated call failed");
            }
        }
    }

    manager.run_metrics_collection();
    let health = manager.run_health_check();
    println!("{}", serde_json::to_string_pretty(&health)?);

    manager.shutdown().await;
    notifier.abort();
    Ok(())
}
