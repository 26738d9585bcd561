//! # Circuit Breaker Manager
//!
//! Manages multiple named circuit breakers. Provides creation (including
//! template-based creation), centralized administrative control, global statistics
//! and health aggregation, and three periodic background sweeps:
//!
//! - **health check**: publishes a `HealthAlert` when global health is CRITICAL
//! - **metrics collection**: stores and logs the latest [`GlobalStats`]
//! - **cleanup**: prunes expired call records from every breaker's window
//!
//! The registry is guarded by a single `RwLock`. Creation and removal take the
//! write lock; aggregation clones a snapshot of breaker handles under the read lock
//! and works on the snapshot.

use crate::config::ManagerConfig;
use crate::error::{ResilienceError, Result};
use crate::events::{BreakerEvent, EventPublisher, EventSink};
use crate::logging::{log_breaker_operation, log_error};
use crate::resilience::background::BackgroundTask;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
use crate::resilience::config::{CircuitBreakerConfig, CircuitBreakerConfigPatch};
use crate::resilience::context::CallContext;
use crate::resilience::health::{BreakerHealth, GlobalHealth, GlobalHealthStatus, HealthStatus};
use crate::resilience::metrics::{
    CircuitBreakerStats, GlobalStats, MetricsCollector, TracingMetricsCollector,
};
use crate::resilience::templates::TemplateCatalog;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Administrative action applied across several breakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BulkOperation {
    Reset,
    ForceOpen,
    ForceClose,
    UpdateConfig,
}

impl fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BulkOperation::Reset => "reset",
            BulkOperation::ForceOpen => "force-open",
            BulkOperation::ForceClose => "force-close",
            BulkOperation::UpdateConfig => "update-config",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationRequest {
    pub operation: BulkOperation,
    /// Target breakers; every registered breaker when empty
    #[serde(default)]
    pub breaker_names: Vec<String>,
    /// Required for `update-config`
    #[serde(default)]
    pub config: Option<CircuitBreakerConfigPatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation: BulkOperation,
    pub results: Vec<BulkItemResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Listing entry for a registered breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSummary {
    pub name: String,
    pub state: CircuitState,
    pub health_score: f64,
    pub status: HealthStatus,
    pub is_healthy: bool,
}

/// Manager for multiple circuit breakers across system components
pub struct CircuitBreakerManager {
    config: RwLock<ManagerConfig>,

    /// Collection of circuit breakers by name
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,

    templates: RwLock<TemplateCatalog>,

    publisher: EventPublisher,

    metrics_collector: Arc<dyn MetricsCollector>,

    initialized: AtomicBool,

    sweeps: Mutex<Vec<BackgroundTask>>,

    last_metrics: RwLock<Option<GlobalStats>>,
}

impl fmt::Debug for CircuitBreakerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerManager")
            .field("breakers", &self.names())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl CircuitBreakerManager {
    /// Create a manager; breakers and sweeps start on [`initialize`](Self::initialize)
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let mut templates = TemplateCatalog::builtin();
        for (name, template) in &config.templates {
            templates.register(name.clone(), template.clone());
        }

        info!(
            max_breakers = config.max_breakers,
            templates = templates.names().len(),
            "Initializing circuit breaker manager"
        );

        Ok(Self {
            publisher: EventPublisher::new(config.event_channel_capacity),
            config: RwLock::new(config),
            breakers: RwLock::new(HashMap::new()),
            templates: RwLock::new(templates),
            metrics_collector: Arc::new(TracingMetricsCollector),
            initialized: AtomicBool::new(false),
            sweeps: Mutex::new(Vec::new()),
            last_metrics: RwLock::new(None),
        })
    }

    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = collector;
        self
    }

    /// Create declared breakers, start every breaker and start the background sweeps
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let declared = self.config.read().breakers.clone();
        for (name, definition) in declared {
            if self.contains(&name) {
                continue;
            }
            match &definition.template {
                Some(template) => self.create_from_template(&name, template, definition.config)?,
                None => self.create(&name, definition.config)?,
            };
        }

        self.initialized.store(true, Ordering::Release);
        for breaker in self.snapshot() {
            breaker.start();
        }
        self.start_sweeps();

        log_breaker_operation(
            "initialize",
            None,
            "ok",
            Some(&format!("{} breakers", self.breakers.read().len())),
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn config(&self) -> ManagerConfig {
        self.config.read().clone()
    }

    /// Create a breaker from the manager default configuration plus `overrides`
    pub fn create(&self, name: &str, overrides: CircuitBreakerConfigPatch) -> Result<Arc<CircuitBreaker>> {
        let config = overrides.apply_to(&self.config.read().base_breaker_config());
        self.register(name, config)
    }

    /// Create a breaker from a named template with `overrides` applied on top
    pub fn create_from_template(
        &self,
        name: &str,
        template: &str,
        overrides: CircuitBreakerConfigPatch,
    ) -> Result<Arc<CircuitBreaker>> {
        let patch = self.templates.read().get(template)?.merge(&overrides);
        let config = patch.apply_to(&self.config.read().base_breaker_config());

        debug!(component = %name, template = %template, "Creating circuit breaker from template");
        self.register(name, config)
    }

    /// Create a breaker from a fully-resolved configuration
    ///
    /// This is the only way to attach an `error_filter`.
    pub fn create_with_config(&self, name: &str, config: CircuitBreakerConfig) -> Result<Arc<CircuitBreaker>> {
        self.register(name, config)
    }

    /// Get an existing breaker or create one with the default configuration
    pub fn get_or_create(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        if let Some(breaker) = self.breaker(name) {
            return Ok(breaker);
        }

        match self.create(name, CircuitBreakerConfigPatch::default()) {
            Ok(breaker) => Ok(breaker),
            // Another caller created it between the lookup and the insert
            Err(e) => self.breaker(name).ok_or(e),
        }
    }

    fn register(&self, name: &str, config: CircuitBreakerConfig) -> Result<Arc<CircuitBreaker>> {
        let max_breakers = self.config.read().max_breakers;
        let mut breakers = self.breakers.write();

        if breakers.contains_key(name) {
            return Err(ResilienceError::ConfigurationError(format!(
                "Circuit breaker already exists: {name}"
            )));
        }

        if breakers.len() >= max_breakers {
            warn!(
                component = %name,
                current_count = breakers.len(),
                max_allowed = max_breakers,
                "Maximum circuit breaker limit reached"
            );
            return Err(ResilienceError::ConfigurationError(format!(
                "Maximum number of circuit breakers reached ({max_breakers})"
            )));
        }

        let breaker = Arc::new(
            CircuitBreaker::new(name, config)?
                .with_publisher(self.publisher.clone())
                .with_metrics_collector(self.metrics_collector.clone()),
        );

        if self.is_initialized() {
            breaker.start();
        }

        breakers.insert(name.to_string(), breaker.clone());

        info!(
            component = %name,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        Ok(breaker)
    }

    pub fn breaker(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.read().contains_key(name)
    }

    fn require(&self, name: &str) -> Result<Arc<CircuitBreaker>> {
        self.breaker(name)
            .ok_or_else(|| ResilienceError::BreakerNotFound(name.to_string()))
    }

    /// Stop and remove a breaker; returns false if it was not registered
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.breakers.write().remove(name);

        match removed {
            Some(breaker) => {
                breaker.stop();
                info!(
                    component = %name,
                    remaining_count = self.breakers.read().len(),
                    "Removed circuit breaker"
                );
                true
            }
            None => false,
        }
    }

    /// Registered breaker names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Name, state and health of every breaker, sorted by name
    pub fn list_breakers(&self) -> Vec<BreakerSummary> {
        let mut summaries: Vec<BreakerSummary> = self
            .snapshot()
            .iter()
            .map(|breaker| {
                let health = breaker.health();
                BreakerSummary {
                    name: health.name,
                    state: health.state,
                    health_score: health.health_score,
                    status: health.status,
                    is_healthy: health.is_healthy,
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.read().values().cloned().collect()
    }

    /// Execute an async operation through the named breaker
    pub async fn execute_with_breaker<F, Fut, T, E>(
        &self,
        name: &str,
        operation: F,
        context: CallContext,
    ) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let breaker = self.require(name)?;
        breaker.execute(operation, context).await
    }

    /// Execute a synchronous operation through the named breaker
    pub fn execute_sync_with_breaker<F, T, E>(
        &self,
        name: &str,
        operation: F,
        context: CallContext,
    ) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: fmt::Display + 'static,
    {
        let breaker = self.require(name)?;
        breaker.execute_sync(operation, context)
    }

    /// Execute as an emergency call once `code` matches the configured emergency code
    pub async fn execute_with_emergency_bypass<F, Fut, T, E>(
        &self,
        name: &str,
        operation: F,
        mut context: CallContext,
        code: &str,
    ) -> std::result::Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let accepted = self
            .config
            .read()
            .emergency_code
            .as_deref()
            .is_some_and(|expected| expected == code);

        if !accepted {
            warn!(
                target: "breaker_core::audit",
                component = %name,
                operation = context.operation_name(),
                "Emergency execution refused: invalid emergency code"
            );
            return Err(ResilienceError::EmergencyCodeRejected(name.to_string()).into());
        }

        context.is_emergency = true;
        self.execute_with_breaker(name, operation, context).await
    }

    pub fn breaker_config(&self, name: &str) -> Result<Arc<CircuitBreakerConfig>> {
        Ok(self.require(name)?.config())
    }

    /// Apply a partial configuration update to one breaker
    pub fn update_breaker_config(&self, name: &str, patch: &CircuitBreakerConfigPatch) -> Result<()> {
        self.require(name)?.apply_patch(patch)?;
        log_breaker_operation("update-config", Some(name), "ok", None);
        Ok(())
    }

    pub fn breaker_stats(&self, name: &str) -> Result<CircuitBreakerStats> {
        Ok(self.require(name)?.stats())
    }

    pub fn breaker_health(&self, name: &str) -> Result<BreakerHealth> {
        Ok(self.require(name)?.health())
    }

    pub fn reset(&self, name: &str) -> Result<()> {
        self.require(name)?.reset();
        log_breaker_operation("reset", Some(name), "ok", None);
        Ok(())
    }

    pub fn force_open(&self, name: &str) -> Result<()> {
        self.require(name)?.force_open();
        log_breaker_operation("force-open", Some(name), "ok", None);
        Ok(())
    }

    pub fn force_close(&self, name: &str) -> Result<()> {
        self.require(name)?.force_close();
        log_breaker_operation("force-close", Some(name), "ok", None);
        Ok(())
    }

    /// Apply one administrative action to many breakers, reporting per-breaker outcomes
    pub fn bulk_operation(&self, request: &BulkOperationRequest) -> Result<BulkOperationResult> {
        if request.operation == BulkOperation::UpdateConfig && request.config.is_none() {
            return Err(ResilienceError::ConfigurationError(
                "update-config requires a config".to_string(),
            ));
        }

        let targets = if request.breaker_names.is_empty() {
            self.names()
        } else {
            request.breaker_names.clone()
        };

        let results: Vec<BulkItemResult> = targets
            .into_iter()
            .map(|name| {
                let outcome = self.require(&name).and_then(|breaker| match request.operation {
                    BulkOperation::Reset => {
                        breaker.reset();
                        Ok(())
                    }
                    BulkOperation::ForceOpen => {
                        breaker.force_open();
                        Ok(())
                    }
                    BulkOperation::ForceClose => {
                        breaker.force_close();
                        Ok(())
                    }
                    BulkOperation::UpdateConfig => match &request.config {
                        Some(patch) => breaker.apply_patch(patch),
                        None => Ok(()),
                    },
                });

                BulkItemResult {
                    name,
                    success: outcome.is_ok(),
                    error: outcome.err().map(|e| e.to_string()),
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;

        log_breaker_operation(
            &request.operation.to_string(),
            None,
            if failed == 0 { "ok" } else { "partial" },
            Some(&format!("{succeeded} succeeded, {failed} failed")),
        );

        Ok(BulkOperationResult {
            operation: request.operation,
            results,
            succeeded,
            failed,
        })
    }

    /// Totals, state counts and the most failing breakers
    pub fn global_stats(&self) -> GlobalStats {
        let stats: Vec<CircuitBreakerStats> = self.snapshot().iter().map(|b| b.stats()).collect();
        GlobalStats::from_breakers(&stats)
    }

    /// Average health, cascade risk and recommended actions across all breakers
    pub fn global_health(&self) -> GlobalHealth {
        let health: Vec<BreakerHealth> = self.snapshot().iter().map(|b| b.health()).collect();
        GlobalHealth::from_breakers(&health)
    }

    /// Latest snapshot gathered by the metrics sweep
    pub fn last_metrics(&self) -> Option<GlobalStats> {
        self.last_metrics.read().clone()
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.publisher.subscribe()
    }

    /// Forward all breaker and manager events to `sink`
    pub fn spawn_notifier(&self, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
        self.publisher.spawn_notifier(sink)
    }

    /// One health-check pass; publishes an alert when global health is critical
    pub fn run_health_check(&self) -> GlobalHealth {
        let health = self.global_health();

        if health.status == GlobalHealthStatus::Critical {
            let message = format!(
                "Global circuit breaker health is CRITICAL: {} of {} open, average score {:.1}",
                health.open_breakers, health.total_breakers, health.average_health_score
            );
            error!(
                open_breakers = health.open_breakers,
                average_health_score = health.average_health_score,
                cascade_failure_risk = ?health.cascade_failure_risk,
                "🚨 {}",
                message
            );

            self.publisher.publish(BreakerEvent::HealthAlert {
                status: health.status,
                average_health_score: health.average_health_score,
                cascade_failure_risk: health.cascade_failure_risk,
                open_breakers: health.open_breakers,
                message,
                timestamp: Utc::now(),
            });
        } else {
            debug!(
                status = ?health.status,
                average_health_score = health.average_health_score,
                "Circuit breaker health check"
            );
        }

        health
    }

    /// One metrics pass; stores and records the global snapshot
    pub fn run_metrics_collection(&self) -> GlobalStats {
        let stats = self.global_stats();
        self.metrics_collector.record_global_stats(&stats);
        *self.last_metrics.write() = Some(stats.clone());
        stats
    }

    /// One cleanup pass; returns the number of pruned call records
    pub fn run_cleanup(&self) -> usize {
        let removed: usize = self.snapshot().iter().map(|b| b.run_maintenance()).sum();
        debug!(removed = removed, "Circuit breaker cleanup completed");
        removed
    }

    fn start_sweeps(self: &Arc<Self>) {
        let config = self.config();
        let mut tasks = Vec::new();

        if config.enable_health_checks {
            tasks.push(self.spawn_sweep("health-check", config.health_check_interval(), |manager| {
                manager.run_health_check();
            }));
        }

        if config.enable_metrics_collection {
            tasks.push(self.spawn_sweep(
                "metrics-collection",
                config.metrics_collection_interval(),
                |manager| {
                    manager.run_metrics_collection();
                },
            ));
        }

        if config.enable_cleanup {
            tasks.push(self.spawn_sweep("cleanup", config.cleanup_interval(), |manager| {
                manager.run_cleanup();
            }));
        }

        let started = tasks.iter().filter(|task| task.is_some()).count();
        let mut sweeps = self.sweeps.lock();
        for task in sweeps.drain(..) {
            task.cancel();
        }
        sweeps.extend(tasks.into_iter().flatten());

        info!(sweeps = started, "Circuit breaker background sweeps started");
    }

    fn spawn_sweep(
        self: &Arc<Self>,
        name: &str,
        interval: std::time::Duration,
        sweep: fn(&CircuitBreakerManager),
    ) -> Option<BackgroundTask> {
        let manager: Weak<CircuitBreakerManager> = Arc::downgrade(self);

        BackgroundTask::spawn_periodic(format!("breaker-manager-{name}"), interval, move || {
            let manager = manager.clone();
            async move {
                if let Some(manager) = manager.upgrade() {
                    sweep(&manager);
                }
            }
        })
    }

    /// Replace manager settings; running sweeps restart with the new intervals
    ///
    /// Existing breakers keep their configuration.
    pub fn update_config(self: &Arc<Self>, config: ManagerConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            log_error("manager", "update-config", &e.to_string(), None);
            return Err(e.into());
        }

        {
            let mut templates = self.templates.write();
            for (name, template) in &config.templates {
                templates.register(name.clone(), template.clone());
            }
        }
        *self.config.write() = config;

        if self.is_initialized() {
            self.start_sweeps();
        }

        log_breaker_operation("update-manager-config", None, "ok", None);
        Ok(())
    }

    /// Register an additional template
    pub fn register_template(&self, name: &str, template: CircuitBreakerConfigPatch) {
        self.templates.write().register(name, template);
    }

    pub fn template_names(&self) -> Vec<String> {
        self.templates.read().names()
    }

    /// Stop sweeps and every breaker, then clear the registry
    pub async fn shutdown(&self) {
        let sweeps: Vec<BackgroundTask> = self.sweeps.lock().drain(..).collect();
        for sweep in sweeps {
            sweep.shutdown().await;
        }

        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.write().drain().map(|(_, breaker)| breaker).collect();
        for breaker in &breakers {
            breaker.stop();
        }

        self.initialized.store(false, Ordering::Release);
        log_breaker_operation(
            "shutdown",
            None,
            "ok",
            Some(&format!("{} breakers stopped", breakers.len())),
        );
    }
}
