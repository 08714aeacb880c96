//! Periodic report of stalled operations.
//!
//! The monitor only observes. It never fails, retries or cancels anything.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use domain::Operation;
use operation_store::OperationRepository;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::service::OperationService;

/// Configuration for the stall monitor.
#[derive(Debug, Clone)]
pub struct StallMonitorConfig {
    pub interval: Duration,
    pub threshold: Duration,
    pub enabled: bool,
}

impl Default for StallMonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            threshold: Duration::from_secs(30 * 60),
            enabled: true,
        }
    }
}

impl StallMonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Background loop that reports in-progress operations running longer than
/// the configured threshold.
pub struct StallMonitor<R: OperationRepository> {
    service: Arc<OperationService<R>>,
    config: StallMonitorConfig,
}

impl<R: OperationRepository + 'static> StallMonitor<R> {
    pub fn new(service: Arc<OperationService<R>>, config: StallMonitorConfig) -> Self {
        Self { service, config }
    }

    /// Runs one check and reports every stalled operation.
    pub async fn scan_once(&self) -> Result<Vec<Operation>> {
        let stalled = self
            .service
            .list_stalled_operations(self.config.threshold)
            .await?;
        let now = self.service.clock().now();

        for operation in &stalled {
            let stalled_for_secs = operation
                .started_at()
                .map(|started_at| (now - started_at).num_seconds())
                .unwrap_or_default();
            warn!(
                operation_id = %operation.id(),
                r#type = %operation.operation_type(),
                started_at = ?operation.started_at(),
                stalled_for_secs,
                "operation stalled"
            );
        }
        metrics::gauge!("operations_stalled").set(stalled.len() as f64);
        Ok(stalled)
    }

    /// Runs until `shutdown` fires, sleeping on the service clock between
    /// checks.
    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Stall monitor is disabled");
            return;
        }

        info!(
            interval = ?self.config.interval,
            threshold = ?self.config.threshold,
            "Starting stall monitor"
        );

        let clock = Arc::clone(self.service.clock());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stall monitor shutting down");
                    break;
                }
                _ = clock.sleep(self.config.interval) => {
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "Stall check failed");
                    }
                }
            }
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use common::{ManualClock, TenantId};
    use domain::{OperationPolicies, OperationType, Payload};
    use operation_store::InMemoryOperationRepository;

    use super::*;

    fn monitor(
        config: StallMonitorConfig,
    ) -> (
        StallMonitor<InMemoryOperationRepository>,
        Arc<OperationService<InMemoryOperationRepository>>,
        ManualClock,
    ) {
        let clock = ManualClock::starting_now();
        let service = Arc::new(OperationService::new(
            InMemoryOperationRepository::new(),
            Arc::new(clock.clone()),
            Arc::new(OperationPolicies::default()),
        ));
        (
            StallMonitor::new(Arc::clone(&service), config),
            service,
            clock,
        )
    }

    #[test]
    fn default_config() {
        let config = StallMonitorConfig::default();
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.threshold, Duration::from_secs(1800));
        assert!(config.enabled);
        assert!(!config.disabled().enabled);
    }

    #[tokio::test]
    async fn scan_reports_only_old_in_progress_operations() {
        let (monitor, service, clock) = monitor(StallMonitorConfig::default());

        let op = service
            .create_operation(OperationType::TenantCreate, Some(TenantId::new()), Payload::new())
            .await
            .unwrap();
        service.start_operation(op.id()).await.unwrap();
        service
            .create_operation(OperationType::TenantDelete, None, Payload::new())
            .await
            .unwrap();

        assert!(monitor.scan_once().await.unwrap().is_empty());

        clock.advance(Duration::from_secs(3600));
        let stalled = monitor.scan_once().await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id(), op.id());

        // Observe-only: the row is untouched.
        let stored = service.get_operation(op.id()).await.unwrap();
        assert_eq!(stored, stalled[0]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (monitor, _, clock) = monitor(StallMonitorConfig::default());
        let start = clock.now();
        let shutdown = CancellationToken::new();

        let handle = monitor.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        handle.await.unwrap();

        // The manual clock advances by one interval per loop iteration.
        assert!(clock.now() > start);
    }

    #[tokio::test]
    async fn disabled_monitor_returns_immediately() {
        let (monitor, _, clock) = monitor(StallMonitorConfig::default().disabled());
        let start = clock.now();

        monitor.run(CancellationToken::new()).await;
        assert_eq!(clock.now(), start);
    }
}
