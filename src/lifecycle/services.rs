//! Managed background services.
//!
//! # Responsibilities
//! - Collect services during bootstrap (set semantics by instance)
//! - Request every service to start without waiting for any of them
//! - Stop every service independently and report each outcome
//!
//! # Design Decisions
//! - `ServiceSetBuilder` is the only mutable form; `finish` freezes it
//! - No ordering between services is assumed for start or stop
//! - One slow or failing stop never holds up the others past its timeout

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;

/// Boxed error returned by service hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A long-lived background component tied to the server's lifecycle.
#[async_trait]
pub trait ManagedService: Send + Sync + 'static {
    /// Name used in logs and stop reports.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn start(&self) -> Result<(), BoxError>;

    async fn stop(&self) -> Result<(), BoxError>;
}

/// Accumulates services before the server goes live.
#[derive(Default)]
pub struct ServiceSetBuilder {
    services: Vec<Arc<dyn ManagedService>>,
}

impl ServiceSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. Adding the same instance twice has no effect.
    pub fn add(&mut self, service: Arc<dyn ManagedService>) -> bool {
        if self.services.iter().any(|s| same_instance(s, &service)) {
            return false;
        }
        self.services.push(service);
        true
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Freeze the set.
    pub fn finish(self) -> ManagedServices {
        ManagedServices {
            services: self.services.into(),
        }
    }
}

fn same_instance(a: &Arc<dyn ManagedService>, b: &Arc<dyn ManagedService>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// How one service's stop request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    Failed(String),
    TimedOut,
    Panicked,
}

/// Per-service results of `stop_all`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub outcomes: Vec<(String, StopOutcome)>,
}

impl StopReport {
    pub fn outcome(&self, name: &str) -> Option<&StopOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o != StopOutcome::Stopped)
            .count()
    }
}

impl fmt::Display for StopReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} services stopped, {} failed",
            self.outcomes.len() - self.failures(),
            self.failures()
        )
    }
}

/// Finalized set of managed services.
#[derive(Clone)]
pub struct ManagedServices {
    services: Arc<[Arc<dyn ManagedService>]>,
}

impl Default for ManagedServices {
    fn default() -> Self {
        ServiceSetBuilder::new().finish()
    }
}

impl ManagedServices {
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Request every service to start. Returns immediately.
    pub fn start_all(&self) {
        tracing::info!(count = self.services.len(), "Starting all managed services");
        for service in self.services.iter().cloned() {
            tokio::spawn(async move {
                match service.start().await {
                    Ok(()) => tracing::info!(service = service.name(), "Managed service started"),
                    Err(e) => tracing::error!(service = service.name(), error = %e, "Managed service failed to start"),
                }
            });
        }
    }

    /// Stop every service independently, waiting at most `timeout` for each.
    pub async fn stop_all(&self, timeout: Duration) -> StopReport {
        tracing::info!(count = self.services.len(), "Stopping all managed services");

        let mut tasks = JoinSet::new();
        let mut names = Vec::with_capacity(self.services.len());
        for service in self.services.iter().cloned() {
            let index = names.len();
            names.push(service.name().to_string());
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, service.stop()).await {
                    Ok(Ok(())) => StopOutcome::Stopped,
                    Ok(Err(e)) => StopOutcome::Failed(e.to_string()),
                    Err(_) => StopOutcome::TimedOut,
                };
                (index, outcome)
            });
        }

        let mut outcomes: Vec<Option<StopOutcome>> = vec![None; names.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Stop task aborted"),
            }
        }

        let report = StopReport {
            outcomes: names
                .into_iter()
                .zip(outcomes)
                .map(|(name, outcome)| (name, outcome.unwrap_or(StopOutcome::Panicked)))
                .collect(),
        };

        for (name, outcome) in &report.outcomes {
            match outcome {
                StopOutcome::Stopped => tracing::debug!(service = %name, "Managed service stopped"),
                StopOutcome::Failed(e) => tracing::warn!(service = %name, error = %e, "Managed service failed to stop"),
                StopOutcome::TimedOut => tracing::warn!(service = %name, ?timeout, "Managed service did not stop in time"),
                StopOutcome::Panicked => tracing::warn!(service = %name, "Managed service panicked while stopping"),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl ManagedService for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn start(&self) -> Result<(), BoxError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), BoxError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl ManagedService for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn start(&self) -> Result<(), BoxError> {
            Err("cannot start".into())
        }

        async fn stop(&self) -> Result<(), BoxError> {
            Err("cannot stop".into())
        }
    }

    struct Hanging;

    #[async_trait]
    impl ManagedService for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn start(&self) -> Result<(), BoxError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), BoxError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ManagedService for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn start(&self) -> Result<(), BoxError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), BoxError> {
            panic!("stop exploded");
        }
    }

    #[test]
    fn adding_same_instance_twice_is_idempotent() {
        let service: Arc<dyn ManagedService> = Arc::new(Counting::default());
        let mut builder = ServiceSetBuilder::new();
        assert!(builder.add(service.clone()));
        assert!(!builder.add(service));
        assert!(builder.add(Arc::new(Counting::default())));
        assert_eq!(builder.finish().len(), 2);
    }

    #[tokio::test]
    async fn start_all_requests_every_service() {
        let counting = Arc::new(Counting::default());
        let mut builder = ServiceSetBuilder::new();
        builder.add(counting.clone());
        builder.add(Arc::new(Failing));
        let services = builder.finish();

        services.start_all();

        for _ in 0..100 {
            if counting.starts.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_stop_does_not_block_others() {
        let counting = Arc::new(Counting::default());
        let mut builder = ServiceSetBuilder::new();
        builder.add(Arc::new(Failing));
        builder.add(counting.clone());
        let services = builder.finish();

        let report = services.stop_all(Duration::from_secs(1)).await;

        assert_eq!(counting.stops.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcome("counting"), Some(&StopOutcome::Stopped));
        assert_eq!(
            report.outcome("failing"),
            Some(&StopOutcome::Failed("cannot stop".into()))
        );
        assert_eq!(report.failures(), 1);
    }

    #[tokio::test]
    async fn hanging_and_panicking_stops_are_contained() {
        let counting = Arc::new(Counting::default());
        let mut builder = ServiceSetBuilder::new();
        builder.add(Arc::new(Hanging));
        builder.add(Arc::new(Panicking));
        builder.add(counting.clone());
        let services = builder.finish();

        let report = services.stop_all(Duration::from_millis(50)).await;

        assert_eq!(report.outcome("hanging"), Some(&StopOutcome::TimedOut));
        assert_eq!(report.outcome("panicking"), Some(&StopOutcome::Panicked));
        assert_eq!(report.outcome("counting"), Some(&StopOutcome::Stopped));
        assert_eq!(report.to_string(), "1 services stopped, 2 failed");
    }

    #[tokio::test]
    async fn empty_set_stops_immediately() {
        let report = ManagedServices::default().stop_all(Duration::from_secs(1)).await;
        assert!(report.outcomes.is_empty());
    }
}
