//! Circuit breaker fabric
//!
//! One policy object instantiated at global, per-component, per-strategy,
//! and per-token scope. A breaker trips after a run of consecutive failures
//! and auto-resets once its cooldown has elapsed. State can be persisted so
//! an activation survives a process restart.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::BreakerConfig;

/// Scope of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// Affects all operations
    Global,
    /// Affects a specific component
    Component,
    /// Affects a specific strategy
    Operation,
    /// Affects a specific token
    Token,
}

impl BreakerScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerScope::Global => "global",
            BreakerScope::Component => "component",
            BreakerScope::Operation => "operation",
            BreakerScope::Token => "token",
        }
    }
}

/// Breaker transition metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub total_activations: u64,
    pub total_resets: u64,
    pub total_failures: u64,
    pub average_reset_minutes: f64,
}

/// Serializable breaker state (persisted on every transition)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerState {
    pub scope: BreakerScope,
    pub identifier: String,
    pub consecutive_failures: u32,
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub metrics: BreakerMetrics,
}

/// Event emitted on breaker transitions, intended for a notification sink
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    pub scope: BreakerScope,
    pub identifier: String,
    pub activated: bool,
    pub consecutive_failures: u32,
}

struct Inner {
    consecutive_failures: u32,
    is_active: bool,
    activated_at: Option<DateTime<Utc>>,
    metrics: BreakerMetrics,
}

/// Circuit breaker with consecutive-failure threshold and timed auto-reset
pub struct CircuitBreaker {
    scope: BreakerScope,
    identifier: String,
    max_consecutive_failures: u32,
    reset_after: Duration,
    inner: Mutex<Inner>,
    persistence_path: Option<PathBuf>,
    events: Option<broadcast::Sender<BreakerEvent>>,
}

impl CircuitBreaker {
    pub fn new(
        scope: BreakerScope,
        identifier: impl Into<String>,
        max_consecutive_failures: u32,
        reset_after: Duration,
    ) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
            max_consecutive_failures,
            reset_after,
            inner: Mutex::new(Inner {
                consecutive_failures: 0,
                is_active: false,
                activated_at: None,
                metrics: BreakerMetrics::default(),
            }),
            persistence_path: None,
            events: None,
        }
    }

    /// Attach a transition event channel
    pub fn with_events(mut self, events: broadcast::Sender<BreakerEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attach a persistence file. Existing state is loaded so an activation
    /// survives a restart.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if path.exists() {
            match Self::load_state(&path) {
                Ok(state) => {
                    let mut inner = self.inner.lock().expect("breaker lock poisoned");
                    inner.consecutive_failures = state.consecutive_failures;
                    inner.is_active = state.is_active;
                    inner.activated_at = state.activated_at;
                    inner.metrics = state.metrics;
                    info!(
                        scope = self.scope.as_str(),
                        id = %self.identifier,
                        active = inner.is_active,
                        "loaded persisted breaker state"
                    );
                }
                Err(e) => {
                    error!(
                        scope = self.scope.as_str(),
                        id = %self.identifier,
                        "failed to load breaker state: {e}"
                    );
                }
            }
        }
        self.persistence_path = Some(path);
        self
    }

    /// Check whether the breaker currently gates work. Handles the timed
    /// auto-reset: an expired activation is cleared before answering.
    pub fn check(&self) -> bool {
        let expired = {
            let inner = self.inner.lock().expect("breaker lock poisoned");
            if !inner.is_active {
                return false;
            }
            match inner.activated_at {
                Some(at) => {
                    let elapsed = Utc::now().signed_duration_since(at);
                    elapsed.to_std().unwrap_or_default() >= self.reset_after
                }
                // is_active implies activated_at; treat missing stamp as expired
                None => true,
            }
        };

        if expired {
            info!(
                scope = self.scope.as_str(),
                id = %self.identifier,
                "auto-resetting breaker after cooldown"
            );
            self.reset();
            return false;
        }
        true
    }

    /// Record one failure; trips the breaker at the threshold
    pub fn increment_failures(&self) {
        let activate = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            inner.consecutive_failures += 1;
            inner.metrics.total_failures += 1;
            warn!(
                scope = self.scope.as_str(),
                id = %self.identifier,
                failures = inner.consecutive_failures,
                threshold = self.max_consecutive_failures,
                "breaker failure recorded"
            );
            inner.consecutive_failures >= self.max_consecutive_failures && !inner.is_active
        };
        if activate {
            self.activate();
        }
    }

    /// Zero the failure counter without changing active state
    pub fn reset_failures(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
    }

    /// Trip the breaker. Idempotent.
    pub fn activate(&self) {
        let event = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if inner.is_active {
                return;
            }
            inner.is_active = true;
            inner.activated_at = Some(Utc::now());
            inner.metrics.total_activations += 1;
            error!(
                scope = self.scope.as_str(),
                id = %self.identifier,
                failures = inner.consecutive_failures,
                "CIRCUIT BREAKER ACTIVATED, operations suspended for {:?}",
                self.reset_after
            );
            BreakerEvent {
                scope: self.scope,
                identifier: self.identifier.clone(),
                activated: true,
                consecutive_failures: inner.consecutive_failures,
            }
        };
        self.publish(event);
        self.persist();
    }

    /// Clear the breaker and its failure counter. Idempotent.
    pub fn reset(&self) {
        let event = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            if inner.is_active {
                inner.metrics.total_resets += 1;
                if let Some(at) = inner.activated_at {
                    let open_minutes =
                        Utc::now().signed_duration_since(at).num_milliseconds() as f64 / 60_000.0;
                    let n = inner.metrics.total_resets as f64;
                    inner.metrics.average_reset_minutes =
                        (inner.metrics.average_reset_minutes * (n - 1.0) + open_minutes) / n;
                }
            }
            inner.is_active = false;
            inner.activated_at = None;
            inner.consecutive_failures = 0;
            info!(scope = self.scope.as_str(), id = %self.identifier, "breaker reset");
            BreakerEvent {
                scope: self.scope,
                identifier: self.identifier.clone(),
                activated: false,
                consecutive_failures: 0,
            }
        };
        self.publish(event);
        self.persist();
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().expect("breaker lock poisoned").is_active
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }

    pub fn metrics(&self) -> BreakerMetrics {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .metrics
            .clone()
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn scope(&self) -> BreakerScope {
        self.scope
    }

    /// Current state in serializable form
    pub fn snapshot(&self) -> BreakerState {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerState {
            scope: self.scope,
            identifier: self.identifier.clone(),
            consecutive_failures: inner.consecutive_failures,
            is_active: inner.is_active,
            activated_at: inner.activated_at,
            metrics: inner.metrics.clone(),
        }
    }

    fn publish(&self, event: BreakerEvent) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }

    fn persist(&self) {
        let Some(path) = &self.persistence_path else {
            return;
        };
        let state = self.snapshot();
        match serde_json::to_string(&state) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    error!(id = %self.identifier, "failed to persist breaker state: {e}");
                }
            }
            Err(e) => error!(id = %self.identifier, "failed to serialize breaker state: {e}"),
        }
    }

    fn load_state(path: &Path) -> crate::error::Result<BreakerState> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| crate::error::Error::BreakerPersistence(e.to_string()))?;
        serde_json::from_str(&data)
            .map_err(|e| crate::error::Error::BreakerPersistence(e.to_string()))
    }
}

/// Components guarded by dedicated breakers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    TradeQueue,
    OrderManager,
    TransactionTracker,
    StrategyEvaluator,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::TradeQueue => "trade_queue",
            Component::OrderManager => "order_manager",
            Component::TransactionTracker => "transaction_tracker",
            Component::StrategyEvaluator => "strategy_evaluator",
        }
    }
}

/// Registry of every breaker in the process. Strategy and token breakers are
/// created lazily on first use and retained.
pub struct BreakerRegistry {
    config: BreakerConfig,
    global: Arc<CircuitBreaker>,
    components: DashMap<Component, Arc<CircuitBreaker>>,
    strategies: DashMap<String, Arc<CircuitBreaker>>,
    tokens: DashMap<String, Arc<CircuitBreaker>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        let global = Arc::new(Self::build(
            &config,
            BreakerScope::Global,
            "global".to_string(),
            config.component_max_failures,
            minutes(config.component_reset_minutes),
            events.clone(),
        ));
        Self {
            config,
            global,
            components: DashMap::new(),
            strategies: DashMap::new(),
            tokens: DashMap::new(),
            events,
        }
    }

    fn build(
        config: &BreakerConfig,
        scope: BreakerScope,
        identifier: String,
        max_failures: u32,
        reset_after: Duration,
        events: broadcast::Sender<BreakerEvent>,
    ) -> CircuitBreaker {
        let breaker = CircuitBreaker::new(scope, identifier.clone(), max_failures, reset_after)
            .with_events(events);
        if config.persistence_dir.is_empty() {
            breaker
        } else {
            let file = format!("{}_{}.json", scope.as_str(), sanitize(&identifier));
            breaker.with_persistence(Path::new(&config.persistence_dir).join(file))
        }
    }

    /// The global breaker; active means no new work anywhere
    pub fn global(&self) -> Arc<CircuitBreaker> {
        self.global.clone()
    }

    pub fn component(&self, component: Component) -> Arc<CircuitBreaker> {
        self.components
            .entry(component)
            .or_insert_with(|| {
                Arc::new(Self::build(
                    &self.config,
                    BreakerScope::Component,
                    component.as_str().to_string(),
                    self.config.component_max_failures,
                    minutes(self.config.component_reset_minutes),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn strategy(&self, strategy_id: &str) -> Arc<CircuitBreaker> {
        self.strategies
            .entry(strategy_id.to_string())
            .or_insert_with(|| {
                Arc::new(Self::build(
                    &self.config,
                    BreakerScope::Operation,
                    strategy_id.to_string(),
                    self.config.scoped_max_failures,
                    minutes(self.config.scoped_reset_minutes),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    pub fn token(&self, mint: &str) -> Arc<CircuitBreaker> {
        self.tokens
            .entry(mint.to_string())
            .or_insert_with(|| {
                Arc::new(Self::build(
                    &self.config,
                    BreakerScope::Token,
                    mint.to_string(),
                    self.config.scoped_max_failures,
                    minutes(self.config.scoped_reset_minutes),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Subscribe to breaker transition events
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Active breakers by scope, for the status surface
    pub fn active_snapshot(&self) -> Vec<BreakerState> {
        let mut out = Vec::new();
        if self.global.is_active() {
            out.push(self.global.snapshot());
        }
        for entry in self.components.iter() {
            if entry.value().is_active() {
                out.push(entry.value().snapshot());
            }
        }
        for entry in self.strategies.iter() {
            if entry.value().is_active() {
                out.push(entry.value().snapshot());
            }
        }
        for entry in self.tokens.iter() {
            if entry.value().is_active() {
                out.push(entry.value().snapshot());
            }
        }
        out
    }
}

fn minutes(m: f64) -> Duration {
    Duration::from_secs_f64(m * 60.0)
}

fn sanitize(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_breaker(max: u32, reset_after: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerScope::Component, "test", max, reset_after)
    }

    #[test]
    fn test_trips_exactly_at_threshold() {
        let breaker = test_breaker(3, Duration::from_secs(60));

        breaker.increment_failures();
        breaker.increment_failures();
        assert!(!breaker.is_active());

        breaker.increment_failures();
        assert!(breaker.is_active());
        assert!(breaker.check());
    }

    #[test]
    fn test_reset_failures_keeps_active_state() {
        let breaker = test_breaker(2, Duration::from_secs(60));
        breaker.increment_failures();
        breaker.increment_failures();
        assert!(breaker.is_active());

        breaker.reset_failures();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.is_active());
    }

    #[test]
    fn test_auto_reset_after_cooldown() {
        let breaker = test_breaker(1, Duration::from_millis(30));
        breaker.increment_failures();
        assert!(breaker.check());

        std::thread::sleep(Duration::from_millis(50));
        assert!(!breaker.check());
        assert!(!breaker.is_active());
        assert_eq!(breaker.metrics().total_resets, 1);
    }

    #[test]
    fn test_activate_and_reset_idempotent() {
        let breaker = test_breaker(5, Duration::from_secs(60));
        breaker.activate();
        breaker.activate();
        assert_eq!(breaker.metrics().total_activations, 1);

        breaker.reset();
        breaker.reset();
        assert_eq!(breaker.metrics().total_resets, 1);
    }

    #[test]
    fn test_state_round_trip() {
        let breaker = test_breaker(2, Duration::from_secs(60));
        breaker.increment_failures();
        breaker.increment_failures();

        let state = breaker.snapshot();
        let json = serde_json::to_string(&state).unwrap();
        let restored: BreakerState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, restored);
        assert!(restored.is_active);
        assert!(restored.activated_at.is_some());
    }

    #[test]
    fn test_persistence_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("breaker.json");

        let breaker = test_breaker(1, Duration::from_secs(600))
            .with_persistence(path.clone());
        breaker.increment_failures();
        assert!(breaker.is_active());

        let restored = test_breaker(1, Duration::from_secs(600)).with_persistence(path);
        assert!(restored.is_active());
        assert!(restored.check());
    }

    #[test]
    fn test_registry_lazy_scoped_breakers() {
        let registry = BreakerRegistry::new(BreakerConfig::default());

        let a = registry.strategy("momentum");
        let b = registry.strategy("momentum");
        assert!(Arc::ptr_eq(&a, &b));

        let t = registry.token("MintA");
        t.activate();
        assert!(registry.token("MintA").is_active());
        assert!(!registry.token("MintB").is_active());

        let active = registry.active_snapshot();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].identifier, "MintA");
    }

    #[test]
    fn test_registry_events_on_transition() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let mut rx = registry.subscribe();

        registry.global().activate();
        let event = rx.try_recv().unwrap();
        assert!(event.activated);
        assert_eq!(event.scope, BreakerScope::Global);
    }
}
