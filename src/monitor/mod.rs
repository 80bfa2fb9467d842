//! System Monitor (C4): named circuit breakers, reliability metrics, and a
//! memory monitor, all feeding into an overall `SystemHealth` snapshot.

use crate::event_bus::EventBus;
use crate::types::circuit::{CircuitBreakerState, CircuitConfig, CircuitState};
use crate::types::{Event, HealthStatus, OrchestratorError, OrchestratorResult, Priority, SystemHealth, Value};
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

struct Breaker {
    state: Mutex<CircuitBreakerState>,
}

pub struct SystemMonitor {
    breakers: RwLock<HashMap<String, Arc<Breaker>>>,
    memory: RwLock<HashMap<String, u64>>,
    memory_budget_bytes: u64,
    warn_pct: u8,
    critical_pct: u8,
    event_bus: Arc<EventBus>,
}

impl SystemMonitor {
    pub fn new(memory_budget_bytes: u64, warn_pct: u8, critical_pct: u8, event_bus: Arc<EventBus>) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            memory: RwLock::new(HashMap::new()),
            memory_budget_bytes,
            warn_pct,
            critical_pct,
            event_bus,
        }
    }

    pub async fn register(&self, name: impl Into<String>, config: CircuitConfig) {
        let name = name.into();
        let mut breakers = self.breakers.write().await;
        breakers.entry(name.clone()).or_insert_with(|| {
            Arc::new(Breaker {
                state: Mutex::new(CircuitBreakerState::new(name, config)),
            })
        });
    }

    /// Fails fast with `CircuitOpen` while the breaker is open and inside its
    /// recovery window; otherwise executes `op`, updating breaker state from
    /// the outcome.
    pub async fn call<F, Fut, T>(&self, name: &str, op: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let breaker = {
            let breakers = self.breakers.read().await;
            breakers
                .get(name)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(format!("circuit breaker {}", name)))?
        };

        let should_probe = {
            let mut state = breaker.state.lock().await;
            match state.state {
                CircuitState::Closed => true,
                CircuitState::HalfOpen => true,
                CircuitState::Open => {
                    let elapsed = Utc::now() - state.last_state_change;
                    if elapsed.num_seconds() as u64 >= state.config.recovery_timeout_secs {
                        state.state = CircuitState::HalfOpen;
                        state.last_state_change = Utc::now();
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !should_probe {
            return Err(OrchestratorError::CircuitOpen(name.to_string()));
        }

        match op().await {
            Ok(v) => {
                self.on_success(name, &breaker).await;
                Ok(v)
            }
            Err(e) => {
                self.on_failure(name, &breaker).await;
                Err(e)
            }
        }
    }

    async fn on_success(&self, name: &str, breaker: &Arc<Breaker>) {
        let transitioned = {
            let mut state = breaker.state.lock().await;
            match state.state {
                CircuitState::HalfOpen => {
                    state.half_open_successes += 1;
                    if state.half_open_successes >= state.config.half_open_success_threshold {
                        state.state = CircuitState::Closed;
                        state.failure_count = 0;
                        state.half_open_successes = 0;
                        state.last_state_change = Utc::now();
                        Some(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Closed => {
                    state.failure_count = 0;
                    None
                }
                CircuitState::Open => None,
            }
        };
        if let Some(new_state) = transitioned {
            self.emit_health_changed(name, new_state, "recovered").await;
        }
    }

    async fn on_failure(&self, name: &str, breaker: &Arc<Breaker>) {
        let transitioned = {
            let mut state = breaker.state.lock().await;
            state.failure_count += 1;
            state.last_failure_time = Some(Utc::now());
            match state.state {
                CircuitState::HalfOpen => {
                    state.state = CircuitState::Open;
                    state.half_open_successes = 0;
                    state.last_state_change = Utc::now();
                    Some(CircuitState::Open)
                }
                CircuitState::Closed if state.failure_count >= state.config.failure_threshold => {
                    state.state = CircuitState::Open;
                    state.last_state_change = Utc::now();
                    Some(CircuitState::Open)
                }
                _ => None,
            }
        };
        if let Some(new_state) = transitioned {
            self.emit_health_changed(name, new_state, "failure threshold crossed").await;
        }
    }

    async fn emit_health_changed(&self, component: &str, state: CircuitState, reason: &str) {
        let mut payload = HashMap::new();
        payload.insert("component".to_string(), Value::String(component.to_string()));
        payload.insert("state".to_string(), Value::String(format!("{:?}", state)));
        payload.insert("reason".to_string(), Value::String(reason.to_string()));
        let _ = self
            .event_bus
            .emit(Event::new(
                crate::types::event::event_type::SYSTEM_HEALTH_CHANGED,
                payload,
                Priority::High,
            ))
            .await;
    }

    pub async fn breaker_snapshot(&self, name: &str) -> Option<CircuitBreakerState> {
        let breakers = self.breakers.read().await;
        if let Some(b) = breakers.get(name) {
            Some(b.state.lock().await.clone())
        } else {
            None
        }
    }

    /// Records current usage for a named resource against the configured
    /// budget, emitting `RESOURCE_ALERT_CREATED` when a threshold is crossed.
    pub async fn record_memory_usage(&self, resource: impl Into<String>, bytes: u64) {
        let resource = resource.into();
        {
            let mut memory = self.memory.write().await;
            memory.insert(resource.clone(), bytes);
        }
        let pct = ((bytes as f64 / self.memory_budget_bytes as f64) * 100.0) as u8;
        if pct >= self.critical_pct {
            self.emit_resource_alert(&resource, pct, "critical").await;
        } else if pct >= self.warn_pct {
            self.emit_resource_alert(&resource, pct, "warning").await;
        }
    }

    async fn emit_resource_alert(&self, resource: &str, pct: u8, level: &str) {
        let mut payload = HashMap::new();
        payload.insert("component".to_string(), Value::String(resource.to_string()));
        payload.insert("percent_used".to_string(), Value::Int(pct as i64));
        payload.insert("level".to_string(), Value::String(level.to_string()));
        let _ = self
            .event_bus
            .emit(Event::new(
                crate::types::event::event_type::RESOURCE_ALERT_CREATED,
                payload,
                Priority::High,
            ))
            .await;
    }

    pub async fn health(&self) -> SystemHealth {
        let breakers = self.breakers.read().await;
        let mut per_component_status = HashMap::new();
        let mut reasons = Vec::new();
        let mut worst = HealthStatus::Healthy;

        for (name, breaker) in breakers.iter() {
            let state = breaker.state.lock().await;
            let status = match state.state {
                CircuitState::Closed => HealthStatus::Healthy,
                CircuitState::HalfOpen => HealthStatus::Degraded,
                CircuitState::Open => HealthStatus::Unhealthy,
            };
            if status > worst {
                worst = status;
            }
            if status != HealthStatus::Healthy {
                reasons.push(format!("circuit '{}' is {:?}", name, state.state));
            }
            per_component_status.insert(name.clone(), status);
        }

        let memory = self.memory.read().await;
        for (resource, bytes) in memory.iter() {
            let pct = ((*bytes as f64 / self.memory_budget_bytes as f64) * 100.0) as u8;
            let status = if pct >= self.critical_pct {
                HealthStatus::Critical
            } else if pct >= self.warn_pct {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
            if status > worst {
                worst = status;
            }
            if status != HealthStatus::Healthy {
                reasons.push(format!("resource '{}' at {}% of budget", resource, pct));
            }
            per_component_status.insert(resource.clone(), status);
        }

        SystemHealth {
            status: worst,
            per_component_status,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(100, 1000))
    }

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let monitor = SystemMonitor::new(1024, 75, 90, bus());
        monitor
            .register(
                "downstream",
                CircuitConfig {
                    failure_threshold: 3,
                    recovery_timeout_secs: 1,
                    half_open_success_threshold: 1,
                },
            )
            .await;

        for _ in 0..3 {
            let _ = monitor
                .call("downstream", || async { Err::<(), _>(OrchestratorError::Timeout("boom".into())) })
                .await;
        }

        let result = monitor
            .call("downstream", || async { Ok::<_, OrchestratorError>(()) })
            .await;
        assert!(matches!(result, Err(OrchestratorError::CircuitOpen(_))));
    }

    #[tokio::test]
    async fn recovers_through_half_open() {
        let monitor = SystemMonitor::new(1024, 75, 90, bus());
        monitor
            .register(
                "flaky",
                CircuitConfig {
                    failure_threshold: 1,
                    recovery_timeout_secs: 0,
                    half_open_success_threshold: 1,
                },
            )
            .await;

        let _ = monitor
            .call("flaky", || async { Err::<(), _>(OrchestratorError::Timeout("x".into())) })
            .await;

        let snapshot = monitor.breaker_snapshot("flaky").await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Open);

        let result = monitor.call("flaky", || async { Ok::<_, OrchestratorError>(()) }).await;
        assert!(result.is_ok());
        let snapshot = monitor.breaker_snapshot("flaky").await.unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
    }
}
