//! Watchdog (component I).
//!
//! Polls a fixed roster of services with state-change-only logging, a grace
//! period after confirmed-healthy, bounded restart attempts with rate-limited
//! notifications, and a consent gate that restricts monitoring to the
//! essential swap proxy until the user has opted in (§9 Open Question: this
//! spec enforces strict consent gating, unlike the legacy source it's
//! modeled on, which auto-started auxiliary services on legacy fields).
//!
//! The restart path for the swap proxy is a direct `SupervisorMsg` send; for
//! auxiliary services it's an opaque callback registered at construction
//! (§9 "restart commands as opaque callbacks"), since those services are
//! explicitly out of scope here (external container/runtime collaborator).

use crate::app_state::SettingsState;
use crate::protocol::{HealthMetric, ServiceKey, ServiceRecord, ServiceStatus, SupervisorEvent, SupervisorMsg, WatchdogMsg};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};

const STARTUP_DELAY: Duration = Duration::from_secs(60);
const CYCLE_INTERVAL: Duration = Duration::from_secs(30);
const GRACE_PERIOD: Duration = Duration::from_secs(30 * 60);
const RESTART_RETRY_DELAY: Duration = Duration::from_secs(10);
const MAX_CONSECUTIVE_FAILURES: u32 = 3;
const MAX_NOTIFICATION_ATTEMPTS: u32 = 3;

/// Health check / restart callbacks for one service, registered at
/// construction rather than threaded through every call site.
pub struct ServiceProbe {
    pub health_check: Box<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>,
    pub restart: Box<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>,
}

struct ServiceState {
    record: ServiceRecord,
    metric: HealthMetric,
    probe: ServiceProbe,
    grace_until: Option<Instant>,
    unhealthy_since: Option<Instant>,
    notification_attempts: u32,
}

pub struct WatchdogActor {
    services: HashMap<ServiceKey, ServiceState>,
    settings: SettingsState,
    events_rx: broadcast::Receiver<SupervisorEvent>,
    setup_complete: bool,
    verbose: bool,
}

impl WatchdogActor {
    /// Builds the roster with only the essential swap-proxy service tracked.
    /// `ContainerRuntime`/`AuxIndexer` are real `ServiceKey` variants (used by
    /// the consent document and wire format) but this crate has no actual
    /// container-runtime/indexer collaborator to probe or restart (§1 "treat
    /// as external collaborators") — they are not added to the pollable
    /// roster, and therefore not offered as something a user can consent to
    /// enable, until a caller wires a real probe via `register_probe` before
    /// `run()`. A roster entry backed by a no-op probe that always reports
    /// healthy would silently defeat the failure-threshold/restart/
    /// notification-throttle logic below for that service.
    pub fn new(settings: SettingsState, events_rx: broadcast::Receiver<SupervisorEvent>, supervisor_tx: mpsc::Sender<SupervisorMsg>, verbose: bool) -> Self {
        let mut services = HashMap::new();
        services.insert(
            ServiceKey::SwapProxy,
            ServiceState {
                record: ServiceRecord::new(ServiceKey::SwapProxy, true),
                metric: HealthMetric::default(),
                probe: swap_proxy_probe(supervisor_tx),
                grace_until: None,
                unhealthy_since: None,
                notification_attempts: 0,
            },
        );

        Self { services, settings, events_rx, setup_complete: false, verbose }
    }

    /// Add a real probe for an auxiliary service, putting it on the pollable
    /// roster for the first time. Must be called before `run()`; a service
    /// with no registered probe is never enabled, polled, or offered to the
    /// user as a consent option (see `new()`).
    pub fn register_probe(&mut self, key: ServiceKey, probe: ServiceProbe) {
        self.services.insert(
            key,
            ServiceState {
                record: ServiceRecord::new(key, false),
                metric: HealthMetric::default(),
                probe,
                grace_until: None,
                unhealthy_since: None,
                notification_attempts: 0,
            },
        );
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<WatchdogMsg>) {
        self.apply_consent_gate().await;
        for state in self.services.values_mut() {
            if state.record.enabled {
                state.record.status = ServiceStatus::Starting;
            }
        }

        let startup_deadline = tokio::time::sleep(STARTUP_DELAY);
        tokio::pin!(startup_deadline);

        loop {
            if !self.setup_complete {
                tokio::select! {
                    _ = &mut startup_deadline => { self.setup_complete = true; }
                    Some(msg) = rx.recv() => {
                        if matches!(msg, WatchdogMsg::SignalSetupComplete) {
                            self.setup_complete = true;
                        } else {
                            self.handle_msg(msg).await;
                        }
                    }
                    event = self.events_rx.recv() => { self.handle_event(event); }
                }
                continue;
            }
            break;
        }

        let mut cycle = tokio::time::interval(CYCLE_INTERVAL);
        loop {
            tokio::select! {
                _ = cycle.tick() => self.run_cycle().await,
                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    }
                }
                event = self.events_rx.recv() => self.handle_event(event),
            }
        }
    }

    async fn handle_msg(&mut self, msg: WatchdogMsg) {
        match msg {
            WatchdogMsg::SignalSetupComplete => self.setup_complete = true,
            WatchdogMsg::GetSnapshot { reply } => {
                let snapshot = self.services.values().map(|s| s.record.clone()).collect();
                let _ = reply.send(snapshot);
            }
            WatchdogMsg::GetMetrics { reply } => {
                let metrics = self.services.iter().map(|(k, s)| (*k, s.metric.clone())).collect();
                let _ = reply.send(metrics);
            }
        }
    }

    fn handle_event(&mut self, event: Result<SupervisorEvent, broadcast::error::RecvError>) {
        let Ok(event) = event else { return };
        match event {
            SupervisorEvent::Ready { .. } => {
                if let Some(state) = self.services.get_mut(&ServiceKey::SwapProxy) {
                    mark_healthy(state, self.verbose);
                }
            }
            SupervisorEvent::HealthFailed(_) | SupervisorEvent::Stopped => {
                if let Some(state) = self.services.get_mut(&ServiceKey::SwapProxy) {
                    if state.record.status == ServiceStatus::Healthy {
                        println!("[Watchdog] {} transitioned healthy -> degraded", state.record.human_name);
                    }
                    state.record.status = ServiceStatus::Degraded;
                }
            }
            SupervisorEvent::HealthOk | SupervisorEvent::PhaseChanged(_) => {}
        }
    }

    async fn apply_consent_gate(&mut self) {
        let bundle = self.settings.bundle.read().await;
        for (key, state) in self.services.iter_mut() {
            state.record.enabled = bundle.service_enabled(*key);
            if !state.record.enabled {
                state.record.status = ServiceStatus::Disabled;
            }
        }
    }

    async fn run_cycle(&mut self) {
        let now = Instant::now();
        let mut any_transition = false;

        // Sequential, not concurrent: restart decisions must see a
        // consistent view of preceding results within the same cycle (§5).
        let keys: Vec<ServiceKey> = self.services.keys().copied().collect();
        for key in keys {
            let skip_grace = self.services.get(&key).and_then(|s| s.grace_until).is_some_and(|until| now < until);
            let enabled = self.services.get(&key).is_some_and(|s| s.record.enabled);
            if !enabled || skip_grace {
                continue;
            }

            let healthy = {
                let probe = &self.services.get(&key).unwrap().probe;
                (probe.health_check)().await
            };

            if self.apply_health_result(key, healthy, now).await {
                any_transition = true;
            }
        }

        if any_transition && self.verbose {
            println!("[Watchdog] cycle completed with at least one state transition");
        }
    }

    /// Apply one service's health result, returning whether a state
    /// transition occurred. Transition-only logging is enforced here: a
    /// steady-state healthy→healthy result logs nothing.
    async fn apply_health_result(&mut self, key: ServiceKey, healthy: bool, now: Instant) -> bool {
        let was_healthy = self.services.get(&key).map(|s| s.record.status == ServiceStatus::Healthy).unwrap_or(false);

        if healthy {
            let state = self.services.get_mut(&key).unwrap();
            let transitioned = !was_healthy;
            mark_healthy(state, false);
            if let Some(since) = state.unhealthy_since.take() {
                state.metric.total_downtime_ms += now.duration_since(since).as_millis() as u64;
            }
            return transitioned;
        }

        let needs_restart = {
            let state = self.services.get_mut(&key).unwrap();
            if was_healthy {
                println!("[Watchdog] {} transitioned healthy -> degraded", state.record.human_name);
                state.metric.state_change_count += 1;
            }
            state.record.status = ServiceStatus::Degraded;
            state.record.failure_count += 1;
            state.unhealthy_since.get_or_insert(now);
            state.record.failure_count >= MAX_CONSECUTIVE_FAILURES
        };

        if needs_restart {
            self.restart_service(key).await;
        }

        was_healthy
    }

    async fn restart_service(&mut self, key: ServiceKey) {
        {
            let state = self.services.get_mut(&key).unwrap();
            state.record.status = ServiceStatus::Failed;
            state.record.is_retrying = true;
            println!("[Watchdog] {} failed {} consecutive checks, restarting", state.record.human_name, state.record.failure_count);
        }

        let restart_fn_result = {
            let state = self.services.get(&key).unwrap();
            (state.probe.restart)().await
        };

        if let Err(e) = restart_fn_result {
            println!("[Watchdog] restart command for {:?} failed to even issue: {}", key, e);
        }

        tokio::time::sleep(RESTART_RETRY_DELAY).await;

        let recovered = {
            let probe = &self.services.get(&key).unwrap().probe;
            (probe.health_check)().await
        };

        let state = self.services.get_mut(&key).unwrap();
        state.record.is_retrying = false;
        state.metric.restart_count += 1;

        if recovered {
            println!("[Watchdog] SERVICE_RESTART_SUCCESS for {}", state.record.human_name);
            state.notification_attempts = 0;
            mark_healthy(state, false);
        } else {
            state.record.failure_count = 0;
            if state.notification_attempts < MAX_NOTIFICATION_ATTEMPTS {
                state.notification_attempts += 1;
                println!("[Watchdog] SERVICE_RESTART_FAILED for {} (notification {}/{})", state.record.human_name, state.notification_attempts, MAX_NOTIFICATION_ATTEMPTS);
            } else {
                println!("[Watchdog] SERVICE_RESTART_FAILED for {} (notifications suppressed, rate limit reached)", state.record.human_name);
            }
        }
    }
}

fn mark_healthy(state: &mut ServiceState, verbose: bool) {
    let was_already_healthy = state.record.status == ServiceStatus::Healthy;
    state.record.status = ServiceStatus::Healthy;
    state.record.failure_count = 0;
    state.record.last_healthy_at = Some(chrono::Utc::now());
    state.grace_until = Some(Instant::now() + GRACE_PERIOD);

    if !was_already_healthy {
        state.metric.state_change_count += 1;
        println!("[Watchdog] {} entered grace period after confirmed-healthy", state.record.human_name);
    } else if verbose {
        println!("[Watchdog] {} still healthy", state.record.human_name);
    }
}

fn swap_proxy_probe(supervisor_tx: mpsc::Sender<SupervisorMsg>) -> ServiceProbe {
    let health_tx = supervisor_tx.clone();
    let restart_tx = supervisor_tx;

    ServiceProbe {
        health_check: Box::new(move || {
            let tx = health_tx.clone();
            Box::pin(async move {
                let (reply, rx) = oneshot::channel();
                if tx.send(SupervisorMsg::GetStatus { with_health_check: true, reply }).await.is_err() {
                    return false;
                }
                rx.await.map(|status| status.is_running).unwrap_or(false)
            })
        }),
        restart: Box::new(move || {
            let tx = restart_tx.clone();
            Box::pin(async move {
                let (reply, rx) = oneshot::channel();
                if tx.send(SupervisorMsg::Restart { skip_config_regeneration: false, reply }).await.is_err() {
                    return Err("supervisor channel closed".to_string());
                }
                rx.await.map_err(|_| "supervisor dropped restart reply".to_string())?.map(|_| ())
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_is_thirty_minutes() {
        assert_eq!(GRACE_PERIOD, Duration::from_secs(1800));
    }

    #[test]
    fn max_consecutive_failures_matches_default_retry_attempts() {
        assert_eq!(MAX_CONSECUTIVE_FAILURES, 3);
    }

    #[tokio::test]
    async fn auxiliary_services_are_not_on_the_roster_by_default() {
        let (settings_state, _events_tx, events_rx, supervisor_tx) = test_actor_deps().await;
        let watchdog = WatchdogActor::new(settings_state, events_rx, supervisor_tx, false);
        assert_eq!(watchdog.services.len(), 1);
        assert!(watchdog.services.contains_key(&ServiceKey::SwapProxy));
        assert!(!watchdog.services.contains_key(&ServiceKey::ContainerRuntime));
        assert!(!watchdog.services.contains_key(&ServiceKey::AuxIndexer));
    }

    #[tokio::test]
    async fn register_probe_adds_a_new_roster_entry() {
        let (settings_state, _events_tx, events_rx, supervisor_tx) = test_actor_deps().await;
        let mut watchdog = WatchdogActor::new(settings_state, events_rx, supervisor_tx, false);
        watchdog.register_probe(
            ServiceKey::AuxIndexer,
            ServiceProbe {
                health_check: Box::new(|| Box::pin(async { true })),
                restart: Box::new(|| Box::pin(async { Ok(()) })),
            },
        );
        assert!(watchdog.services.contains_key(&ServiceKey::AuxIndexer));
    }

    async fn test_actor_deps() -> (
        SettingsState,
        broadcast::Sender<SupervisorEvent>,
        broadcast::Receiver<SupervisorEvent>,
        mpsc::Sender<SupervisorMsg>,
    ) {
        let settings_state = SettingsState::new(crate::settings::SettingsBundle::default());
        let (events_tx, events_rx) = broadcast::channel(8);
        let (supervisor_tx, _supervisor_rx) = mpsc::channel(8);
        (settings_state, events_tx, events_rx, supervisor_tx)
    }
}
