//! The five-probe health checker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::json;
use tracing::warn;

use crate::resilience::{BreakerRegistry, BreakerState};
use crate::telemetry::Telemetry;

use super::types::{CheckType, DependencyCheck, HealthCheckResult, HealthStatus};

const CPU_THRESHOLD_PCT: f64 = 80.0;
const MEMORY_THRESHOLD_PCT: f64 = 85.0;
const DISK_THRESHOLD_PCT: f64 = 90.0;

/// Point-in-time process/system resource readings, in percent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemStats {
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub disk_pct: f64,
}

/// Source of system resource readings; swapped out in tests.
pub trait SystemStatsProvider: Send + Sync {
    fn read(&self) -> SystemStats;
}

/// `sysinfo`-backed readings for the performance probe.
#[derive(Debug, Default)]
pub struct SysinfoStats;

impl SystemStatsProvider for SysinfoStats {
    fn read(&self) -> SystemStats {
        let mut system = sysinfo::System::new();
        // cpu_usage() is the delta between two refreshes; a single sample
        // always reads 0.0, so take a second one after the minimum interval.
        system.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_pct = f64::from(system.global_cpu_info().cpu_usage());
        let memory_pct = if system.total_memory() == 0 {
            0.0
        } else {
            system.used_memory() as f64 / system.total_memory() as f64 * 100.0
        };

        let disks = sysinfo::Disks::new_with_refreshed_list();
        let (total, available) = disks
            .iter()
            .fold((0u64, 0u64), |(t, a), disk| {
                (t + disk.total_space(), a + disk.available_space())
            });
        let disk_pct = if total == 0 {
            0.0
        } else {
            (total - available) as f64 / total as f64 * 100.0
        };

        SystemStats {
            cpu_pct,
            memory_pct,
            disk_pct,
        }
    }
}

/// Comprehensive health checker aggregating state from every component.
pub struct HealthChecker {
    service_name: String,
    dependency_checks: RwLock<Vec<DependencyCheck>>,
    startup_checks: RwLock<Vec<DependencyCheck>>,
    startup_complete: AtomicBool,
    breakers: RwLock<Option<Arc<BreakerRegistry>>>,
    critical_breakers: RwLock<Vec<String>>,
    stats_provider: Arc<dyn SystemStatsProvider>,
    telemetry: Arc<Telemetry>,
}

impl HealthChecker {
    #[must_use]
    pub fn new(service_name: impl Into<String>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            service_name: service_name.into(),
            dependency_checks: RwLock::new(Vec::new()),
            startup_checks: RwLock::new(Vec::new()),
            startup_complete: AtomicBool::new(false),
            breakers: RwLock::new(None),
            critical_breakers: RwLock::new(Vec::new()),
            stats_provider: Arc::new(SysinfoStats),
            telemetry,
        }
    }

    /// Replace the system stats source (tests).
    #[must_use]
    pub fn with_stats_provider(mut self, provider: Arc<dyn SystemStatsProvider>) -> Self {
        self.stats_provider = provider;
        self
    }

    /// Register a dependency check used by readiness and dependency probes.
    pub fn register_dependency_check(&self, check: DependencyCheck) {
        self.dependency_checks.write().push(check);
    }

    /// Register a one-shot bootstrap verification used by the startup probe.
    pub fn register_startup_check(&self, check: DependencyCheck) {
        self.startup_checks.write().push(check);
    }

    /// Feed breaker state into readiness: open critical breakers make the
    /// service unhealthy, open non-critical ones degrade it.
    pub fn set_breaker_registry(
        &self,
        registry: Arc<BreakerRegistry>,
        critical_services: Vec<String>,
    ) {
        *self.breakers.write() = Some(registry);
        *self.critical_breakers.write() = critical_services;
    }

    fn finish(&self, result: HealthCheckResult) -> HealthCheckResult {
        let healthy = result.status != HealthStatus::Unhealthy;
        self.telemetry
            .counter(
                "health_checks_total",
                &[
                    ("check_type", result.check_type.as_str()),
                    ("healthy", if healthy { "true" } else { "false" }),
                ],
            )
            .increment();
        self.telemetry
            .histogram(
                "health_check_duration_seconds",
                &[("check_type", result.check_type.as_str())],
            )
            .observe(result.duration_ms / 1_000.0);
        result
    }

    /// Liveness probe: trivial responsiveness; must complete in under one
    /// second and fails only on deadlock/timeout.
    pub async fn liveness_probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let responsive =
            tokio::time::timeout(Duration::from_secs(1), tokio::time::sleep(Duration::from_millis(1)))
                .await
                .is_ok();
        let duration_ms = start.elapsed().as_secs_f64() * 1_000.0;

        let result = if responsive {
            HealthCheckResult {
                status: HealthStatus::Healthy,
                check_type: CheckType::Liveness,
                message: format!("{} is alive", self.service_name),
                details: json!({"service": self.service_name}),
                timestamp: Utc::now(),
                duration_ms,
            }
        } else {
            HealthCheckResult {
                status: HealthStatus::Unhealthy,
                check_type: CheckType::Liveness,
                message: format!("{} appears to be deadlocked", self.service_name),
                details: json!({"service": self.service_name, "error": "timeout"}),
                timestamp: Utc::now(),
                duration_ms,
            }
        };
        self.finish(result)
    }

    async fn run_checks(checks: Vec<DependencyCheck>) -> Vec<(DependencyCheck, bool)> {
        let futures = checks.into_iter().map(|check| async move {
            let passed = tokio::time::timeout(check.timeout, (check.check)())
                .await
                .unwrap_or(false);
            (check, passed)
        });
        futures::future::join_all(futures).await
    }

    fn composite_score(results: &[(DependencyCheck, bool)]) -> f64 {
        let total_weight: f64 = results.iter().map(|(c, _)| c.weight).sum();
        if total_weight == 0.0 {
            return 1.0;
        }
        let healthy_weight: f64 = results
            .iter()
            .filter(|(_, passed)| *passed)
            .map(|(c, _)| c.weight)
            .sum();
        healthy_weight / total_weight
    }

    fn breaker_pressure(&self) -> (bool, bool, serde_json::Value) {
        let registry = self.breakers.read().clone();
        let Some(registry) = registry else {
            return (false, false, json!({}));
        };
        let critical = self.critical_breakers.read().clone();
        let states = registry.all_states();
        let mut critical_open = false;
        let mut non_critical_open = false;
        for (name, snapshot) in &states {
            if snapshot.state == BreakerState::Open {
                if critical.iter().any(|c| c == name) {
                    critical_open = true;
                } else {
                    non_critical_open = true;
                }
            }
        }
        (
            critical_open,
            non_critical_open,
            serde_json::to_value(&states).unwrap_or_else(|_| json!({})),
        )
    }

    /// Readiness probe: all dependency checks concurrently, critical vs
    /// non-critical split, weighted composite score, breaker feedback.
    pub async fn readiness_probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let checks = self.dependency_checks.read().clone();
        let results = Self::run_checks(checks).await;

        let critical_failures: Vec<&str> = results
            .iter()
            .filter(|(c, passed)| c.critical && !passed)
            .map(|(c, _)| c.name.as_str())
            .collect();
        let non_critical_failures: Vec<&str> = results
            .iter()
            .filter(|(c, passed)| !c.critical && !passed)
            .map(|(c, _)| c.name.as_str())
            .collect();

        let (critical_breaker_open, non_critical_breaker_open, breaker_states) =
            self.breaker_pressure();

        let status = if !critical_failures.is_empty() || critical_breaker_open {
            HealthStatus::Unhealthy
        } else if !non_critical_failures.is_empty() || non_critical_breaker_open {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        let message = match status {
            HealthStatus::Unhealthy => format!(
                "{} is not ready: {} critical dependencies unhealthy",
                self.service_name,
                critical_failures.len().max(usize::from(critical_breaker_open))
            ),
            HealthStatus::Degraded => format!(
                "{} is degraded: {} non-critical dependencies unhealthy",
                self.service_name,
                non_critical_failures
                    .len()
                    .max(usize::from(non_critical_breaker_open))
            ),
            _ => format!("{} is ready", self.service_name),
        };

        let dependencies: Vec<serde_json::Value> = results
            .iter()
            .map(|(c, passed)| {
                json!({
                    "name": c.name,
                    "critical": c.critical,
                    "healthy": passed,
                    "weight": c.weight,
                })
            })
            .collect();

        let result = HealthCheckResult {
            status,
            check_type: CheckType::Readiness,
            message,
            details: json!({
                "service": self.service_name,
                "dependencies": dependencies,
                "critical_failures": critical_failures.len(),
                "non_critical_failures": non_critical_failures.len(),
                "composite_health_score": Self::composite_score(&results),
                "circuit_breakers": breaker_states,
            }),
            timestamp: Utc::now(),
            duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        };
        self.finish(result)
    }

    /// Startup probe: one-shot bootstrap verification; latches on success and
    /// returns the cached status afterwards.
    pub async fn startup_probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        if self.startup_complete.load(Ordering::Acquire) {
            return self.finish(HealthCheckResult {
                status: HealthStatus::Healthy,
                check_type: CheckType::Startup,
                message: format!("{} startup complete", self.service_name),
                details: json!({"service": self.service_name, "cached": true}),
                timestamp: Utc::now(),
                duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
            });
        }

        let checks = self.startup_checks.read().clone();
        let results = Self::run_checks(checks).await;
        let failures: Vec<&str> = results
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(c, _)| c.name.as_str())
            .collect();

        let result = if failures.is_empty() {
            self.startup_complete.store(true, Ordering::Release);
            HealthCheckResult {
                status: HealthStatus::Healthy,
                check_type: CheckType::Startup,
                message: format!("{} startup complete", self.service_name),
                details: json!({"service": self.service_name, "cached": false}),
                timestamp: Utc::now(),
                duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
            }
        } else {
            warn!(failures = ?failures, "startup verification incomplete");
            HealthCheckResult {
                status: HealthStatus::Unhealthy,
                check_type: CheckType::Startup,
                message: format!("{} still starting: {:?}", self.service_name, failures),
                details: json!({"service": self.service_name, "failures": failures}),
                timestamp: Utc::now(),
                duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
            }
        };
        self.finish(result)
    }

    /// Dependency probe: like readiness but without the degraded distinction.
    pub async fn dependency_probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let checks = self.dependency_checks.read().clone();
        let results = Self::run_checks(checks).await;
        let failures: Vec<&str> = results
            .iter()
            .filter(|(_, passed)| !passed)
            .map(|(c, _)| c.name.as_str())
            .collect();

        let status = if failures.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        let result = HealthCheckResult {
            status,
            check_type: CheckType::Dependency,
            message: if failures.is_empty() {
                format!("{}: all dependencies healthy", self.service_name)
            } else {
                format!("{}: {} dependencies failing", self.service_name, failures.len())
            },
            details: json!({"service": self.service_name, "failures": failures}),
            timestamp: Utc::now(),
            duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        };
        self.finish(result)
    }

    /// Performance probe: degraded when CPU/RAM/disk cross 80/85/90 percent.
    ///
    /// The CPU sample blocks for the minimum update interval, so the read
    /// runs in the blocking pool rather than on the event loop.
    pub async fn performance_probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        let provider = Arc::clone(&self.stats_provider);
        let stats = tokio::task::spawn_blocking(move || provider.read())
            .await
            .unwrap_or_default();

        let mut pressures = Vec::new();
        if stats.cpu_pct > CPU_THRESHOLD_PCT {
            pressures.push(format!("cpu {:.1}%", stats.cpu_pct));
        }
        if stats.memory_pct > MEMORY_THRESHOLD_PCT {
            pressures.push(format!("memory {:.1}%", stats.memory_pct));
        }
        if stats.disk_pct > DISK_THRESHOLD_PCT {
            pressures.push(format!("disk {:.1}%", stats.disk_pct));
        }

        let status = if pressures.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        let result = HealthCheckResult {
            status,
            check_type: CheckType::Performance,
            message: if pressures.is_empty() {
                format!("{} resource usage nominal", self.service_name)
            } else {
                format!("{} under pressure: {}", self.service_name, pressures.join(", "))
            },
            details: json!({
                "service": self.service_name,
                "cpu_pct": stats.cpu_pct,
                "memory_pct": stats.memory_pct,
                "disk_pct": stats.disk_pct,
                "thresholds": {
                    "cpu_pct": CPU_THRESHOLD_PCT,
                    "memory_pct": MEMORY_THRESHOLD_PCT,
                    "disk_pct": DISK_THRESHOLD_PCT,
                },
            }),
            timestamp: Utc::now(),
            duration_ms: start.elapsed().as_secs_f64() * 1_000.0,
        };
        self.finish(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerConfig;
    use crate::error::Error;

    struct FixedStats(SystemStats);
    impl SystemStatsProvider for FixedStats {
        fn read(&self) -> SystemStats {
            self.0
        }
    }

    fn checker() -> HealthChecker {
        HealthChecker::new("hybrid-coordinator", Arc::new(Telemetry::new("test")))
    }

    #[tokio::test]
    async fn test_liveness_is_fast_and_healthy() {
        let result = checker().liveness_probe().await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert!(result.duration_ms < 1_000.0);
    }

    #[tokio::test]
    async fn test_readiness_critical_failure_is_unhealthy() {
        let checker = checker();
        checker.register_dependency_check(DependencyCheck::new("qdrant", true, || async { false }));
        checker
            .register_dependency_check(DependencyCheck::new("redis", false, || async { true }));

        let result = checker.readiness_probe().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.details["critical_failures"], 1);
    }

    #[tokio::test]
    async fn test_readiness_non_critical_failure_degrades() {
        let checker = checker();
        checker.register_dependency_check(DependencyCheck::new("qdrant", true, || async { true }));
        checker
            .register_dependency_check(DependencyCheck::new("redis", false, || async { false }));

        let result = checker.readiness_probe().await;
        assert_eq!(result.status, HealthStatus::Degraded);

        let score = result.details["composite_health_score"]
            .as_f64()
            .expect("score");
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_readiness_check_timeout_counts_as_failure() {
        let checker = checker();
        checker.register_dependency_check(
            DependencyCheck::new("slow", false, || async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                true
            })
            .with_timeout(Duration::from_millis(10)),
        );
        let result = checker.readiness_probe().await;
        assert_eq!(result.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_startup_latches_after_success() {
        let checker = checker();
        checker.register_startup_check(DependencyCheck::new("collections", true, || async {
            true
        }));

        let first = checker.startup_probe().await;
        assert_eq!(first.status, HealthStatus::Healthy);
        assert_eq!(first.details["cached"], false);

        let second = checker.startup_probe().await;
        assert_eq!(second.details["cached"], true);
    }

    #[tokio::test]
    async fn test_dependency_probe_has_no_degraded_state() {
        let checker = checker();
        checker
            .register_dependency_check(DependencyCheck::new("redis", false, || async { false }));
        let result = checker.dependency_probe().await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_performance_thresholds() {
        let healthy = checker().with_stats_provider(Arc::new(FixedStats(SystemStats {
            cpu_pct: 10.0,
            memory_pct: 20.0,
            disk_pct: 30.0,
        })));
        assert_eq!(
            healthy.performance_probe().await.status,
            HealthStatus::Healthy
        );

        let pressured = checker().with_stats_provider(Arc::new(FixedStats(SystemStats {
            cpu_pct: 95.0,
            memory_pct: 20.0,
            disk_pct: 30.0,
        })));
        assert_eq!(
            pressured.performance_probe().await.status,
            HealthStatus::Degraded
        );
    }

    #[test]
    fn test_sysinfo_provider_yields_plausible_readings() {
        // Exercises the real provider: the double CPU refresh must produce a
        // usable delta and every reading must stay in percentage range.
        let stats = SysinfoStats.read();
        assert!((0.0..=100.0).contains(&stats.cpu_pct), "cpu {}", stats.cpu_pct);
        assert!(
            (0.0..=100.0).contains(&stats.memory_pct),
            "memory {}",
            stats.memory_pct
        );
        assert!((0.0..=100.0).contains(&stats.disk_pct), "disk {}", stats.disk_pct);
        assert!(stats.memory_pct > 0.0);
    }

    #[tokio::test]
    async fn test_open_breaker_feeds_readiness() {
        let checker = checker();
        let registry = Arc::new(BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            ..BreakerConfig::default()
        }));
        checker.set_breaker_registry(Arc::clone(&registry), vec!["llama-cpp".to_string()]);

        // Trip a non-critical breaker: degraded.
        let qdrant = registry.get("qdrant");
        qdrant
            .call(|| async {
                Err::<(), _>(Error::Storage("down".to_string()))
            })
            .await
            .ok();
        assert_eq!(
            checker.readiness_probe().await.status,
            HealthStatus::Degraded
        );

        // Trip the critical breaker: unhealthy.
        let llm = registry.get("llama-cpp");
        llm.call(|| async {
            Err::<(), _>(Error::Timeout("model load".to_string()))
        })
        .await
        .ok();
        assert_eq!(
            checker.readiness_probe().await.status,
            HealthStatus::Unhealthy
        );
    }
}
