//! End-to-end orchestrator tests: isolation, retry, circuit breaking,
//! degradation, healthiness, and run-loop behavior.

use super::names;
use crate::config::OrchestratorConfig;
use crate::core::{JobStatus, StageOutcome, UpstreamState};
use crate::cycle::{CycleOrchestrator, OrchestratorPhase};
use crate::errors::{BookkeepingError, OrchestratorError};
use crate::health::{HealthState, HealthStore, MemoryHealthStore};
use crate::observe::CollectingCycleSink;
use crate::runner::RetryPolicy;
use crate::sched::{EveryCycle, MaintenanceWindow, ManualSchedule};
use crate::shutdown::ShutdownToken;
use crate::stages::{FnStage, Stage, StageContext, StaticStage};
use crate::testing::ScriptedStage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_retry(RetryPolicy::new().with_delay_ms(1))
        .with_stage_timeout_ms(5_000)
}

fn ok(name: &str) -> Arc<dyn Stage> {
    Arc::new(StaticStage::new(name, StageOutcome::success(1)))
}

fn failing(name: &str) -> Arc<dyn Stage> {
    Arc::new(StaticStage::new(name, StageOutcome::error("boom")))
}

/// A client-health stage that honors the degradation contract for its
/// time-truth dependency.
fn contract_client_health() -> Arc<dyn Stage> {
    Arc::new(FnStage::new(names::CLIENT_HEALTH, |ctx: StageContext| async move {
        match ctx.upstream_state(names::TIME) {
            UpstreamState::Fresh => StageOutcome::success(1),
            UpstreamState::Stale => StageOutcome::partial(1, "used stale time truth"),
            UpstreamState::Absent => StageOutcome::skip("no time truth data exists"),
        }
    }))
}

struct Rig {
    orchestrator: CycleOrchestrator,
    sink: Arc<CollectingCycleSink>,
}

async fn rig_with(
    collect: Arc<dyn Stage>,
    time: Arc<dyn Stage>,
    client_health: Arc<dyn Stage>,
) -> Rig {
    let sink = Arc::new(CollectingCycleSink::new());
    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(collect)
        .truth_stages(time, ok("commitment"), ok("capacity"), client_health)
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(EveryCycle))
        .sink(sink.clone())
        .build()
        .await
        .unwrap();
    Rig { orchestrator, sink }
}

async fn all_ok_rig() -> Rig {
    rig_with(ok("collect"), ok("time"), ok("client-health")).await
}

#[tokio::test]
async fn test_healthy_cycle_end_to_end() {
    let rig = all_ok_rig().await;
    let cycle = rig.orchestrator.run_cycle().await.unwrap();

    assert!(cycle.healthy());
    assert!(!cycle.degraded);
    assert!(cycle.is_finalized());
    assert_eq!(cycle.jobs.len(), 5);
    assert_eq!(cycle.truth_jobs.len(), 4);
    assert_eq!(rig.orchestrator.phase(), OrchestratorPhase::Healthy);
    assert_eq!(rig.sink.len(), 1);

    let health = rig.orchestrator.health();
    assert_eq!(health.last_successful_cycle, cycle.finished_at);
    assert!(!health.degraded);
}

#[tokio::test]
async fn test_stage_execution_order() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let recording = |name: &'static str, log: &Arc<Mutex<Vec<String>>>| -> Arc<dyn Stage> {
        let log = log.clone();
        Arc::new(FnStage::new(name, move |_ctx| {
            let log = log.clone();
            async move {
                log.lock().push(name.to_string());
                StageOutcome::success(1)
            }
        }))
    };

    let sink = Arc::new(CollectingCycleSink::new());
    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(recording("collect", &log))
        .truth_stages(
            recording("time", &log),
            recording("commitment", &log),
            recording("capacity", &log),
            recording("client-health", &log),
        )
        .snapshot(recording("snapshot", &log))
        .notify(recording("notify", &log))
        .maintenance(recording("maintenance", &log), Arc::new(EveryCycle))
        .sink(sink)
        .build()
        .await
        .unwrap();

    orchestrator.run_cycle().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "collect",
            "time",
            "commitment",
            "capacity",
            "client-health",
            "snapshot",
            "notify",
            "maintenance"
        ]
    );
}

#[tokio::test]
async fn test_isolation_collect_failure_leaves_truth_unaffected() {
    let time = Arc::new(ScriptedStage::new("time").otherwise(StageOutcome::success(1)));
    let rig = rig_with(failing("collect"), time.clone(), ok("client-health")).await;

    let cycle = rig.orchestrator.run_cycle().await.unwrap();

    assert_eq!(cycle.job(names::COLLECT).unwrap().status, JobStatus::Failed);
    // Every truth sub-stage still ran and succeeded on its own inputs
    assert_eq!(time.calls(), 1);
    assert_eq!(cycle.truth_jobs.len(), 4);
    assert!(cycle
        .truth_jobs
        .iter()
        .all(|j| j.status == JobStatus::Success));
    // Downstream of truth also ran
    assert_eq!(cycle.job(names::SNAPSHOT).unwrap().status, JobStatus::Success);

    assert!(!cycle.healthy());
    assert!(cycle.degraded);
    assert_eq!(rig.orchestrator.phase(), OrchestratorPhase::Degraded);
}

#[tokio::test]
async fn test_retry_once_within_cycle() {
    let collect = Arc::new(
        ScriptedStage::new("collect")
            .then(StageOutcome::error("transient"))
            .otherwise(StageOutcome::success(5)),
    );
    let rig = rig_with(collect.clone(), ok("time"), ok("client-health")).await;

    let cycle = rig.orchestrator.run_cycle().await.unwrap();

    // Invoked exactly twice: initial attempt + one retry
    assert_eq!(collect.calls(), 2);
    let job = cycle.job(names::COLLECT).unwrap();
    assert_eq!(job.status, JobStatus::Success);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.items_processed, 5);
    assert!(cycle.healthy());
}

#[tokio::test]
async fn test_circuit_opens_after_three_failed_cycles() {
    let rig = rig_with(failing("collect"), ok("time"), ok("client-health")).await;

    for _ in 0..3 {
        let cycle = rig.orchestrator.run_cycle().await.unwrap();
        assert_eq!(cycle.job(names::COLLECT).unwrap().status, JobStatus::Failed);
    }

    // At the start of cycle 4 the circuit is recorded open
    let health = rig.orchestrator.health();
    assert!(health.is_circuit_broken(names::COLLECT));
    assert_eq!(health.consecutive_failures[names::COLLECT], 3);

    // Cycle 4 records the stage as skipped (failed probe), not failed
    let cycle = rig.orchestrator.run_cycle().await.unwrap();
    let job = cycle.job(names::COLLECT).unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert!(job.probe);
    assert!(job.note.as_deref().unwrap().contains("circuit open"));
    // A skipped stage does not by itself make the cycle unhealthy
    assert!(cycle.healthy());
    assert!(cycle.degraded);
}

#[tokio::test]
async fn test_circuit_closes_after_five_successful_probes() {
    let healthy = Arc::new(AtomicBool::new(false));
    let healthy_clone = healthy.clone();
    let collect: Arc<dyn Stage> = Arc::new(FnStage::new("collect", move |_ctx| {
        let healthy = healthy_clone.clone();
        async move {
            if healthy.load(Ordering::SeqCst) {
                StageOutcome::success(2)
            } else {
                StageOutcome::error("upstream down")
            }
        }
    }));

    let rig = rig_with(collect, ok("time"), ok("client-health")).await;

    for _ in 0..3 {
        rig.orchestrator.run_cycle().await.unwrap();
    }
    assert!(rig.orchestrator.health().is_circuit_broken(names::COLLECT));

    // The stage recovers; five consecutive successful probes close the circuit
    healthy.store(true, Ordering::SeqCst);
    for i in 1..=5 {
        let cycle = rig.orchestrator.run_cycle().await.unwrap();
        let job = cycle.job(names::COLLECT).unwrap();
        assert!(job.probe, "cycle {i} should still be a probe");
        assert_eq!(job.status, JobStatus::Success);
    }

    let health = rig.orchestrator.health();
    assert!(!health.is_circuit_broken(names::COLLECT));
    assert_eq!(health.consecutive_failures[names::COLLECT], 0);

    // The next cycle runs normally again
    let cycle = rig.orchestrator.run_cycle().await.unwrap();
    let job = cycle.job(names::COLLECT).unwrap();
    assert!(!job.probe);
    assert_eq!(job.status, JobStatus::Success);
}

#[tokio::test]
async fn test_degradation_time_failure_makes_client_health_partial() {
    let time_healthy = Arc::new(AtomicBool::new(true));
    let time_flag = time_healthy.clone();
    let time: Arc<dyn Stage> = Arc::new(FnStage::new("time", move |_ctx| {
        let healthy = time_flag.clone();
        async move {
            if healthy.load(Ordering::SeqCst) {
                StageOutcome::success(1)
            } else {
                StageOutcome::error("time source unreachable")
            }
        }
    }));

    let rig = rig_with(ok("collect"), time, contract_client_health()).await;

    // Cycle 1: time succeeds, client-health is fresh
    let cycle = rig.orchestrator.run_cycle().await.unwrap();
    assert_eq!(
        cycle.truth_job(names::CLIENT_HEALTH).unwrap().status,
        JobStatus::Success
    );

    // Cycle 2: time fails; client-health still runs, on last-known-good data
    time_healthy.store(false, Ordering::SeqCst);
    let cycle = rig.orchestrator.run_cycle().await.unwrap();

    assert_eq!(cycle.truth_job(names::TIME).unwrap().status, JobStatus::Failed);
    let client = cycle.truth_job(names::CLIENT_HEALTH).unwrap();
    assert_eq!(client.status, JobStatus::Partial);
    assert!(client.note.as_deref().unwrap().contains("stale"));

    // The composite truth stage reports partial, so the cycle stays healthy
    assert_eq!(cycle.job(names::TRUTH).unwrap().status, JobStatus::Partial);
    assert!(cycle.healthy());
    assert!(cycle.degraded);
}

#[tokio::test]
async fn test_degradation_absent_upstream_skips_never_fabricates() {
    // Time fails from the very first cycle: no prior output exists
    let rig = rig_with(ok("collect"), failing("time"), contract_client_health()).await;

    let cycle = rig.orchestrator.run_cycle().await.unwrap();

    let client = cycle.truth_job(names::CLIENT_HEALTH).unwrap();
    assert_eq!(client.status, JobStatus::Skipped);
    assert!(client.note.as_deref().unwrap().contains("no time truth data"));
}

#[tokio::test]
async fn test_maintenance_skip_is_benign() {
    struct NeverDue;
    impl MaintenanceWindow for NeverDue {
        fn is_due(&self, _now: DateTime<Utc>) -> bool {
            false
        }
    }

    let sink = Arc::new(CollectingCycleSink::new());
    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(ok("collect"))
        .truth_stages(ok("time"), ok("commitment"), ok("capacity"), ok("client-health"))
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(NeverDue))
        .sink(sink)
        .build()
        .await
        .unwrap();

    let cycle = orchestrator.run_cycle().await.unwrap();

    let job = cycle.job(names::MAINTENANCE).unwrap();
    assert_eq!(job.status, JobStatus::Skipped);
    assert!(job.note.as_deref().unwrap().contains("maintenance window"));
    // A scheduled skip neither degrades nor unhealthies the cycle
    assert!(cycle.healthy());
    assert!(!cycle.degraded);
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Healthy);
}

#[tokio::test]
async fn test_idempotent_reporting() {
    let rig = all_ok_rig().await;

    let first = rig.orchestrator.run_cycle().await.unwrap();
    let second = rig.orchestrator.run_cycle().await.unwrap();

    assert_ne!(first.cycle_id, second.cycle_id);
    for (a, b) in first.jobs.iter().zip(second.jobs.iter()) {
        assert_eq!(a.job_name, b.job_name);
        assert_eq!(a.status, b.status);
        assert_eq!(a.items_processed, b.items_processed);
    }
}

#[tokio::test]
async fn test_no_concurrent_cycles() {
    let active = Arc::new(AtomicU32::new(0));
    let max_seen = Arc::new(AtomicU32::new(0));
    let active_clone = active.clone();
    let max_clone = max_seen.clone();

    let collect: Arc<dyn Stage> = Arc::new(FnStage::new("collect", move |_ctx| {
        let active = active_clone.clone();
        let max_seen = max_clone.clone();
        async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            StageOutcome::success(1)
        }
    }));

    let rig = rig_with(collect, ok("time"), ok("client-health")).await;
    let orchestrator = Arc::new(rig.orchestrator);

    let a = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle().await.unwrap() }
    });
    let b = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_cycle().await.unwrap() }
    });

    let (first, second) = (a.await.unwrap(), b.await.unwrap());

    // Both cycles ran, strictly one at a time
    assert_ne!(first.cycle_id, second.cycle_id);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(rig.sink.len(), 2);
}

#[tokio::test]
async fn test_run_loop_fires_on_schedule_and_stops_on_shutdown() {
    let schedule = Arc::new(ManualSchedule::new());
    let shutdown = ShutdownToken::new();
    let sink = Arc::new(CollectingCycleSink::new());

    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(ok("collect"))
        .truth_stages(ok("time"), ok("commitment"), ok("capacity"), ok("client-health"))
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(EveryCycle))
        .sink(sink.clone())
        .schedule(schedule.clone())
        .shutdown(shutdown.clone())
        .build()
        .await
        .unwrap();

    let orchestrator = Arc::new(orchestrator);
    let handle = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.run_until_shutdown().await }
    });

    schedule.fire();
    // Wait for the cycle to land in the sink
    for _ in 0..100 {
        if sink.len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(sink.len(), 1);

    shutdown.request("test finished");
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(orchestrator.phase(), OrchestratorPhase::Idle);
    // No further cycles after shutdown
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_bookkeeping_failure_is_fatal() {
    /// Store that fails every save.
    #[derive(Debug)]
    struct BrokenStore;

    #[async_trait]
    impl HealthStore for BrokenStore {
        async fn save(&self, _state: &HealthState) -> Result<(), BookkeepingError> {
            Err(BookkeepingError::HealthPersist("disk gone".to_string()))
        }
        async fn load(&self) -> Result<Option<HealthState>, BookkeepingError> {
            Ok(None)
        }
    }

    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(ok("collect"))
        .truth_stages(ok("time"), ok("commitment"), ok("capacity"), ok("client-health"))
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(EveryCycle))
        .health_store(Arc::new(BrokenStore))
        .build()
        .await
        .unwrap();

    let result = orchestrator.run_cycle().await;
    assert!(matches!(result, Err(OrchestratorError::Bookkeeping(_))));
}

#[tokio::test]
async fn test_health_state_survives_via_store() {
    // Two orchestrator lifetimes over one shared store
    let store = Arc::new(MemoryHealthStore::new());

    let rig_store = store.clone();
    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(failing("collect"))
        .truth_stages(ok("time"), ok("commitment"), ok("capacity"), ok("client-health"))
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(EveryCycle))
        .health_store(rig_store)
        .build()
        .await
        .unwrap();
    orchestrator.run_cycle().await.unwrap();
    drop(orchestrator);

    // A fresh orchestrator restores the failure history
    let orchestrator = CycleOrchestrator::builder()
        .config(fast_config())
        .collect(ok("collect"))
        .truth_stages(ok("time"), ok("commitment"), ok("capacity"), ok("client-health"))
        .snapshot(ok("snapshot"))
        .notify(ok("notify"))
        .maintenance(ok("maintenance"), Arc::new(EveryCycle))
        .health_store(store)
        .build()
        .await
        .unwrap();

    let health = orchestrator.health();
    assert_eq!(health.consecutive_failures[names::COLLECT], 1);
}
