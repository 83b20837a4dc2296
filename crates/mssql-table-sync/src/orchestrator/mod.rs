//! Pipeline orchestrator - job gate, setup steps, batch dispatch.

pub mod pools;
pub mod scheduler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, ConnectionConfig};
use crate::core::traits::SessionFactory;
use crate::error::{SyncError, Result};
use crate::staging;
use crate::state::{Job, JobGate, LogEvent, MssqlControlStore, OutcomeStatus, RunLog, TableRunOutcome};
use crate::transfer::{RetryPolicy, TableWorker, WorkerContext};

use pools::{LazySessionFactory, MssqlPool};
use scheduler::BatchScheduler;

/// Disables foreign-key and check constraints on every destination table.
pub const SUSPEND_CONSTRAINTS_SQL: &str =
    "EXEC sp_MSforeachtable 'ALTER TABLE ? NOCHECK CONSTRAINT all'";

/// Pipeline orchestrator.
pub struct Orchestrator {
    config: Config,
    sessions: Arc<dyn SessionFactory>,
    gate: Arc<dyn JobGate>,
    run_log: Arc<dyn RunLog>,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub job_id: i64,

    /// Unique execution identifier shared by every outcome of this run.
    pub run_id: Uuid,

    /// "completed" or "completed_with_errors".
    pub status: String,

    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,

    pub tables_total: usize,
    pub tables_succeeded: usize,
    pub tables_failed: usize,
    pub tables_skipped: usize,

    /// Names of tables that ended `Failed`.
    pub failed_tables: Vec<String>,

    /// Tables whose outcome row could not be written to the run log.
    #[serde(default)]
    pub unrecorded_tables: Vec<String>,

    pub outcomes: Vec<TableRunOutcome>,
}

/// Latest execution of a job, as read back from the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub job_id: i64,
    pub job_name: String,
    pub run_id: Option<Uuid>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub outcomes: Vec<TableRunOutcome>,
}

/// Connectivity of one connection role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleHealth {
    pub role: String,
    pub endpoint: String,
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Result of a health check across every connection role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub roles: Vec<RoleHealth>,
    pub healthy: bool,
}

fn count(outcomes: &[TableRunOutcome], status: OutcomeStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

/// Open the control store on its own small pool and make sure its tables exist.
pub async fn open_control_store(config: &Config) -> Result<Arc<MssqlControlStore>> {
    let control = config.control_config();
    let schema = control.schema.clone();
    // Workers append outcomes concurrently
    let size = u32::try_from(config.sync.batch_size.saturating_add(1)).unwrap_or(u32::MAX);
    let pool = MssqlPool::new(control, size).await?;
    let store = MssqlControlStore::new(Arc::new(pool), schema)?;
    store.init_schema().await?;
    Ok(Arc::new(store))
}

/// Read back the most recent execution of `job_name`.
pub async fn latest_report(
    gate: &dyn JobGate,
    run_log: &dyn RunLog,
    job_name: &str,
) -> Result<RunReport> {
    let job = gate
        .lookup(job_name)
        .await?
        .ok_or_else(|| SyncError::Config(format!("Job '{}' is not registered", job_name)))?;

    let outcomes = run_log.latest_outcomes(job.job_id).await?;
    Ok(RunReport {
        job_id: job.job_id,
        job_name: job.job_name,
        run_id: outcomes.first().map(|o| o.run_id),
        succeeded: count(&outcomes, OutcomeStatus::Succeeded),
        failed: count(&outcomes, OutcomeStatus::Failed),
        skipped: count(&outcomes, OutcomeStatus::Skipped),
        outcomes,
    })
}

impl Orchestrator {
    /// Create an orchestrator on the control database.
    ///
    /// The source, destination and staging pools are opened by [`run`](Self::run)
    /// once the job gate has passed.
    pub async fn new(config: Config) -> Result<Self> {
        let store = open_control_store(&config).await?;
        let sessions = Arc::new(LazySessionFactory::new(config.clone()));

        Ok(Self::with_components(
            config,
            sessions,
            store.clone(),
            store,
        ))
    }

    /// Create an orchestrator over explicit session, gate and log providers.
    pub fn with_components(
        config: Config,
        sessions: Arc<dyn SessionFactory>,
        gate: Arc<dyn JobGate>,
        run_log: Arc<dyn RunLog>,
    ) -> Self {
        Self {
            config,
            sessions,
            gate,
            run_log,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline once.
    ///
    /// Returns `GateDisabled` without touching any table when the job is
    /// missing or disabled. Per-table failures never fail the run; they are
    /// reported in the returned outcomes.
    pub async fn run(&self) -> Result<SyncResult> {
        let job = self.check_gate().await?;
        self.sessions.connect().await?;
        let job_name = job.job_name.as_str();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        info!("Starting job {} (run {})", job_name, run_id);
        self.log_event(LogEvent::job(format!("Job {} started", job_name)))
            .await;

        self.prepare().await;

        let tables = self.enumerate_tables().await?;
        info!("Found {} tables to copy", tables.len());

        let ctx = WorkerContext {
            job_id: job.job_id,
            run_id,
            source_schema: self.config.source.schema.clone(),
            destination_schema: self.config.destination.schema.clone(),
            staging_prefix: self.config.sync.staging_prefix.clone(),
            retry: RetryPolicy::from_config(&self.config.sync),
        };
        let worker = Arc::new(TableWorker::new(
            ctx,
            self.sessions.clone(),
            self.run_log.clone(),
        ));
        let scheduler = BatchScheduler::new(self.config.sync.batch_size, self.config.sync.dispatch);
        let outcomes = scheduler.run(worker.clone(), &tables).await;

        let unrecorded_tables = worker.unrecorded_tables().await;
        for table in &unrecorded_tables {
            warn!("Outcome for table {} is missing from the run log", table);
            self.log_event(
                LogEvent::warning(format!("Outcome for table {} could not be recorded", table))
                    .with_table(table.as_str()),
            )
            .await;
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let succeeded = count(&outcomes, OutcomeStatus::Succeeded);
        let failed = count(&outcomes, OutcomeStatus::Failed);
        let skipped = count(&outcomes, OutcomeStatus::Skipped);
        let failed_tables: Vec<String> = outcomes
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .map(|o| o.table_name.clone())
            .collect();

        let summary = format!(
            "Job {} completed: {} succeeded, {} failed, {} skipped in {:.2}s",
            job_name, succeeded, failed, skipped, duration
        );
        info!("{}", summary);
        self.log_event(LogEvent::job(summary)).await;

        Ok(SyncResult {
            job_id: job.job_id,
            run_id,
            status: if failed == 0 {
                "completed".to_string()
            } else {
                "completed_with_errors".to_string()
            },
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: outcomes.len(),
            tables_succeeded: succeeded,
            tables_failed: failed,
            tables_skipped: skipped,
            failed_tables,
            unrecorded_tables,
            outcomes,
        })
    }

    /// Outcomes of the job's most recent execution.
    pub async fn report(&self) -> Result<RunReport> {
        latest_report(
            self.gate.as_ref(),
            self.run_log.as_ref(),
            &self.config.sync.job_name,
        )
        .await
    }

    /// Ping every connection role without requiring the others to be up.
    pub async fn health_check(config: &Config) -> HealthCheckResult {
        let roles = [
            ("source", config.source.clone()),
            ("destination", config.destination.clone()),
            ("staging", config.staging_config()),
            ("control", config.control_config()),
        ];

        let mut results = Vec::with_capacity(roles.len());
        for (role, connection) in roles {
            results.push(Self::check_role(role, connection).await);
        }

        let healthy = results.iter().all(|r| r.connected);
        HealthCheckResult {
            roles: results,
            healthy,
        }
    }

    async fn check_role(role: &str, connection: ConnectionConfig) -> RoleHealth {
        let endpoint = connection.endpoint();
        let result = match MssqlPool::new(connection, 1).await {
            Ok(pool) => pool.ping().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(latency) => RoleHealth {
                role: role.to_string(),
                endpoint,
                connected: true,
                latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                error: None,
            },
            Err(e) => RoleHealth {
                role: role.to_string(),
                endpoint,
                connected: false,
                latency_ms: 0,
                error: Some(e.to_string()),
            },
        }
    }

    async fn check_gate(&self) -> Result<Job> {
        let job_name = &self.config.sync.job_name;
        match self.gate.lookup(job_name).await? {
            Some(job) if job.is_enabled => Ok(job),
            _ => {
                info!("The job is disabled or not found in the jobs list");
                Err(SyncError::GateDisabled(job_name.clone()))
            }
        }
    }

    /// Best-effort setup: purge orphaned staging objects, suspend constraints.
    async fn prepare(&self) {
        if let Err(e) = self.purge_staging().await {
            self.setup_warning("Staging pre-cleanup failed", e).await;
        }

        if self.config.sync.suspend_constraints {
            if let Err(e) = self.suspend_constraints().await {
                self.setup_warning("Constraint suspension failed", e).await;
            }
        }
    }

    async fn purge_staging(&self) -> Result<()> {
        let mut session = self.sessions.staging().await?;
        staging::purge(session.as_mut(), &self.config.sync.staging_prefix).await?;
        info!(
            "Dropped orphaned staging objects with prefix {}",
            self.config.sync.staging_prefix
        );
        Ok(())
    }

    async fn suspend_constraints(&self) -> Result<()> {
        let mut session = self.sessions.destination().await?;
        session.execute(SUSPEND_CONSTRAINTS_SQL).await?;
        info!("Destination constraints suspended");
        Ok(())
    }

    async fn setup_warning(&self, step: &str, error: SyncError) {
        warn!("{}: {}", step, error);
        self.log_event(LogEvent::warning(format!("{}: {}", step, error)))
            .await;
    }

    async fn enumerate_tables(&self) -> Result<Vec<String>> {
        let mut source = self.sessions.source().await?;
        let tables = source.base_tables(&self.config.source.schema).await?;
        Ok(tables
            .into_iter()
            .filter(|t| self.config.sync.selects_table(t))
            .collect())
    }

    async fn log_event(&self, event: LogEvent) {
        if let Err(e) = self.run_log.log_event(&event).await {
            warn!("Failed to write log event: {}", e);
        }
    }
}

impl SyncResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl RunReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchMode;
    use crate::state::{INFO_TYPE_JOB, INFO_TYPE_WARNING};
    use crate::test_support::{orders_columns, FakeGate, FakeSessions, MemoryRunLog, Stage};
    use crate::source::ColumnDescriptor;

    const CONFIG: &str = r#"
source:
  host: sql.example.com
  database: sales
  user: reader
  password: secret
destination:
  host: sql.example.com
  database: warehouse
  user: writer
  password: secret
sync:
  backoff_unit_ms: 10
"#;

    fn config() -> Config {
        Config::from_yaml(CONFIG).unwrap()
    }

    fn three_tables() -> FakeSessions {
        FakeSessions::with_orders()
            .with_table("Customers", vec![ColumnDescriptor::new("CustomerId", "int")])
            .with_table("Order-Items", orders_columns())
    }

    fn orchestrator(
        config: Config,
        sessions: &FakeSessions,
        gate: FakeGate,
        log: &Arc<MemoryRunLog>,
    ) -> Orchestrator {
        Orchestrator::with_components(
            config,
            Arc::new(sessions.clone()),
            Arc::new(gate),
            log.clone(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_job_processes_nothing() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());

        let err = orchestrator(config(), &sessions, FakeGate::disabled(), &log)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::GateDisabled(_)));
        assert!(log.outcomes().is_empty());
        assert!(log.events().is_empty());
        assert!(sessions.statements().is_empty());
        assert_eq!(sessions.sessions_opened(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_job_processes_nothing() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());

        let err = orchestrator(config(), &sessions, FakeGate::missing(), &log)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 0);
        assert!(log.outcomes().is_empty());
        assert_eq!(sessions.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_disabled_job_never_connects_to_unreachable_servers() {
        let mut config = config();
        config.source.host = "unreachable.invalid".to_string();
        config.destination.host = "unreachable.invalid".to_string();
        let log = Arc::new(MemoryRunLog::default());
        let orchestrator = Orchestrator::with_components(
            config.clone(),
            Arc::new(LazySessionFactory::new(config)),
            Arc::new(FakeGate::disabled()),
            log.clone(),
        );

        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, SyncError::GateDisabled(_)));
        assert!(log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_table_gets_exactly_one_outcome() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(7), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_total, 3);
        assert_eq!(result.tables_succeeded, 3);
        assert_eq!(result.status, "completed");
        assert!(result.unrecorded_tables.is_empty());

        let mut names: Vec<_> = log.outcomes().into_iter().map(|o| o.table_name).collect();
        names.sort();
        assert_eq!(names, vec!["Customers", "Order-Items", "Orders"]);
        assert!(log.outcomes().iter().all(|o| o.run_id == result.run_id && o.job_id == 7));

        let events = log.events();
        assert_eq!(events.first().unwrap().info_type, INFO_TYPE_JOB);
        assert!(events.last().unwrap().message.contains("3 succeeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_table_is_isolated() {
        let sessions = three_tables().fail_always("Customers", Stage::Load);
        let log = Arc::new(MemoryRunLog::default());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_failed, 1);
        assert_eq!(result.tables_succeeded, 2);
        assert_eq!(result.failed_tables, vec!["Customers"]);
        assert_eq!(result.status, "completed_with_errors");
        assert_eq!(log.outcomes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwritable_outcomes_are_reported() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::failing());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_succeeded, 3);
        let mut unrecorded = result.unrecorded_tables.clone();
        unrecorded.sort();
        assert_eq!(unrecorded, vec!["Customers", "Order-Items", "Orders"]);
        assert!(result.to_json().unwrap().contains("\"unrecorded_tables\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_outcome_logs_table_warning() {
        let sessions = FakeSessions::with_orders();
        // Orders outcome: first write plus three retries all fail
        let log = Arc::new(MemoryRunLog::failing_times(4));

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.unrecorded_tables, vec!["Orders"]);
        assert!(log.outcomes().is_empty());
        let warning = log
            .events()
            .into_iter()
            .find(|e| e.info_type == INFO_TYPE_WARNING)
            .unwrap();
        assert_eq!(warning.table_name.as_deref(), Some("Orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_failures_are_not_fatal() {
        let sessions = three_tables().fail_purge().fail_constraints();
        let log = Arc::new(MemoryRunLog::default());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_succeeded, 3);
        let warnings = log
            .events()
            .into_iter()
            .filter(|e| e.info_type == INFO_TYPE_WARNING)
            .count();
        assert_eq!(warnings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_runs_before_any_table() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());

        orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        let statements = sessions.statements();
        assert!(statements[0].contains("tempdb.sys.tables"));
        assert_eq!(statements[1], SUSPEND_CONSTRAINTS_SQL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constraint_suspension_can_be_disabled() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());
        let mut config = config();
        config.sync.suspend_constraints = false;

        orchestrator(config, &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(sessions.count_containing("sp_MSforeachtable"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_failure_aborts_run() {
        let sessions = three_tables().fail_enumerate();
        let log = Arc::new(MemoryRunLog::default());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await;

        assert!(result.is_err());
        assert!(log.outcomes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_filters_apply() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());
        let mut config = config();
        config.sync.exclude_tables = vec!["customers".to_string()];

        let result = orchestrator(config, &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_total, 2);
        assert_eq!(sessions.count_containing("[Customers]"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_issues_identical_sql() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());
        let mut config = config();
        config.sync.dispatch = DispatchMode::Sequential;
        let orchestrator = orchestrator(config, &sessions, FakeGate::enabled(1), &log);

        orchestrator.run().await.unwrap();
        let first = sessions.statements();
        orchestrator.run().await.unwrap();
        let all = sessions.statements();

        assert_eq!(all.len(), first.len() * 2);
        assert_eq!(&all[first.len()..], &first[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_recorded_as_failed() {
        let sessions = three_tables().panic_on("Customers");
        let log = Arc::new(MemoryRunLog::default());

        let result = orchestrator(config(), &sessions, FakeGate::enabled(1), &log)
            .run()
            .await
            .unwrap();

        assert_eq!(result.tables_total, 3);
        assert_eq!(result.failed_tables, vec!["Customers"]);
        assert_eq!(log.outcomes().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_reads_latest_run() {
        let sessions = three_tables();
        let log = Arc::new(MemoryRunLog::default());
        let orchestrator = orchestrator(config(), &sessions, FakeGate::enabled(1), &log);

        orchestrator.run().await.unwrap();
        let second = orchestrator.run().await.unwrap();
        let report = orchestrator.report().await.unwrap();

        assert_eq!(report.run_id, Some(second.run_id));
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded, 3);
        assert!(report.to_json().unwrap().contains("\"job_name\""));
    }
}
