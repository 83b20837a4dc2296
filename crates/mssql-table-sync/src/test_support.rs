//! In-memory sessions, run log and job gate for unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::traits::{CatalogSession, SessionFactory, SqlSession};
use crate::error::{SyncError, Result};
use crate::source::ColumnDescriptor;
use crate::state::{Job, JobGate, LogEvent, RunLog, TableRunOutcome};

const INJECTED: &str = "injected failure";

/// Session that records every statement and optionally fails on a substring.
#[derive(Default)]
pub(crate) struct RecordingSession {
    statements: Vec<String>,
    fail_on: Option<String>,
}

impl RecordingSession {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            statements: Vec::new(),
            fail_on: Some(needle.to_string()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.clone()
    }
}

#[async_trait]
impl SqlSession for RecordingSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        match &self.fail_on {
            Some(needle) if sql.contains(needle.as_str()) => {
                Err(SyncError::pool(INJECTED, "recording session"))
            }
            _ => Ok(()),
        }
    }
}

/// Pipeline stage a fault is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Introspect,
    Transfer,
    Load,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Source,
    Destination,
    Staging,
}

struct Fault {
    table: String,
    stage: Stage,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Default)]
struct Shared {
    tables: BTreeMap<String, Vec<ColumnDescriptor>>,
    faults: Vec<Fault>,
    statements: Vec<String>,
    fail_purge: bool,
    fail_constraints: bool,
    fail_enumerate: bool,
    panic_on: Option<String>,
    opened: usize,
}

impl Shared {
    /// Consume one matching fault, if any is still armed.
    fn trip(&mut self, stage: Stage, matches: impl Fn(&str) -> bool) -> bool {
        for fault in self.faults.iter_mut() {
            if fault.stage != stage || !matches(&fault.table) {
                continue;
            }
            match fault.remaining.as_mut() {
                None => return true,
                Some(0) => continue,
                Some(n) => {
                    *n -= 1;
                    return true;
                }
            }
        }
        false
    }
}

/// Session factory over a shared fake server.
///
/// Every statement from every role is appended to one log, so tests can
/// assert on global ordering.
#[derive(Clone, Default)]
pub(crate) struct FakeSessions {
    shared: Arc<Mutex<Shared>>,
}

pub(crate) fn orders_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("OrderId", "int"),
        ColumnDescriptor::new("Amount", "decimal").with_precision(10, 2),
        ColumnDescriptor::new("Name", "nvarchar").with_length(-1),
    ]
}

impl FakeSessions {
    pub fn with_orders() -> Self {
        Self::default().with_table("Orders", orders_columns())
    }

    pub fn with_table(self, name: &str, columns: Vec<ColumnDescriptor>) -> Self {
        self.lock().tables.insert(name.to_string(), columns);
        self
    }

    pub fn fail_always(self, table: &str, stage: Stage) -> Self {
        self.add_fault(table, stage, None)
    }

    pub fn fail_times(self, table: &str, stage: Stage, times: u32) -> Self {
        self.add_fault(table, stage, Some(times))
    }

    pub fn fail_purge(self) -> Self {
        self.lock().fail_purge = true;
        self
    }

    pub fn fail_constraints(self) -> Self {
        self.lock().fail_constraints = true;
        self
    }

    pub fn fail_enumerate(self) -> Self {
        self.lock().fail_enumerate = true;
        self
    }

    pub fn panic_on(self, table: &str) -> Self {
        self.lock().panic_on = Some(table.to_string());
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }

    /// Sessions handed out through [`SessionFactory`].
    pub fn sessions_opened(&self) -> usize {
        self.lock().opened
    }

    pub fn source_session(&self) -> FakeSession {
        self.session(Role::Source)
    }

    fn add_fault(self, table: &str, stage: Stage, remaining: Option<u32>) -> Self {
        self.lock().faults.push(Fault {
            table: table.to_string(),
            stage,
            remaining,
        });
        self
    }

    fn session(&self, role: Role) -> FakeSession {
        FakeSession {
            role,
            shared: self.shared.clone(),
        }
    }

    fn open(&self, role: Role) -> FakeSession {
        self.lock().opened += 1;
        self.session(role)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }
}

#[async_trait]
impl SessionFactory for FakeSessions {
    async fn source(&self) -> Result<Box<dyn CatalogSession>> {
        Ok(Box::new(self.open(Role::Source)))
    }

    async fn destination(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.open(Role::Destination)))
    }

    async fn staging(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.open(Role::Staging)))
    }
}

/// One role's session on a [`FakeSessions`] server.
pub(crate) struct FakeSession {
    role: Role,
    shared: Arc<Mutex<Shared>>,
}

fn is_transaction_control(sql: &str) -> bool {
    sql.contains("BEGIN TRANSACTION")
        || sql.contains("COMMIT TRANSACTION")
        || sql.contains("ROLLBACK TRANSACTION")
}

#[async_trait]
impl SqlSession for FakeSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.statements.push(sql.to_string());

        let failed = match self.role {
            Role::Source => {
                sql.contains("INTO tempdb")
                    && shared.trip(Stage::Transfer, |t| sql.contains(&format!("[{}]", t)))
            }
            Role::Destination => {
                (shared.fail_constraints && sql.contains("sp_MSforeachtable"))
                    || (!is_transaction_control(sql)
                        && shared.trip(Stage::Load, |t| sql.contains(&format!("[{}]", t))))
            }
            Role::Staging => {
                (shared.fail_purge && sql.contains("tempdb.sys.tables"))
                    || shared.trip(Stage::Cleanup, |t| sql.contains(t))
            }
        };

        if failed {
            Err(SyncError::pool(INJECTED, format!("{:?} session", self.role)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CatalogSession for FakeSession {
    async fn base_tables(&mut self, _schema: &str) -> Result<Vec<String>> {
        let shared = self.shared.lock().unwrap();
        if shared.fail_enumerate {
            return Err(SyncError::pool(INJECTED, "listing base tables"));
        }
        Ok(shared.tables.keys().cloned().collect())
    }

    async fn columns(&mut self, _schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let mut shared = self.shared.lock().unwrap();
        if shared.panic_on.as_deref() == Some(table) {
            drop(shared);
            panic!("catalog exploded on {}", table);
        }
        if shared.trip(Stage::Introspect, |t| t == table) {
            return Err(SyncError::schema_lookup(table, INJECTED));
        }
        Ok(shared.tables.get(table).cloned().unwrap_or_default())
    }
}

/// Run log kept in memory.
#[derive(Default)]
pub(crate) struct MemoryRunLog {
    outcomes: Mutex<Vec<TableRunOutcome>>,
    events: Mutex<Vec<LogEvent>>,
    failing: bool,
    outcome_failures: Mutex<u32>,
}

impl MemoryRunLog {
    /// A run log whose every write fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    /// A run log whose next `times` outcome writes fail.
    pub fn failing_times(times: u32) -> Self {
        Self {
            outcome_failures: Mutex::new(times),
            ..Default::default()
        }
    }

    pub fn outcomes(&self) -> Vec<TableRunOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunLog for MemoryRunLog {
    async fn log_event(&self, event: &LogEvent) -> Result<()> {
        if self.failing {
            return Err(SyncError::RunLog(INJECTED.to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn record_outcome(&self, outcome: &TableRunOutcome) -> Result<()> {
        if self.failing {
            return Err(SyncError::RunLog(INJECTED.to_string()));
        }
        {
            let mut remaining = self.outcome_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::RunLog(INJECTED.to_string()));
            }
        }
        self.outcomes.lock().unwrap().push(outcome.clone());
        Ok(())
    }

    async fn latest_outcomes(&self, job_id: i64) -> Result<Vec<TableRunOutcome>> {
        let outcomes = self.outcomes.lock().unwrap();
        let latest = outcomes
            .iter()
            .rev()
            .find(|o| o.job_id == job_id)
            .map(|o| o.run_id);
        let mut selected: Vec<_> = outcomes
            .iter()
            .filter(|o| o.job_id == job_id && Some(o.run_id) == latest)
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.table_name.cmp(&b.table_name));
        Ok(selected)
    }
}

/// Job gate answering from a fixed job record.
pub(crate) struct FakeGate {
    job: Option<Job>,
}

impl FakeGate {
    pub fn enabled(job_id: i64) -> Self {
        Self::with_state(job_id, true)
    }

    pub fn disabled() -> Self {
        Self::with_state(1, false)
    }

    pub fn missing() -> Self {
        Self { job: None }
    }

    fn with_state(job_id: i64, is_enabled: bool) -> Self {
        Self {
            job: Some(Job {
                job_id,
                job_name: "tables:copy".to_string(),
                is_enabled,
                created_at: None,
                updated_at: None,
            }),
        }
    }
}

#[async_trait]
impl JobGate for FakeGate {
    async fn lookup(&self, job_name: &str) -> Result<Option<Job>> {
        Ok(self.job.clone().filter(|j| j.job_name == job_name))
    }
}
