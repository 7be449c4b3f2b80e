use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use docpipe_core::{
    InputId, InstanceId, InstanceStatus, OutputReference, PipelineError, PipelineResult,
    StepKind, StepRecord, StepStatus, WorkflowInstance,
};

/// SQLite-backed history of workflow instances and their step outcomes.
///
/// The connection sits behind a mutex so one store can be shared by every
/// running instance; each call holds the lock only for its own statements.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open or create the history store at the given path.
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open(path).map_err(db)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        info!(path = %path, "History store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open_in_memory().map_err(db)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> PipelineResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::History("history store lock poisoned".into()))
    }

    fn init_schema(&self) -> PipelineResult<()> {
        self.lock()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS instances (
                    id TEXT PRIMARY KEY,
                    input_id TEXT NOT NULL,
                    current_step INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    output_ref TEXT,
                    error TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_instances_status ON instances(status);
                CREATE TABLE IF NOT EXISTS purged_instances (
                    id TEXT PRIMARY KEY,
                    input_id TEXT NOT NULL,
                    current_step INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    output_ref TEXT,
                    error TEXT
                );
                CREATE TABLE IF NOT EXISTS step_history (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    instance_id TEXT NOT NULL,
                    step_index INTEGER NOT NULL,
                    step TEXT NOT NULL,
                    input TEXT NOT NULL,
                    output TEXT,
                    status TEXT NOT NULL,
                    attempts INTEGER NOT NULL,
                    error TEXT,
                    recorded_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_step_history_instance
                    ON step_history(instance_id, step_index);",
            )
            .map_err(db)
    }

    /// Insert a new instance. Returns `false` when an instance with the same
    /// id already exists or was purged, leaving the stored one untouched.
    pub fn create_instance(&self, instance: &WorkflowInstance) -> PipelineResult<bool> {
        let inserted = self
            .lock()?
            .execute(
                "INSERT OR IGNORE INTO instances
                 (id, input_id, current_step, status, created_at, updated_at, output_ref, error)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE NOT EXISTS (SELECT 1 FROM purged_instances WHERE id = ?1)",
                params![
                    instance.id.to_string(),
                    instance.input_id.as_str(),
                    instance.current_step,
                    instance.status.as_str(),
                    timestamp(instance.created_at),
                    timestamp(instance.updated_at),
                    instance.output_ref.as_ref().map(|r| r.as_str().to_string()),
                    instance.error,
                ],
            )
            .map_err(db)?;
        Ok(inserted == 1)
    }

    /// Look up an instance, falling back to the summary kept for purged ones.
    pub fn get_instance(&self, id: &InstanceId) -> PipelineResult<Option<WorkflowInstance>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1
                     UNION ALL
                     SELECT {INSTANCE_COLUMNS} FROM purged_instances WHERE id = ?1
                     LIMIT 1"
                ),
                params![id.to_string()],
                RawInstance::from_row,
            )
            .optional()
            .map_err(db)?;
        raw.map(RawInstance::into_instance).transpose()
    }

    /// Most recently created instances first, optionally filtered by status.
    pub fn list_instances(
        &self,
        status: Option<InstanceStatus>,
        limit: usize,
    ) -> PipelineResult<Vec<WorkflowInstance>> {
        let conn = self.lock()?;
        let limit = limit as i64;
        let raws = match status {
            Some(status) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {INSTANCE_COLUMNS} FROM instances WHERE status = ?1
                         ORDER BY created_at DESC LIMIT ?2"
                    ))
                    .map_err(db)?;
                let rows = stmt
                    .query_map(params![status.as_str(), limit], RawInstance::from_row)
                    .map_err(db)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db)?
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {INSTANCE_COLUMNS} FROM instances
                         ORDER BY created_at DESC LIMIT ?1"
                    ))
                    .map_err(db)?;
                let rows = stmt
                    .query_map(params![limit], RawInstance::from_row)
                    .map_err(db)?;
                rows.collect::<Result<Vec<_>, _>>().map_err(db)?
            }
        };
        raws.into_iter().map(RawInstance::into_instance).collect()
    }

    /// Every instance that has not reached a terminal state, oldest first.
    pub fn list_running(&self) -> PipelineResult<Vec<WorkflowInstance>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM instances WHERE status = ?1
                 ORDER BY created_at ASC"
            ))
            .map_err(db)?;
        let raws = stmt
            .query_map(params![InstanceStatus::Running.as_str()], RawInstance::from_row)
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        raws.into_iter().map(RawInstance::into_instance).collect()
    }

    /// Instance counts per status.
    pub fn counts(&self) -> PipelineResult<HashMap<InstanceStatus, usize>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM instances GROUP BY status")
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        rows.into_iter()
            .map(|(status, count)| -> PipelineResult<(InstanceStatus, usize)> {
                Ok((status.parse()?, count as usize))
            })
            .collect()
    }

    /// Append a step outcome. A completed step also advances the instance's
    /// `current_step` past it; both writes commit together.
    pub fn record_step(&self, record: &StepRecord) -> PipelineResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        tx.execute(
            "INSERT INTO step_history
             (instance_id, step_index, step, input, output, status, attempts, error, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.instance_id.to_string(),
                record.step_index,
                record.step.as_str(),
                serde_json::to_string(&record.input)?,
                record.output.as_ref().map(serde_json::to_string).transpose()?,
                record.status.to_string(),
                record.attempts,
                record.error,
                timestamp(record.recorded_at),
            ],
        )
        .map_err(db)?;
        if record.status == StepStatus::Completed {
            tx.execute(
                "UPDATE instances SET current_step = MAX(current_step, ?2), updated_at = ?3
                 WHERE id = ?1",
                params![
                    record.instance_id.to_string(),
                    record.step_index + 1,
                    timestamp(record.recorded_at),
                ],
            )
            .map_err(db)?;
        }
        tx.commit().map_err(db)?;
        debug!(
            instance_id = %record.instance_id,
            step = %record.step,
            status = %record.status,
            "Step recorded"
        );
        Ok(())
    }

    /// The completed record for `step`, if this instance already ran it.
    pub fn completed_step(
        &self,
        instance_id: &InstanceId,
        step: StepKind,
    ) -> PipelineResult<Option<StepRecord>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {STEP_COLUMNS} FROM step_history
                     WHERE instance_id = ?1 AND step_index = ?2 AND status = ?3
                     ORDER BY seq ASC LIMIT 1"
                ),
                params![
                    instance_id.to_string(),
                    step.index(),
                    StepStatus::Completed.to_string()
                ],
                RawStep::from_row,
            )
            .optional()
            .map_err(db)?;
        raw.map(RawStep::into_record).transpose()
    }

    /// Every recorded step outcome for an instance, in recording order.
    pub fn step_history(&self, instance_id: &InstanceId) -> PipelineResult<Vec<StepRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {STEP_COLUMNS} FROM step_history WHERE instance_id = ?1 ORDER BY seq ASC"
            ))
            .map_err(db)?;
        let raws = stmt
            .query_map(params![instance_id.to_string()], RawStep::from_row)
            .map_err(db)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db)?;
        raws.into_iter().map(RawStep::into_record).collect()
    }

    pub fn complete_instance(
        &self,
        id: &InstanceId,
        output_ref: &OutputReference,
        at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        self.finish(id, InstanceStatus::Completed, Some(output_ref.as_str()), None, at)
    }

    pub fn fail_instance(&self, id: &InstanceId, error: &str, at: DateTime<Utc>) -> PipelineResult<()> {
        self.finish(id, InstanceStatus::Failed, None, Some(error), at)
    }

    fn finish(
        &self,
        id: &InstanceId,
        status: InstanceStatus,
        output_ref: Option<&str>,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> PipelineResult<()> {
        let updated = self
            .lock()?
            .execute(
                "UPDATE instances SET status = ?2, output_ref = ?3, error = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![id.to_string(), status.as_str(), output_ref, error, timestamp(at)],
            )
            .map_err(db)?;
        if updated == 0 {
            return Err(PipelineError::History(format!("unknown instance {id}")));
        }
        Ok(())
    }

    /// Delete the step history of terminal instances last updated before
    /// `before` and move their rows to `purged_instances`. The moved row keeps
    /// the id reserved, so the same upload event never starts a second
    /// instance. Returns the number of instances purged.
    pub fn purge_finished(&self, before: DateTime<Utc>) -> PipelineResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db)?;
        let cutoff = timestamp(before);
        tx.execute(
            &format!(
                "INSERT OR REPLACE INTO purged_instances ({INSTANCE_COLUMNS})
                 SELECT {INSTANCE_COLUMNS} FROM instances WHERE status != ?1 AND updated_at < ?2"
            ),
            params![InstanceStatus::Running.as_str(), cutoff],
        )
        .map_err(db)?;
        tx.execute(
            "DELETE FROM step_history WHERE instance_id IN (
                SELECT id FROM instances WHERE status != ?1 AND updated_at < ?2
             )",
            params![InstanceStatus::Running.as_str(), cutoff],
        )
        .map_err(db)?;
        let removed = tx
            .execute(
                "DELETE FROM instances WHERE status != ?1 AND updated_at < ?2",
                params![InstanceStatus::Running.as_str(), cutoff],
            )
            .map_err(db)?;
        tx.commit().map_err(db)?;
        info!(removed, "Purged finished instances");
        Ok(removed)
    }
}

const INSTANCE_COLUMNS: &str =
    "id, input_id, current_step, status, created_at, updated_at, output_ref, error";
const STEP_COLUMNS: &str =
    "instance_id, step_index, step, input, output, status, attempts, error, recorded_at";

fn db(e: rusqlite::Error) -> PipelineError {
    PipelineError::History(e.to_string())
}

/// Fixed-width UTC text so stored timestamps sort lexicographically.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> PipelineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::History(format!("bad timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: &str) -> PipelineResult<InstanceId> {
    InstanceId::parse_str(raw)
        .map_err(|e| PipelineError::History(format!("bad instance id '{raw}': {e}")))
}

struct RawInstance {
    id: String,
    input_id: String,
    current_step: u32,
    status: String,
    created_at: String,
    updated_at: String,
    output_ref: Option<String>,
    error: Option<String>,
}

impl RawInstance {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            input_id: row.get(1)?,
            current_step: row.get(2)?,
            status: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            output_ref: row.get(6)?,
            error: row.get(7)?,
        })
    }

    fn into_instance(self) -> PipelineResult<WorkflowInstance> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            input_id: InputId::parse(self.input_id)?,
            current_step: self.current_step,
            status: self.status.parse()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            output_ref: self.output_ref.map(OutputReference::new),
            error: self.error,
        })
    }
}

struct RawStep {
    instance_id: String,
    step_index: u32,
    input: String,
    output: Option<String>,
    status: String,
    attempts: u32,
    error: Option<String>,
    recorded_at: String,
}

impl RawStep {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            instance_id: row.get(0)?,
            step_index: row.get(1)?,
            input: row.get(3)?,
            output: row.get(4)?,
            status: row.get(5)?,
            attempts: row.get(6)?,
            error: row.get(7)?,
            recorded_at: row.get(8)?,
        })
    }

    fn into_record(self) -> PipelineResult<StepRecord> {
        let step = StepKind::from_index(self.step_index).ok_or_else(|| {
            PipelineError::History(format!("unknown step index {}", self.step_index))
        })?;
        Ok(StepRecord {
            instance_id: parse_uuid(&self.instance_id)?,
            step_index: self.step_index,
            step,
            input: serde_json::from_str(&self.input)?,
            output: self.output.as_deref().map(serde_json::from_str).transpose()?,
            status: self.status.parse()?,
            attempts: self.attempts,
            error: self.error,
            recorded_at: parse_timestamp(&self.recorded_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn instance(input: &str) -> WorkflowInstance {
        WorkflowInstance::new(Uuid::new_v4(), InputId::parse(input).unwrap(), t0())
    }

    #[test]
    fn test_create_is_idempotent() {
        let store = HistoryStore::in_memory().unwrap();
        let inst = instance("invoice123.pdf");
        assert!(store.create_instance(&inst).unwrap());
        assert!(!store.create_instance(&inst).unwrap());

        let loaded = store.get_instance(&inst.id).unwrap().unwrap();
        assert_eq!(loaded.input_id.as_str(), "invoice123.pdf");
        assert_eq!(loaded.status, InstanceStatus::Running);
        assert_eq!(loaded.created_at, t0());
        assert!(store.get_instance(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_completed_step_advances_instance() {
        let store = HistoryStore::in_memory().unwrap();
        let inst = instance("a.pdf");
        store.create_instance(&inst).unwrap();

        store
            .record_step(&StepRecord::failed(inst.id, StepKind::Extract, json!("a.pdf"), 1, "boom"))
            .unwrap();
        assert!(store.completed_step(&inst.id, StepKind::Extract).unwrap().is_none());
        assert_eq!(store.get_instance(&inst.id).unwrap().unwrap().current_step, 0);

        store
            .record_step(&StepRecord::completed(
                inst.id,
                StepKind::Extract,
                json!("a.pdf"),
                json!("Total: $500"),
                2,
            ))
            .unwrap();
        let record = store.completed_step(&inst.id, StepKind::Extract).unwrap().unwrap();
        assert_eq!(record.output, Some(json!("Total: $500")));
        assert_eq!(record.attempts, 2);
        assert_eq!(store.get_instance(&inst.id).unwrap().unwrap().current_step, 1);
        assert_eq!(store.step_history(&inst.id).unwrap().len(), 2);
    }

    #[test]
    fn test_finish_and_list() {
        let store = HistoryStore::in_memory().unwrap();
        let done = instance("done.pdf");
        let failed = instance("failed.pdf");
        let running = instance("running.pdf");
        for inst in [&done, &failed, &running] {
            store.create_instance(inst).unwrap();
        }

        store
            .complete_instance(&done.id, &OutputReference::new("done.pdf-x.txt"), t0())
            .unwrap();
        store.fail_instance(&failed.id, "step 'extract' failed", t0()).unwrap();

        let loaded = store.get_instance(&done.id).unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Completed);
        assert_eq!(loaded.output_ref.unwrap().as_str(), "done.pdf-x.txt");

        let running_list = store.list_running().unwrap();
        assert_eq!(running_list.len(), 1);
        assert_eq!(running_list[0].id, running.id);

        let failed_list = store.list_instances(Some(InstanceStatus::Failed), 10).unwrap();
        assert_eq!(failed_list.len(), 1);
        assert!(failed_list[0].output_ref.is_none());
        assert_eq!(store.list_instances(None, 2).unwrap().len(), 2);

        let counts = store.counts().unwrap();
        assert_eq!(counts.get(&InstanceStatus::Completed), Some(&1));
        assert_eq!(counts.get(&InstanceStatus::Running), Some(&1));

        assert!(store.fail_instance(&Uuid::new_v4(), "x", t0()).is_err());
    }

    #[test]
    fn test_purge_keeps_running_and_recent() {
        let store = HistoryStore::in_memory().unwrap();
        let old = instance("old.pdf");
        let recent = instance("recent.pdf");
        let running = instance("running.pdf");
        for inst in [&old, &recent, &running] {
            store.create_instance(inst).unwrap();
        }
        store
            .record_step(&StepRecord::completed(old.id, StepKind::Extract, json!("old.pdf"), json!("x"), 1))
            .unwrap();
        store
            .complete_instance(&old.id, &OutputReference::new("old.txt"), t0())
            .unwrap();
        store
            .complete_instance(&recent.id, &OutputReference::new("recent.txt"), t0() + Duration::days(10))
            .unwrap();

        let removed = store.purge_finished(t0() + Duration::days(5)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.step_history(&old.id).unwrap().is_empty());
        assert!(store.list_instances(None, 10).unwrap().iter().all(|i| i.id != old.id));
        assert_eq!(store.counts().unwrap().get(&InstanceStatus::Completed), Some(&1));
        assert!(store.get_instance(&recent.id).unwrap().is_some());
        assert!(store.get_instance(&running.id).unwrap().is_some());
    }

    #[test]
    fn test_purged_id_stays_reserved() {
        let store = HistoryStore::in_memory().unwrap();
        let done = instance("invoice123.pdf");
        store.create_instance(&done).unwrap();
        store
            .complete_instance(&done.id, &OutputReference::new("invoice123.txt"), t0())
            .unwrap();
        assert_eq!(store.purge_finished(t0() + Duration::days(1)).unwrap(), 1);

        assert!(!store.create_instance(&done).unwrap());
        let kept = store.get_instance(&done.id).unwrap().unwrap();
        assert_eq!(kept.status, InstanceStatus::Completed);
        assert_eq!(kept.output_ref.unwrap().as_str(), "invoice123.txt");
        assert!(store.list_running().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");
        let path = path.to_str().unwrap();
        let inst = instance("a.pdf");
        {
            let store = HistoryStore::open(path).unwrap();
            store.create_instance(&inst).unwrap();
        }
        let store = HistoryStore::open(path).unwrap();
        assert_eq!(store.list_running().unwrap().len(), 1);
    }
}
