//! Storage boundary of the pipeline.
//!
//! The pipeline reads prior state through [`StageStore`] and hands every overwrite to
//! [`StageStore::commit`] as one [`WriteBatch`]. A commit deletes the prior record for each
//! key it carries and inserts the new one, all-or-nothing.

use crate::error::PersistenceError;
use crate::schema::{
    EstimateRecord, EventId, ExpenseClassification, FinancialSnapshot, GroupSummary,
    QuestionSet, RevenueAllocation, StageKey, TeamId,
};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

pub type StoreResult<T> = std::result::Result<T, PersistenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Snapshot,
    Classification,
    Estimate,
    Allocation,
    Summary,
    Questions,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Snapshot => "snapshot",
            RecordKind::Classification => "classification",
            RecordKind::Estimate => "estimate",
            RecordKind::Allocation => "allocation",
            RecordKind::Summary => "summary",
            RecordKind::Questions => "questions",
        }
    }
}

/// Records replacing prior state, keyed by each record's StageKey.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub snapshots: Vec<FinancialSnapshot>,
    pub classifications: Vec<ExpenseClassification>,
    pub estimates: Vec<EstimateRecord>,
    pub allocations: Vec<RevenueAllocation>,
    pub summaries: Vec<GroupSummary>,
    pub questions: Vec<QuestionSet>,
    /// `(event, stage)` pairs whose allocations are replaced as a whole: every stored
    /// allocation of the pair is removed before this batch's allocations are inserted.
    pub allocation_scopes: Vec<(EventId, u32)>,
}

impl WriteBatch {
    pub fn len(&self) -> usize {
        self.snapshots.len()
            + self.classifications.len()
            + self.estimates.len()
            + self.allocations.len()
            + self.summaries.len()
            + self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the batch into `(kind, key, json)` rows.
    fn rows(&self) -> StoreResult<Vec<(RecordKind, StageKey, String)>> {
        let mut rows = Vec::with_capacity(self.len());
        for r in &self.snapshots {
            rows.push((RecordKind::Snapshot, r.key, serde_json::to_string(r)?));
        }
        for r in &self.classifications {
            rows.push((RecordKind::Classification, r.key, serde_json::to_string(r)?));
        }
        for r in &self.estimates {
            rows.push((RecordKind::Estimate, r.key, serde_json::to_string(r)?));
        }
        for r in &self.allocations {
            rows.push((RecordKind::Allocation, r.key, serde_json::to_string(r)?));
        }
        for r in &self.summaries {
            rows.push((RecordKind::Summary, r.key, serde_json::to_string(r)?));
        }
        for r in &self.questions {
            rows.push((RecordKind::Questions, r.key, serde_json::to_string(r)?));
        }
        Ok(rows)
    }
}

pub trait StageStore: Send + Sync {
    fn snapshot(&self, key: &StageKey) -> StoreResult<Option<FinancialSnapshot>>;

    fn classification(&self, key: &StageKey) -> StoreResult<Option<ExpenseClassification>>;

    fn estimate(&self, key: &StageKey) -> StoreResult<Option<EstimateRecord>>;

    fn summary(&self, key: &StageKey) -> StoreResult<Option<GroupSummary>>;

    /// All summaries of a team for stages strictly before `before_stage`, oldest first.
    fn summary_history(
        &self,
        event_id: EventId,
        team_id: TeamId,
        before_stage: u32,
    ) -> StoreResult<Vec<GroupSummary>>;

    fn questions(&self, key: &StageKey) -> StoreResult<Option<QuestionSet>>;

    /// Allocations of one stage of an event, ordered by rank.
    fn allocations(&self, event_id: EventId, stage: u32) -> StoreResult<Vec<RevenueAllocation>>;

    /// Applies the batch atomically: either every record replaces its predecessor or
    /// nothing changes.
    fn commit(&self, batch: &WriteBatch) -> StoreResult<()>;

    fn record_count(&self, kind: RecordKind) -> StoreResult<usize>;
}

type Table = BTreeMap<(RecordKind, StageKey), String>;

/// In-process store. A commit holds the write lock for the whole batch.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get<T: DeserializeOwned>(&self, kind: RecordKind, key: &StageKey) -> StoreResult<Option<T>> {
        let records = self.records.read().map_err(|_| PersistenceError::Poisoned)?;
        records
            .get(&(kind, *key))
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(PersistenceError::from)
    }

    fn scan<T, F>(&self, kind: RecordKind, filter: F) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&StageKey) -> bool,
    {
        let records = self.records.read().map_err(|_| PersistenceError::Poisoned)?;
        records
            .iter()
            .filter(|((k, key), _)| *k == kind && filter(key))
            .map(|(_, raw)| serde_json::from_str(raw).map_err(PersistenceError::from))
            .collect()
    }
}

impl StageStore for MemoryStore {
    fn snapshot(&self, key: &StageKey) -> StoreResult<Option<FinancialSnapshot>> {
        self.get(RecordKind::Snapshot, key)
    }

    fn classification(&self, key: &StageKey) -> StoreResult<Option<ExpenseClassification>> {
        self.get(RecordKind::Classification, key)
    }

    fn estimate(&self, key: &StageKey) -> StoreResult<Option<EstimateRecord>> {
        self.get(RecordKind::Estimate, key)
    }

    fn summary(&self, key: &StageKey) -> StoreResult<Option<GroupSummary>> {
        self.get(RecordKind::Summary, key)
    }

    fn summary_history(
        &self,
        event_id: EventId,
        team_id: TeamId,
        before_stage: u32,
    ) -> StoreResult<Vec<GroupSummary>> {
        let mut history: Vec<GroupSummary> = self.scan(RecordKind::Summary, |k| {
            k.event_id == event_id && k.team_id == team_id && k.stage < before_stage
        })?;
        history.sort_by_key(|s| s.key.stage);
        Ok(history)
    }

    fn questions(&self, key: &StageKey) -> StoreResult<Option<QuestionSet>> {
        self.get(RecordKind::Questions, key)
    }

    fn allocations(&self, event_id: EventId, stage: u32) -> StoreResult<Vec<RevenueAllocation>> {
        let mut allocations: Vec<RevenueAllocation> = self.scan(RecordKind::Allocation, |k| {
            k.event_id == event_id && k.stage == stage
        })?;
        allocations.sort_by_key(|a| a.rank);
        Ok(allocations)
    }

    fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        // Serialize everything before taking the lock so a bad record changes nothing.
        let rows = batch.rows()?;
        let mut records = self.records.write().map_err(|_| PersistenceError::Poisoned)?;
        for &(event_id, stage) in &batch.allocation_scopes {
            records.retain(|(kind, key), _| {
                !(*kind == RecordKind::Allocation && key.event_id == event_id && key.stage == stage)
            });
        }
        for (kind, key, json) in rows {
            records.remove(&(kind, key));
            records.insert((kind, key), json);
        }
        debug!("Committed {} records to memory store", batch.len());
        Ok(())
    }

    fn record_count(&self, kind: RecordKind) -> StoreResult<usize> {
        let records = self.records.read().map_err(|_| PersistenceError::Poisoned)?;
        Ok(records.keys().filter(|(k, _)| *k == kind).count())
    }
}

/// SQLite-backed store. Every record is a JSON payload addressed by kind and StageKey.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stage_records (
    kind      TEXT    NOT NULL,
    event_id  INTEGER NOT NULL,
    team_id   INTEGER NOT NULL,
    stage     INTEGER NOT NULL,
    payload   TEXT    NOT NULL,
    written_at TEXT   NOT NULL DEFAULT (datetime('now'))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_stage_records_key
    ON stage_records (kind, event_id, stage, team_id);
";

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn get<T: DeserializeOwned>(&self, kind: RecordKind, key: &StageKey) -> StoreResult<Option<T>> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT payload FROM stage_records
                 WHERE kind = ?1 AND event_id = ?2 AND team_id = ?3 AND stage = ?4",
                params![kind.as_str(), key.event_id, key.team_id, key.stage],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| serde_json::from_str(&r))
            .transpose()
            .map_err(PersistenceError::from)
    }

    fn query<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> StoreResult<Vec<T>> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let mut stmt = conn.prepare(sql)?;
        let payloads = stmt
            .query_map(args, |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        payloads
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(PersistenceError::from))
            .collect()
    }
}

impl StageStore for SqliteStore {
    fn snapshot(&self, key: &StageKey) -> StoreResult<Option<FinancialSnapshot>> {
        self.get(RecordKind::Snapshot, key)
    }

    fn classification(&self, key: &StageKey) -> StoreResult<Option<ExpenseClassification>> {
        self.get(RecordKind::Classification, key)
    }

    fn estimate(&self, key: &StageKey) -> StoreResult<Option<EstimateRecord>> {
        self.get(RecordKind::Estimate, key)
    }

    fn summary(&self, key: &StageKey) -> StoreResult<Option<GroupSummary>> {
        self.get(RecordKind::Summary, key)
    }

    fn summary_history(
        &self,
        event_id: EventId,
        team_id: TeamId,
        before_stage: u32,
    ) -> StoreResult<Vec<GroupSummary>> {
        self.query(
            "SELECT payload FROM stage_records
             WHERE kind = ?1 AND event_id = ?2 AND team_id = ?3 AND stage < ?4
             ORDER BY stage ASC",
            params![
                RecordKind::Summary.as_str(),
                event_id,
                team_id,
                before_stage
            ],
        )
    }

    fn questions(&self, key: &StageKey) -> StoreResult<Option<QuestionSet>> {
        self.get(RecordKind::Questions, key)
    }

    fn allocations(&self, event_id: EventId, stage: u32) -> StoreResult<Vec<RevenueAllocation>> {
        let mut allocations: Vec<RevenueAllocation> = self.query(
            "SELECT payload FROM stage_records
             WHERE kind = ?1 AND event_id = ?2 AND stage = ?3",
            params![RecordKind::Allocation.as_str(), event_id, stage],
        )?;
        allocations.sort_by_key(|a| a.rank);
        Ok(allocations)
    }

    fn commit(&self, batch: &WriteBatch) -> StoreResult<()> {
        let rows = batch.rows()?;
        let mut conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;

        // Dropping the transaction without commit rolls everything back.
        let tx = conn.transaction()?;
        {
            let mut clear = tx.prepare(
                "DELETE FROM stage_records WHERE kind = ?1 AND event_id = ?2 AND stage = ?3",
            )?;
            for (event_id, stage) in &batch.allocation_scopes {
                clear.execute(params![RecordKind::Allocation.as_str(), event_id, stage])?;
            }

            let mut delete = tx.prepare(
                "DELETE FROM stage_records
                 WHERE kind = ?1 AND event_id = ?2 AND team_id = ?3 AND stage = ?4",
            )?;
            let mut insert = tx.prepare(
                "INSERT INTO stage_records (kind, event_id, team_id, stage, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (kind, key, json) in &rows {
                delete.execute(params![kind.as_str(), key.event_id, key.team_id, key.stage])?;
                insert.execute(params![
                    kind.as_str(),
                    key.event_id,
                    key.team_id,
                    key.stage,
                    json
                ])?;
            }
        }
        tx.commit()?;

        debug!("Committed {} records to sqlite store", rows.len());
        Ok(())
    }

    fn record_count(&self, kind: RecordKind) -> StoreResult<usize> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stage_records WHERE kind = ?1",
            params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
