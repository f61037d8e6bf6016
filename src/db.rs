// 🗄️ SQLite persistence - fact store, dealer registry, audit trail
//
// Every delete-then-insert runs inside one transaction, so a failed write
// leaves the previous month / year intact.

use crate::error::{ReconError, Result};
use crate::model::{
    ApprovedDealRecord, CanonicalDealer, Counts, FinancingType, FundedDealRecord, MonthlyDealerFact,
};
use crate::normalize::{normalize_name, normalize_state};
use crate::registry::DealerRegistry;
use crate::rollup::{FiYearRollup, StateMonthRollup, YearRollups, YearlyDealerRollup};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Event for audit trail: every commit and applied decision is recorded
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// FACT STORE COLLABORATOR
// ============================================================================

/// Committed records of one month
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthRecords {
    pub facts: Vec<MonthlyDealerFact>,
    pub funded: Vec<FundedDealRecord>,
    pub approved: Vec<ApprovedDealRecord>,
}

pub trait FactStore {
    /// Supersede everything stored for (year, month); idempotent
    fn replace_month(
        &self,
        year: i32,
        month: u32,
        facts: &[MonthlyDealerFact],
        funded: &[FundedDealRecord],
        approved: &[ApprovedDealRecord],
    ) -> Result<()>;

    fn query_by_year(&self, year: i32) -> Result<Vec<MonthlyDealerFact>>;

    fn query_month(&self, year: i32, month: u32) -> Result<MonthRecords>;

    /// Supersede every yearly aggregate for `year`
    fn replace_year(&self, year: i32, rollups: &YearRollups) -> Result<()>;

    fn query_rollups(&self, year: i32) -> Result<YearRollups>;

    /// Years with committed monthly facts, ascending
    fn list_years(&self) -> Result<Vec<i32>>;

    fn append_events(&self, events: &[Event]) -> Result<()>;
}

/// Attach the failing operation to a rusqlite error
trait PersistContext<T> {
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> PersistContext<T> for rusqlite::Result<T> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|e| ReconError::persistence(operation, e))
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const COUNT_COLUMNS: &str = "total_apps INTEGER NOT NULL DEFAULT 0,
            approved INTEGER NOT NULL DEFAULT 0,
            counter INTEGER NOT NULL DEFAULT 0,
            pending INTEGER NOT NULL DEFAULT 0,
            denial INTEGER NOT NULL DEFAULT 0,
            funded INTEGER NOT NULL DEFAULT 0,
            funded_amount REAL NOT NULL DEFAULT 0";

pub fn setup_database(conn: &Connection) -> rusqlite::Result<()> {
    // Enable WAL mode for crash recovery (in-memory databases report "memory")
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Dealer registry
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS dealers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            name_key TEXT NOT NULL,
            state TEXT NOT NULL,
            financing_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(name_key, state)
        )",
        [],
    )?;

    // ==========================================================================
    // Monthly facts + raw deal records
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS monthly_facts (
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            dealer TEXT NOT NULL,
            state TEXT NOT NULL,
            financing_type TEXT NOT NULL,
            {},
            PRIMARY KEY (year, month, dealer, state, financing_type)
        )",
            COUNT_COLUMNS
        ),
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS funded_deals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            dealer TEXT NOT NULL,
            state TEXT NOT NULL,
            financing_type TEXT NOT NULL,
            loan_amount REAL NOT NULL,
            apr REAL,
            fee_pct REAL,
            ltv REAL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS approved_deals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            dealer TEXT NOT NULL,
            state TEXT NOT NULL,
            financing_type TEXT NOT NULL,
            ltv REAL
        )",
        [],
    )?;

    // ==========================================================================
    // Yearly aggregates (rebuilt in full per year)
    // ==========================================================================
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS yearly_dealer_totals (
            year INTEGER NOT NULL,
            dealer TEXT NOT NULL,
            state TEXT NOT NULL,
            financing_type TEXT NOT NULL,
            {},
            PRIMARY KEY (year, dealer, state, financing_type)
        )",
            COUNT_COLUMNS
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS state_monthly (
            year INTEGER NOT NULL,
            state TEXT NOT NULL,
            month INTEGER NOT NULL,
            {},
            PRIMARY KEY (year, state, month)
        )",
            COUNT_COLUMNS
        ),
        [],
    )?;

    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS fi_yearly (
            year INTEGER NOT NULL,
            financing_type TEXT NOT NULL,
            {},
            PRIMARY KEY (year, financing_type)
        )",
            COUNT_COLUMNS
        ),
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_funded_period ON funded_deals(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_approved_period ON approved_deals(year, month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

/// Read the seven count columns starting at `offset`
fn counts_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<Counts> {
    Ok(Counts {
        total_apps: row.get(offset)?,
        approved: row.get(offset + 1)?,
        counter: row.get(offset + 2)?,
        pending: row.get(offset + 3)?,
        denial: row.get(offset + 4)?,
        funded: row.get(offset + 5)?,
        funded_amount: row.get(offset + 6)?,
    })
}

fn fi_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<FinancingType> {
    let stored: String = row.get(idx)?;
    Ok(FinancingType::from_stored(&stored))
}

const COUNT_SELECT: &str = "total_apps, approved, counter, pending, denial, funded, funded_amount";

// ============================================================================
// SQLITE STORE
// ============================================================================

/// SQLite-backed fact store and dealer registry
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).during("open database")?;
        setup_database(&conn).during("setup database")?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().during("open database")?;
        setup_database(&conn).during("setup database")?;
        Ok(SqliteStore { conn })
    }

    pub fn get_events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        get_events_for_entity(&self.conn, entity_type, entity_id)
    }

    pub fn count_events(&self, event_type: &str) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM events WHERE event_type = ?1",
                params![event_type],
                |row| row.get(0),
            )
            .during("count events")
    }

    pub fn find_dealer(&self, name: &str, state: &str) -> Result<Option<CanonicalDealer>> {
        self.conn
            .query_row(
                "SELECT id, name, state, financing_type FROM dealers WHERE name_key = ?1 AND state = ?2",
                params![normalize_name(name), normalize_state(state)],
                |row| {
                    Ok(CanonicalDealer {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        state: row.get(2)?,
                        financing_type: fi_at(row, 3)?,
                    })
                },
            )
            .optional()
            .during("find dealer")
    }
}

impl FactStore for SqliteStore {
    fn replace_month(
        &self,
        year: i32,
        month: u32,
        facts: &[MonthlyDealerFact],
        funded: &[FundedDealRecord],
        approved: &[ApprovedDealRecord],
    ) -> Result<()> {
        let op = "replace_month";
        let tx = self.conn.unchecked_transaction().during(op)?;

        for table in ["monthly_facts", "funded_deals", "approved_deals"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE year = ?1 AND month = ?2", table),
                params![year, month],
            )
            .during(op)?;
        }

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO monthly_facts (
                        year, month, dealer, state, financing_type,
                        total_apps, approved, counter, pending, denial, funded, funded_amount
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                )
                .during(op)?;
            for fact in facts {
                let c = &fact.counts;
                stmt.execute(params![
                    year,
                    month,
                    fact.dealer,
                    fact.state,
                    fact.financing_type.as_str(),
                    c.total_apps,
                    c.approved,
                    c.counter,
                    c.pending,
                    c.denial,
                    c.funded,
                    c.funded_amount,
                ])
                .during(op)?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO funded_deals (
                        year, month, dealer, state, financing_type, loan_amount, apr, fee_pct, ltv
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .during(op)?;
            for r in funded {
                stmt.execute(params![
                    year,
                    month,
                    r.dealer,
                    r.state,
                    r.financing_type.as_str(),
                    r.loan_amount,
                    r.apr,
                    r.fee_pct,
                    r.ltv,
                ])
                .during(op)?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO approved_deals (year, month, dealer, state, financing_type, ltv)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .during(op)?;
            for r in approved {
                stmt.execute(params![year, month, r.dealer, r.state, r.financing_type.as_str(), r.ltv])
                    .during(op)?;
            }
        }

        tx.commit().during(op)?;
        log::debug!(
            "replaced {}-{:02}: {} facts, {} funded, {} approved",
            year,
            month,
            facts.len(),
            funded.len(),
            approved.len()
        );
        Ok(())
    }

    fn query_by_year(&self, year: i32) -> Result<Vec<MonthlyDealerFact>> {
        let op = "query_by_year";
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT year, month, dealer, state, financing_type, {}
                 FROM monthly_facts WHERE year = ?1
                 ORDER BY month, dealer, state, financing_type",
                COUNT_SELECT
            ))
            .during(op)?;

        let facts = stmt
            .query_map(params![year], |row| {
                Ok(MonthlyDealerFact {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    dealer: row.get(2)?,
                    state: row.get(3)?,
                    financing_type: fi_at(row, 4)?,
                    counts: counts_at(row, 5)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        Ok(facts)
    }

    fn query_month(&self, year: i32, month: u32) -> Result<MonthRecords> {
        let op = "query_month";
        let facts = self
            .query_by_year(year)?
            .into_iter()
            .filter(|f| f.month == month)
            .collect();

        let mut stmt = self
            .conn
            .prepare(
                "SELECT dealer, state, financing_type, loan_amount, apr, fee_pct, ltv
                 FROM funded_deals WHERE year = ?1 AND month = ?2 ORDER BY id",
            )
            .during(op)?;
        let funded = stmt
            .query_map(params![year, month], |row| {
                Ok(FundedDealRecord {
                    dealer: row.get(0)?,
                    state: row.get(1)?,
                    financing_type: fi_at(row, 2)?,
                    year,
                    month,
                    loan_amount: row.get(3)?,
                    apr: row.get(4)?,
                    fee_pct: row.get(5)?,
                    ltv: row.get(6)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT dealer, state, financing_type, ltv
                 FROM approved_deals WHERE year = ?1 AND month = ?2 ORDER BY id",
            )
            .during(op)?;
        let approved = stmt
            .query_map(params![year, month], |row| {
                Ok(ApprovedDealRecord {
                    dealer: row.get(0)?,
                    state: row.get(1)?,
                    financing_type: fi_at(row, 2)?,
                    year,
                    month,
                    ltv: row.get(3)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        Ok(MonthRecords { facts, funded, approved })
    }

    fn replace_year(&self, year: i32, rollups: &YearRollups) -> Result<()> {
        let op = "replace_year";
        let tx = self.conn.unchecked_transaction().during(op)?;

        for table in ["yearly_dealer_totals", "state_monthly", "fi_yearly"] {
            tx.execute(&format!("DELETE FROM {} WHERE year = ?1", table), params![year])
                .during(op)?;
        }

        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO yearly_dealer_totals (year, dealer, state, financing_type, {})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    COUNT_SELECT
                ))
                .during(op)?;
            for r in &rollups.dealers {
                let c = &r.counts;
                stmt.execute(params![
                    year,
                    r.dealer,
                    r.state,
                    r.financing_type.as_str(),
                    c.total_apps,
                    c.approved,
                    c.counter,
                    c.pending,
                    c.denial,
                    c.funded,
                    c.funded_amount,
                ])
                .during(op)?;
            }

            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO state_monthly (year, state, month, {})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    COUNT_SELECT
                ))
                .during(op)?;
            for r in &rollups.state_months {
                let c = &r.counts;
                stmt.execute(params![
                    year,
                    r.state,
                    r.month,
                    c.total_apps,
                    c.approved,
                    c.counter,
                    c.pending,
                    c.denial,
                    c.funded,
                    c.funded_amount,
                ])
                .during(op)?;
            }

            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO fi_yearly (year, financing_type, {})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    COUNT_SELECT
                ))
                .during(op)?;
            for r in &rollups.financing_types {
                let c = &r.counts;
                stmt.execute(params![
                    year,
                    r.financing_type.as_str(),
                    c.total_apps,
                    c.approved,
                    c.counter,
                    c.pending,
                    c.denial,
                    c.funded,
                    c.funded_amount,
                ])
                .during(op)?;
            }
        }

        tx.commit().during(op)
    }

    fn query_rollups(&self, year: i32) -> Result<YearRollups> {
        let op = "query_rollups";

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT dealer, state, financing_type, {} FROM yearly_dealer_totals
                 WHERE year = ?1 ORDER BY dealer, state, financing_type",
                COUNT_SELECT
            ))
            .during(op)?;
        let dealers = stmt
            .query_map(params![year], |row| {
                Ok(YearlyDealerRollup {
                    year,
                    dealer: row.get(0)?,
                    state: row.get(1)?,
                    financing_type: fi_at(row, 2)?,
                    counts: counts_at(row, 3)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT state, month, {} FROM state_monthly
                 WHERE year = ?1 ORDER BY state, month",
                COUNT_SELECT
            ))
            .during(op)?;
        let state_months = stmt
            .query_map(params![year], |row| {
                Ok(StateMonthRollup {
                    year,
                    state: row.get(0)?,
                    month: row.get(1)?,
                    counts: counts_at(row, 2)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT financing_type, {} FROM fi_yearly
                 WHERE year = ?1 ORDER BY financing_type",
                COUNT_SELECT
            ))
            .during(op)?;
        let financing_types = stmt
            .query_map(params![year], |row| {
                Ok(FiYearRollup {
                    year,
                    financing_type: fi_at(row, 0)?,
                    counts: counts_at(row, 1)?,
                })
            })
            .during(op)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .during(op)?;

        Ok(YearRollups {
            year,
            dealers,
            state_months,
            financing_types,
        })
    }

    fn list_years(&self) -> Result<Vec<i32>> {
        let op = "list_years";
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT year FROM monthly_facts ORDER BY year")
            .during(op)?;
        let years = stmt
            .query_map([], |row| row.get(0))
            .during(op)?
            .collect::<rusqlite::Result<Vec<i32>>>()
            .during(op)?;
        Ok(years)
    }

    fn append_events(&self, events: &[Event]) -> Result<()> {
        let tx = self.conn.unchecked_transaction().during("append_events")?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit().during("append_events")
    }
}

impl DealerRegistry for SqliteStore {
    fn list_dealers(&self) -> Result<Vec<CanonicalDealer>> {
        let unavailable = |e: rusqlite::Error| ReconError::RegistryUnavailable(e.to_string());

        let mut stmt = self
            .conn
            .prepare("SELECT id, name, state, financing_type FROM dealers ORDER BY name_key, state")
            .map_err(unavailable)?;
        let dealers = stmt
            .query_map([], |row| {
                Ok(CanonicalDealer {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    state: row.get(2)?,
                    financing_type: fi_at(row, 3)?,
                })
            })
            .map_err(unavailable)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(unavailable)?;
        Ok(dealers)
    }

    fn insert(&self, dealer: &CanonicalDealer) -> Result<CanonicalDealer> {
        let op = "registry insert";
        let now = Utc::now().to_rfc3339();
        let name_key = normalize_name(&dealer.name);
        let state = normalize_state(&dealer.state);

        self.conn
            .execute(
                "INSERT INTO dealers (id, name, name_key, state, financing_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(name_key, state) DO UPDATE SET
                    name = excluded.name,
                    financing_type = excluded.financing_type,
                    updated_at = excluded.updated_at",
                params![
                    dealer.id,
                    dealer.name.trim(),
                    name_key,
                    state,
                    dealer.financing_type.as_str(),
                    now
                ],
            )
            .during(op)?;

        self.find_dealer(&dealer.name, &state)?
            .ok_or_else(|| ReconError::persistence(op, "dealer missing after upsert"))
    }

    fn update(&self, id: &str, dealer: &CanonicalDealer) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE dealers SET name = ?2, name_key = ?3, state = ?4, financing_type = ?5, updated_at = ?6
                 WHERE id = ?1",
                params![
                    id,
                    dealer.name.trim(),
                    normalize_name(&dealer.name),
                    normalize_state(&dealer.state),
                    dealer.financing_type.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )
            .during("registry update")?;
        Ok(changed > 0)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM dealers WHERE id = ?1", params![id])
            .during("registry delete")?;
        Ok(changed > 0)
    }
}

// ============================================================================
// EVENT LOG
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )
    .during("insert event")?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let op = "get events";
    let mut stmt = conn
        .prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC, id DESC",
        )
        .during(op)?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })
        .during(op)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during(op)?;

    Ok(events)
}
