//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components call store methods (directly or through the `ApplicationWriter`
//! and `PortfolioSource` seams); they never execute SQL themselves.
//!
//! Row visibility is enforced here, in every query: a tenant scope matches
//! `tenant_id = ?`, the anonymous scope matches `tenant_id IS NULL`. Both are
//! written as `tenant_id IS ?1` with an optional text parameter.

mod application;
mod portfolio;

use crate::{
    error::StoreResult,
    grading::{Decision, RiskGrade},
};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, ToSql,
};

pub struct LoanStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl LoanStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // Memory databases answer with journal_mode=memory; that is not an error.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_millis(250))?;
        Ok(Self { conn, path: Some(path.to_string()) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    /// Open a second connection to the same database, for another worker.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> StoreResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> StoreResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_applications.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_portfolio_stats.sql"))?;
        Ok(())
    }

    /// Cheap liveness probe.
    pub fn is_connected(&self) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

impl ToSql for RiskGrade {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RiskGrade {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for Decision {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Decision {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e: String| FromSqlError::Other(e.into()))
    }
}
