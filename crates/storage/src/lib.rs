use std::{borrow::Cow, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::{
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;

mod beneficiaries;
mod coverages;
mod policies;
mod products;

pub use beneficiaries::BeneficiaryRepository;
pub use coverages::CoverageRepository;
pub use policies::{PolicyError, PolicyFilter, PolicyRepository};
pub use products::{ProductError, ProductRepository};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    ///
    /// Foreign keys are enabled on every connection so child rows cascade
    /// with their policy.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StorageError::Connect)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(StorageError::Connect)?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a transaction spanning several repositories.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, StorageError> {
        Ok(self.pool.begin().await?)
    }

    pub fn products(&self) -> ProductRepository {
        ProductRepository::new(self.pool.clone())
    }

    pub fn policies(&self) -> PolicyRepository {
        PolicyRepository::new(self.pool.clone())
    }

    pub fn coverages(&self) -> CoverageRepository {
        CoverageRepository::new(self.pool.clone())
    }

    pub fn beneficiaries(&self) -> BeneficiaryRepository {
        BeneficiaryRepository::new(self.pool.clone())
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("invalid decimal stored in {column}: {value}")]
    Decode { column: &'static str, value: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors raised by the coverage and beneficiary repositories.
#[derive(Debug, Error)]
pub enum ChildError {
    #[error("record not found for policy")]
    NotFound,
    #[error("parent policy does not exist")]
    MissingPolicy,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for ChildError {
    fn from(err: sqlx::Error) -> Self {
        if constraint_code(&err).as_deref() == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
            return Self::MissingPolicy;
        }
        Self::Storage(StorageError::Database(err))
    }
}

const SQLITE_CONSTRAINT_FOREIGNKEY: &str = "787";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

fn constraint_code(err: &sqlx::Error) -> Option<Cow<'_, str>> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code(),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        constraint_code(err).as_deref(),
        Some(SQLITE_CONSTRAINT_UNIQUE) | Some(SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decimal_text(value: Decimal) -> String {
    value.to_string()
}

fn parse_decimal(column: &'static str, raw: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(raw).map_err(|_| StorageError::Decode {
        column,
        value: raw.to_string(),
    })
}

fn parse_optional_decimal(
    column: &'static str,
    raw: Option<&str>,
) -> Result<Option<Decimal>, StorageError> {
    raw.map(|value| parse_decimal(column, value)).transpose()
}


#[cfg(test)]
mod tests {
    use super::test_support::setup_db;
    use super::*;

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('products', 'policies', 'policy_coverages', 'beneficiaries')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 4, "expected core tables to be created");
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let db = setup_db().await;
        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(db.pool())
            .await
            .expect("pragma");
        assert_eq!(enabled, 1);
    }

    #[test]
    fn decimal_text_keeps_scale_and_parses_back() {
        let value = Decimal::new(125000, 2);
        let text = decimal_text(value);
        assert_eq!(text, "1250.00");
        assert_eq!(parse_decimal("premium", &text).expect("parse"), value);
    }

    #[test]
    fn parse_decimal_reports_column() {
        let err = parse_decimal("premium", "abc").expect_err("invalid decimal");
        assert!(matches!(err, StorageError::Decode { column: "premium", .. }));
    }
}
