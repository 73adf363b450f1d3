use chrono::{DateTime, NaiveDate, Utc};
use policy_svc_core::{validation::Page, NewPolicy, Policy, PolicyPatch};
use sqlx::{Sqlite, SqlitePool, Transaction};
use thiserror::Error;

use crate::{decimal_text, is_unique_violation, parse_optional_decimal, to_rfc3339, StorageError};

/// Equality filters applied when listing policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    pub customer_id: Option<i64>,
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub page: Page,
}

/// Repository for the `policies` table.
#[derive(Clone)]
pub struct PolicyRepository {
    pool: SqlitePool,
}

impl PolicyRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the policy header inside `tx` and returns its generated id.
    ///
    /// Nested coverages and beneficiaries are written by their own
    /// repositories within the same transaction.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        policy: &NewPolicy,
        created_at: DateTime<Utc>,
    ) -> Result<i64, PolicyError> {
        let result = sqlx::query(
            "INSERT INTO policies \
             (policy_number, customer_id, product_id, agent_id, start_date, end_date, sum_insured, premium, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.policy_number)
        .bind(policy.customer_id)
        .bind(&policy.product_id)
        .bind(&policy.agent_id)
        .bind(policy.start_date)
        .bind(policy.end_date)
        .bind(policy.sum_insured.map(decimal_text))
        .bind(policy.premium.map(decimal_text))
        .bind(policy.status_or_default())
        .bind(to_rfc3339(created_at))
        .execute(&mut **tx)
        .await
        .map_err(map_write_error)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn fetch(&self, id: i64) -> Result<Policy, PolicyError> {
        let row = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PolicyError::NotFound)?;

        Ok(row.into_domain()?)
    }

    /// Lists policies matching every provided filter, ordered by id.
    pub async fn list(&self, filter: &PolicyFilter) -> Result<Vec<Policy>, StorageError> {
        let rows = sqlx::query_as::<_, PolicyRow>(&format!(
            "SELECT {POLICY_COLUMNS} FROM policies \
             WHERE (?1 IS NULL OR customer_id = ?1) \
               AND (?2 IS NULL OR agent_id = ?2) \
               AND (?3 IS NULL OR status = ?3) \
             ORDER BY id \
             LIMIT ?4 OFFSET ?5"
        ))
        .bind(filter.customer_id)
        .bind(&filter.agent_id)
        .bind(&filter.status)
        .bind(i64::from(filter.page.limit))
        .bind(i64::from(filter.page.offset))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PolicyRow::into_domain).collect()
    }

    /// Writes the fields set on `patch` inside `tx` and returns the merged row.
    ///
    /// Unset fields bind as NULL and keep their stored value, so concurrent
    /// patches to different columns both survive. Callers validate the merged
    /// row before committing.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
        patch: &PolicyPatch,
    ) -> Result<Policy, PolicyError> {
        let row = sqlx::query_as::<_, PolicyRow>(&format!(
            "UPDATE policies \
             SET policy_number = COALESCE(?, policy_number), \
                 customer_id = COALESCE(?, customer_id), \
                 product_id = COALESCE(?, product_id), \
                 agent_id = COALESCE(?, agent_id), \
                 start_date = COALESCE(?, start_date), \
                 end_date = COALESCE(?, end_date), \
                 sum_insured = COALESCE(?, sum_insured), \
                 premium = COALESCE(?, premium), \
                 status = COALESCE(?, status) \
             WHERE id = ? \
             RETURNING {POLICY_COLUMNS}"
        ))
        .bind(&patch.policy_number)
        .bind(patch.customer_id)
        .bind(&patch.product_id)
        .bind(&patch.agent_id)
        .bind(patch.start_date)
        .bind(patch.end_date)
        .bind(patch.sum_insured.map(decimal_text))
        .bind(patch.premium.map(decimal_text))
        .bind(&patch.status)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_write_error)?
        .ok_or(PolicyError::NotFound)?;

        Ok(row.into_domain()?)
    }

    pub async fn set_status(&self, id: i64, status: &str) -> Result<(), PolicyError> {
        let result = sqlx::query("UPDATE policies SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PolicyError::NotFound);
        }
        Ok(())
    }

    /// Deletes the policy header inside `tx`.
    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: i64,
    ) -> Result<(), PolicyError> {
        let result = sqlx::query("DELETE FROM policies WHERE id = ?")
            .bind(id)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PolicyError::NotFound);
        }
        Ok(())
    }
}

const POLICY_COLUMNS: &str = "id, policy_number, customer_id, product_id, agent_id, \
     start_date, end_date, sum_insured, premium, status, created_at";

fn map_write_error(err: sqlx::Error) -> PolicyError {
    if is_unique_violation(&err) {
        PolicyError::DuplicatePolicyNumber
    } else {
        PolicyError::from(err)
    }
}

/// Errors raised by [`PolicyRepository`].
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy not found")]
    NotFound,
    #[error("a policy with the same policy_number already exists")]
    DuplicatePolicyNumber,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for PolicyError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(StorageError::Database(err))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PolicyRow {
    id: i64,
    policy_number: String,
    customer_id: i64,
    product_id: String,
    agent_id: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    sum_insured: Option<String>,
    premium: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl PolicyRow {
    fn into_domain(self) -> Result<Policy, StorageError> {
        Ok(Policy {
            sum_insured: parse_optional_decimal("sum_insured", self.sum_insured.as_deref())?,
            premium: parse_optional_decimal("premium", self.premium.as_deref())?,
            id: self.id,
            policy_number: self.policy_number,
            customer_id: self.customer_id,
            product_id: self.product_id,
            agent_id: self.agent_id,
            start_date: self.start_date,
            end_date: self.end_date,
            status: self.status,
            created_at: self.created_at,
        })
    }
}
