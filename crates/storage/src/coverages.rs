use policy_svc_core::{CoveragePatch, NewCoverage, PolicyCoverage};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{decimal_text, parse_optional_decimal, ChildError, StorageError};

/// Repository for `policy_coverages`. Every lookup is scoped by policy.
#[derive(Clone)]
pub struct CoverageRepository {
    pool: SqlitePool,
}

impl CoverageRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        policy_id: i64,
        coverage: &NewCoverage,
    ) -> Result<PolicyCoverage, ChildError> {
        let result = sqlx::query(
            "INSERT INTO policy_coverages (policy_id, coverage_type, sum_assured) VALUES (?, ?, ?)",
        )
        .bind(policy_id)
        .bind(&coverage.coverage_type)
        .bind(coverage.sum_assured.map(decimal_text))
        .execute(&mut **tx)
        .await?;

        Ok(PolicyCoverage {
            id: result.last_insert_rowid(),
            policy_id,
            coverage_type: coverage.coverage_type.clone(),
            sum_assured: coverage.sum_assured,
        })
    }

    pub async fn list_for_policy(&self, policy_id: i64) -> Result<Vec<PolicyCoverage>, StorageError> {
        let rows = sqlx::query_as::<_, CoverageRow>(
            "SELECT id, policy_id, coverage_type, sum_assured \
             FROM policy_coverages WHERE policy_id = ? ORDER BY id",
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CoverageRow::into_domain).collect()
    }

    pub async fn fetch(&self, policy_id: i64, id: i64) -> Result<PolicyCoverage, ChildError> {
        let row = sqlx::query_as::<_, CoverageRow>(
            "SELECT id, policy_id, coverage_type, sum_assured \
             FROM policy_coverages WHERE id = ? AND policy_id = ?",
        )
        .bind(id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ChildError::NotFound)?;

        Ok(row.into_domain()?)
    }

    /// Writes the fields set on `patch`; unset fields keep their stored value.
    pub async fn update(
        &self,
        policy_id: i64,
        id: i64,
        patch: &CoveragePatch,
    ) -> Result<PolicyCoverage, ChildError> {
        let row = sqlx::query_as::<_, CoverageRow>(
            "UPDATE policy_coverages \
             SET coverage_type = COALESCE(?, coverage_type), \
                 sum_assured = COALESCE(?, sum_assured) \
             WHERE id = ? AND policy_id = ? \
             RETURNING id, policy_id, coverage_type, sum_assured",
        )
        .bind(&patch.coverage_type)
        .bind(patch.sum_assured.map(decimal_text))
        .bind(id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ChildError::NotFound)?;

        Ok(row.into_domain()?)
    }

    pub async fn delete(&self, policy_id: i64, id: i64) -> Result<(), ChildError> {
        let result = sqlx::query("DELETE FROM policy_coverages WHERE id = ? AND policy_id = ?")
            .bind(id)
            .bind(policy_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ChildError::NotFound);
        }
        Ok(())
    }

    /// Removes every coverage of a policy inside `tx`, returning the count.
    pub async fn delete_for_policy(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        policy_id: i64,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM policy_coverages WHERE policy_id = ?")
            .bind(policy_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CoverageRow {
    id: i64,
    policy_id: i64,
    coverage_type: String,
    sum_assured: Option<String>,
}

impl CoverageRow {
    fn into_domain(self) -> Result<PolicyCoverage, StorageError> {
        Ok(PolicyCoverage {
            sum_assured: parse_optional_decimal("sum_assured", self.sum_assured.as_deref())?,
            id: self.id,
            policy_id: self.policy_id,
            coverage_type: self.coverage_type,
        })
    }
}
