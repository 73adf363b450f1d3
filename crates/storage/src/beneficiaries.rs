use policy_svc_core::{Beneficiary, BeneficiaryPatch, NewBeneficiary};
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::{decimal_text, parse_decimal, ChildError, StorageError};

/// Repository for `beneficiaries`. Every lookup is scoped by policy.
#[derive(Clone)]
pub struct BeneficiaryRepository {
    pool: SqlitePool,
}

const BENEFICIARY_COLUMNS: &str =
    "id, policy_id, client_id, full_name, relationship, percentage, contact_info";

impl BeneficiaryRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        policy_id: i64,
        beneficiary: &NewBeneficiary,
    ) -> Result<Beneficiary, ChildError> {
        let result = sqlx::query(
            "INSERT INTO beneficiaries \
             (policy_id, client_id, full_name, relationship, percentage, contact_info) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(policy_id)
        .bind(beneficiary.client_id)
        .bind(&beneficiary.full_name)
        .bind(&beneficiary.relationship)
        .bind(decimal_text(beneficiary.percentage))
        .bind(&beneficiary.contact_info)
        .execute(&mut **tx)
        .await?;

        Ok(Beneficiary {
            id: result.last_insert_rowid(),
            policy_id,
            client_id: beneficiary.client_id,
            full_name: beneficiary.full_name.clone(),
            relationship: beneficiary.relationship.clone(),
            percentage: beneficiary.percentage,
            contact_info: beneficiary.contact_info.clone(),
        })
    }

    pub async fn list_for_policy(&self, policy_id: i64) -> Result<Vec<Beneficiary>, StorageError> {
        let rows = sqlx::query_as::<_, BeneficiaryRow>(&format!(
            "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries WHERE policy_id = ? ORDER BY id"
        ))
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BeneficiaryRow::into_domain).collect()
    }

    pub async fn fetch(&self, policy_id: i64, id: i64) -> Result<Beneficiary, ChildError> {
        let row = sqlx::query_as::<_, BeneficiaryRow>(&format!(
            "SELECT {BENEFICIARY_COLUMNS} FROM beneficiaries WHERE id = ? AND policy_id = ?"
        ))
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
        patch: &BeneficiaryPatch,
    ) -> Result<Beneficiary, ChildError> {
        let row = sqlx::query_as::<_, BeneficiaryRow>(&format!(
            "UPDATE beneficiaries \
             SET client_id = COALESCE(?, client_id), \
                 full_name = COALESCE(?, full_name), \
                 relationship = COALESCE(?, relationship), \
                 percentage = COALESCE(?, percentage), \
                 contact_info = COALESCE(?, contact_info) \
             WHERE id = ? AND policy_id = ? \
             RETURNING {BENEFICIARY_COLUMNS}"
        ))
        .bind(patch.client_id)
        .bind(&patch.full_name)
        .bind(&patch.relationship)
        .bind(patch.percentage.map(decimal_text))
        .bind(&patch.contact_info)
        .bind(id)
        .bind(policy_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ChildError::NotFound)?;

        Ok(row.into_domain()?)
    }

    pub async fn delete(&self, policy_id: i64, id: i64) -> Result<(), ChildError> {
        let result = sqlx::query("DELETE FROM beneficiaries WHERE id = ? AND policy_id = ?")
            .bind(id)
            .bind(policy_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ChildError::NotFound);
        }
        Ok(())
    }

    /// Removes every beneficiary of a policy inside `tx`, returning the count.
    pub async fn delete_for_policy(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        policy_id: i64,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM beneficiaries WHERE policy_id = ?")
            .bind(policy_id)
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BeneficiaryRow {
    id: i64,
    policy_id: i64,
    client_id: i64,
    full_name: String,
    relationship: String,
    percentage: String,
    contact_info: Option<String>,
}

impl BeneficiaryRow {
    fn into_domain(self) -> Result<Beneficiary, StorageError> {
        Ok(Beneficiary {
            percentage: parse_decimal("percentage", &self.percentage)?,
            id: self.id,
            policy_id: self.policy_id,
            client_id: self.client_id,
            full_name: self.full_name,
            relationship: self.relationship,
            contact_info: self.contact_info,
        })
    }
}
