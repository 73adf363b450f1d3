use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, SubsecRound, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};

use policy_svc_core::{
    validation::validate_dates, Beneficiary, BeneficiaryPatch, CoveragePatch, NewBeneficiary,
    NewCoverage, NewPolicy, Policy, PolicyCoverage, PolicyPatch, PolicyWithCoverages,
    ValidationError, STATUS_CANCELLED,
};
use policy_svc_customer::{CustomerClient, CustomerLookup};
use policy_svc_storage::{ChildError, Database, PolicyError, PolicyFilter, StorageError};
use sqlx::{Sqlite, Transaction};

use crate::product_service::ProductService;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Orchestrates writes to a policy and its nested coverages and beneficiaries.
///
/// Every write that references a customer first resolves it through the
/// customer service; nothing is persisted unless the customer is found.
/// Multi-row writes run in a single transaction.
#[derive(Clone)]
pub struct PolicyService {
    database: Database,
    products: ProductService,
    customers: CustomerClient,
    clock: Clock,
}

impl PolicyService {
    pub fn new(
        database: Database,
        products: ProductService,
        customers: CustomerClient,
        clock: Clock,
    ) -> Self {
        Self {
            database,
            products,
            customers,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Creates a policy with its coverages and beneficiaries atomically.
    pub async fn create_policy(
        &self,
        payload: NewPolicy,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        let result = self.create_policy_inner(payload).await;
        record_write("policy.create", &result);
        result
    }

    async fn create_policy_inner(
        &self,
        payload: NewPolicy,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        payload.validate()?;
        self.ensure_product(&payload.product_id).await?;
        self.ensure_customer(payload.customer_id).await?;

        let clients: BTreeSet<i64> = payload
            .beneficiaries
            .iter()
            .map(|beneficiary| beneficiary.client_id)
            .collect();
        for client_id in clients {
            self.ensure_customer(client_id).await?;
        }

        let created_at = self.now().trunc_subsecs(3);
        let mut tx = self.database.begin().await?;
        let (policy_id, coverages) =
            match self.insert_policy_rows(&mut tx, &payload, created_at).await {
                Ok(inserted) => inserted,
                Err(err) => {
                    rollback(tx).await;
                    return Err(err);
                }
            };
        tx.commit().await.map_err(StorageError::from)?;

        info!(
            stage = "policy",
            policy_id,
            policy_number = %payload.policy_number,
            coverages = coverages.len(),
            beneficiaries = payload.beneficiaries.len(),
            "policy created"
        );
        let status = payload.status_or_default().to_string();
        let policy = Policy {
            id: policy_id,
            policy_number: payload.policy_number,
            customer_id: payload.customer_id,
            product_id: payload.product_id,
            agent_id: payload.agent_id,
            start_date: payload.start_date,
            end_date: payload.end_date,
            sum_insured: payload.sum_insured,
            premium: payload.premium,
            status,
            created_at,
        };
        Ok(PolicyWithCoverages { policy, coverages })
    }

    /// Returns the new policy id and the inserted coverages.
    async fn insert_policy_rows(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        payload: &NewPolicy,
        created_at: DateTime<Utc>,
    ) -> Result<(i64, Vec<PolicyCoverage>), PolicyServiceError> {
        let policy_id = self
            .database
            .policies()
            .insert(tx, payload, created_at)
            .await
            .map_err(|err| PolicyServiceError::from_policy(err, 0, &payload.policy_number))?;

        let repo = self.database.coverages();
        let mut coverages = Vec::with_capacity(payload.coverages.len());
        for coverage in &payload.coverages {
            let inserted = repo
                .insert(tx, policy_id, coverage)
                .await
                .map_err(|err| PolicyServiceError::from_coverage(err, policy_id, 0))?;
            coverages.push(inserted);
        }
        let beneficiaries = self.database.beneficiaries();
        for beneficiary in &payload.beneficiaries {
            beneficiaries
                .insert(tx, policy_id, beneficiary)
                .await
                .map_err(|err| PolicyServiceError::from_beneficiary(err, policy_id, 0))?;
        }
        Ok((policy_id, coverages))
    }

    pub async fn get_policy(
        &self,
        policy_id: i64,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        let policy = self.fetch_policy(policy_id).await?;
        self.with_coverages(policy).await
    }

    pub async fn list_policies(
        &self,
        filter: &PolicyFilter,
    ) -> Result<Vec<PolicyWithCoverages>, PolicyServiceError> {
        let policies = self.database.policies().list(filter).await?;
        let mut result = Vec::with_capacity(policies.len());
        for policy in policies {
            result.push(self.with_coverages(policy).await?);
        }
        Ok(result)
    }

    /// Applies a partial update to the policy header.
    ///
    /// Changing `product_id` or `customer_id` re-runs the matching existence
    /// check before anything is written.
    pub async fn update_policy(
        &self,
        policy_id: i64,
        patch: PolicyPatch,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        let result = self.update_policy_inner(policy_id, patch).await;
        record_write("policy.update", &result);
        result
    }

    async fn update_policy_inner(
        &self,
        policy_id: i64,
        patch: PolicyPatch,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        patch.validate()?;
        let current = self.fetch_policy(policy_id).await?;
        let mut merged = current.clone();
        patch.clone().apply_to(&mut merged);
        validate_dates(merged.start_date, merged.end_date)?;

        if let Some(code) = patch.changed_product(&current) {
            self.ensure_product(code).await?;
        }
        if let Some(customer_id) = patch.changed_customer(&current) {
            self.ensure_customer(customer_id).await?;
        }

        let mut tx = self.database.begin().await?;
        let policy = match self
            .write_policy_patch(&mut tx, policy_id, &patch, &merged.policy_number)
            .await
        {
            Ok(policy) => policy,
            Err(err) => {
                rollback(tx).await;
                return Err(err);
            }
        };
        tx.commit().await.map_err(StorageError::from)?;

        info!(stage = "policy", policy_id, status = %policy.status, "policy updated");
        self.with_coverages(policy).await
    }

    /// Dates are checked again on the row as written, since another patch may
    /// have committed while the references were being resolved.
    async fn write_policy_patch(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        policy_id: i64,
        patch: &PolicyPatch,
        policy_number: &str,
    ) -> Result<Policy, PolicyServiceError> {
        let policy = self
            .database
            .policies()
            .update(tx, policy_id, patch)
            .await
            .map_err(|err| PolicyServiceError::from_policy(err, policy_id, policy_number))?;
        validate_dates(policy.start_date, policy.end_date)?;
        Ok(policy)
    }

    /// Cancels the policy, or removes it with all children when `hard` is set.
    pub async fn delete_policy(&self, policy_id: i64, hard: bool) -> Result<(), PolicyServiceError> {
        let result = if hard {
            self.purge_policy(policy_id).await
        } else {
            self.database
                .policies()
                .set_status(policy_id, STATUS_CANCELLED)
                .await
                .map_err(|err| PolicyServiceError::from_policy(err, policy_id, ""))
        };
        record_write(
            if hard { "policy.delete" } else { "policy.cancel" },
            &result,
        );
        result?;

        info!(stage = "policy", policy_id, hard, "policy removed");
        Ok(())
    }

    async fn purge_policy(&self, policy_id: i64) -> Result<(), PolicyServiceError> {
        let mut tx = self.database.begin().await?;
        let removed = match self.delete_policy_rows(&mut tx, policy_id).await {
            Ok(removed) => removed,
            Err(err) => {
                rollback(tx).await;
                return Err(err);
            }
        };
        tx.commit().await.map_err(StorageError::from)?;

        info!(
            stage = "policy",
            policy_id,
            coverages = removed.0,
            beneficiaries = removed.1,
            "policy purged with children"
        );
        Ok(())
    }

    /// Returns the number of coverage and beneficiary rows removed.
    async fn delete_policy_rows(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        policy_id: i64,
    ) -> Result<(u64, u64), PolicyServiceError> {
        let coverages = self
            .database
            .coverages()
            .delete_for_policy(tx, policy_id)
            .await?;
        let beneficiaries = self
            .database
            .beneficiaries()
            .delete_for_policy(tx, policy_id)
            .await?;
        self.database
            .policies()
            .delete(tx, policy_id)
            .await
            .map_err(|err| PolicyServiceError::from_policy(err, policy_id, ""))?;
        Ok((coverages, beneficiaries))
    }

    pub async fn list_coverages(
        &self,
        policy_id: i64,
    ) -> Result<Vec<PolicyCoverage>, PolicyServiceError> {
        self.fetch_policy(policy_id).await?;
        Ok(self.database.coverages().list_for_policy(policy_id).await?)
    }

    pub async fn get_coverage(
        &self,
        policy_id: i64,
        coverage_id: i64,
    ) -> Result<PolicyCoverage, PolicyServiceError> {
        self.fetch_policy(policy_id).await?;
        self.database
            .coverages()
            .fetch(policy_id, coverage_id)
            .await
            .map_err(|err| PolicyServiceError::from_coverage(err, policy_id, coverage_id))
    }

    pub async fn add_coverage(
        &self,
        policy_id: i64,
        payload: NewCoverage,
    ) -> Result<PolicyCoverage, PolicyServiceError> {
        let result = async {
            payload.validate()?;
            self.fetch_policy(policy_id).await?;

            let mut tx = self.database.begin().await?;
            let coverage = self
                .database
                .coverages()
                .insert(&mut tx, policy_id, &payload)
                .await
                .map_err(|err| PolicyServiceError::from_coverage(err, policy_id, 0))?;
            tx.commit().await.map_err(StorageError::from)?;
            Ok::<_, PolicyServiceError>(coverage)
        }
        .await;
        record_write("coverage.create", &result);
        result
    }

    pub async fn update_coverage(
        &self,
        policy_id: i64,
        coverage_id: i64,
        patch: CoveragePatch,
    ) -> Result<PolicyCoverage, PolicyServiceError> {
        let result = async {
            patch.validate()?;
            self.fetch_policy(policy_id).await?;
            self.database
                .coverages()
                .update(policy_id, coverage_id, &patch)
                .await
                .map_err(|err| PolicyServiceError::from_coverage(err, policy_id, coverage_id))
        }
        .await;
        record_write("coverage.update", &result);
        result
    }

    pub async fn remove_coverage(
        &self,
        policy_id: i64,
        coverage_id: i64,
    ) -> Result<(), PolicyServiceError> {
        let result = async {
            self.fetch_policy(policy_id).await?;
            self.database
                .coverages()
                .delete(policy_id, coverage_id)
                .await
                .map_err(|err| PolicyServiceError::from_coverage(err, policy_id, coverage_id))
        }
        .await;
        record_write("coverage.delete", &result);
        result
    }

    pub async fn list_beneficiaries(
        &self,
        policy_id: i64,
    ) -> Result<Vec<Beneficiary>, PolicyServiceError> {
        self.fetch_policy(policy_id).await?;
        Ok(self
            .database
            .beneficiaries()
            .list_for_policy(policy_id)
            .await?)
    }

    pub async fn get_beneficiary(
        &self,
        policy_id: i64,
        beneficiary_id: i64,
    ) -> Result<Beneficiary, PolicyServiceError> {
        self.fetch_policy(policy_id).await?;
        self.database
            .beneficiaries()
            .fetch(policy_id, beneficiary_id)
            .await
            .map_err(|err| PolicyServiceError::from_beneficiary(err, policy_id, beneficiary_id))
    }

    pub async fn add_beneficiary(
        &self,
        policy_id: i64,
        payload: NewBeneficiary,
    ) -> Result<Beneficiary, PolicyServiceError> {
        let result = async {
            payload.validate()?;
            self.fetch_policy(policy_id).await?;
            self.ensure_customer(payload.client_id).await?;

            let mut tx = self.database.begin().await?;
            let beneficiary = self
                .database
                .beneficiaries()
                .insert(&mut tx, policy_id, &payload)
                .await
                .map_err(|err| PolicyServiceError::from_beneficiary(err, policy_id, 0))?;
            tx.commit().await.map_err(StorageError::from)?;
            Ok::<_, PolicyServiceError>(beneficiary)
        }
        .await;
        record_write("beneficiary.create", &result);
        result
    }

    pub async fn update_beneficiary(
        &self,
        policy_id: i64,
        beneficiary_id: i64,
        patch: BeneficiaryPatch,
    ) -> Result<Beneficiary, PolicyServiceError> {
        let result = async {
            patch.validate()?;
            let current = self.get_beneficiary(policy_id, beneficiary_id).await?;
            if let Some(client_id) = patch.changed_client(&current) {
                self.ensure_customer(client_id).await?;
            }
            self.database
                .beneficiaries()
                .update(policy_id, beneficiary_id, &patch)
                .await
                .map_err(|err| PolicyServiceError::from_beneficiary(err, policy_id, beneficiary_id))
        }
        .await;
        record_write("beneficiary.update", &result);
        result
    }

    pub async fn remove_beneficiary(
        &self,
        policy_id: i64,
        beneficiary_id: i64,
    ) -> Result<(), PolicyServiceError> {
        let result = async {
            self.fetch_policy(policy_id).await?;
            self.database
                .beneficiaries()
                .delete(policy_id, beneficiary_id)
                .await
                .map_err(|err| PolicyServiceError::from_beneficiary(err, policy_id, beneficiary_id))
        }
        .await;
        record_write("beneficiary.delete", &result);
        result
    }

    async fn fetch_policy(&self, policy_id: i64) -> Result<Policy, PolicyServiceError> {
        self.database
            .policies()
            .fetch(policy_id)
            .await
            .map_err(|err| PolicyServiceError::from_policy(err, policy_id, ""))
    }

    async fn with_coverages(
        &self,
        policy: Policy,
    ) -> Result<PolicyWithCoverages, PolicyServiceError> {
        let coverages = self.database.coverages().list_for_policy(policy.id).await?;
        Ok(PolicyWithCoverages { policy, coverages })
    }

    async fn ensure_product(&self, code: &str) -> Result<(), PolicyServiceError> {
        if self.products.exists(code).await? {
            return Ok(());
        }
        Err(PolicyServiceError::ProductNotFound(code.to_string()))
    }

    async fn ensure_customer(&self, customer_id: i64) -> Result<(), PolicyServiceError> {
        match self.customers.lookup(customer_id).await {
            CustomerLookup::Found(_) => Ok(()),
            CustomerLookup::NotFound => Err(PolicyServiceError::CustomerNotFound(customer_id)),
            CustomerLookup::Unavailable => {
                warn!(
                    stage = "policy",
                    customer_id, "rejecting write: customer service unavailable"
                );
                Err(PolicyServiceError::CustomerUnavailable(customer_id))
            }
        }
    }
}

async fn rollback(tx: Transaction<'static, Sqlite>) {
    if let Err(err) = tx.rollback().await {
        warn!(stage = "policy", error = %err, "transaction rollback failed");
    }
}

fn record_write<T>(op: &'static str, result: &Result<T, PolicyServiceError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(PolicyServiceError::Storage(_)) => "error",
        Err(PolicyServiceError::CustomerUnavailable(_)) => "unavailable",
        Err(_) => "rejected",
    };
    counter!("policy_writes_total", "op" => op, "result" => outcome).increment(1);
}

#[derive(Debug, Error)]
pub enum PolicyServiceError {
    #[error("policy {0} not found")]
    PolicyNotFound(i64),
    #[error("coverage {coverage_id} not found for policy {policy_id}")]
    CoverageNotFound { policy_id: i64, coverage_id: i64 },
    #[error("beneficiary {beneficiary_id} not found for policy {policy_id}")]
    BeneficiaryNotFound {
        policy_id: i64,
        beneficiary_id: i64,
    },
    #[error("product {0} not found")]
    ProductNotFound(String),
    #[error("customer {0} not found")]
    CustomerNotFound(i64),
    #[error("customer service unavailable while validating customer {0}")]
    CustomerUnavailable(i64),
    #[error("policy_number {0} already exists")]
    DuplicatePolicyNumber(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PolicyServiceError {
    fn from_policy(err: PolicyError, policy_id: i64, policy_number: &str) -> Self {
        match err {
            PolicyError::NotFound => Self::PolicyNotFound(policy_id),
            PolicyError::DuplicatePolicyNumber => {
                Self::DuplicatePolicyNumber(policy_number.to_string())
            }
            PolicyError::Storage(err) => Self::Storage(err),
        }
    }

    fn from_coverage(err: ChildError, policy_id: i64, coverage_id: i64) -> Self {
        match err {
            ChildError::NotFound => Self::CoverageNotFound {
                policy_id,
                coverage_id,
            },
            ChildError::MissingPolicy => Self::PolicyNotFound(policy_id),
            ChildError::Storage(err) => Self::Storage(err),
        }
    }

    fn from_beneficiary(err: ChildError, policy_id: i64, beneficiary_id: i64) -> Self {
        match err {
            ChildError::NotFound => Self::BeneficiaryNotFound {
                policy_id,
                beneficiary_id,
            },
            ChildError::MissingPolicy => Self::PolicyNotFound(policy_id),
            ChildError::Storage(err) => Self::Storage(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        beneficiary_payload, coverage_payload, mock_customer, policy_payload, seed_product,
        service_for, setup_database,
    };
    use std::time::Duration;

    use chrono::NaiveDate;
    use httpmock::prelude::*;
    use policy_svc_core::STATUS_ACTIVE;
    use rust_decimal::Decimal;
    use serde_json::json;
    use sqlx::query_scalar;

    async fn count(database: &Database, table: &str) -> i64 {
        query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(database.pool())
            .await
            .expect("count")
    }

    #[tokio::test]
    async fn create_persists_policy_with_nested_collections() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        mock_customer(&server, 20, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload("DEATH"), coverage_payload("DISABILITY")];
        payload.beneficiaries = vec![beneficiary_payload(20, 60), beneficiary_payload(20, 40)];

        let created = service.create_policy(payload).await.expect("create");
        assert_eq!(created.policy.status, STATUS_ACTIVE);
        assert_eq!(created.coverages.len(), 2);
        assert!(created
            .coverages
            .iter()
            .all(|coverage| coverage.policy_id == created.policy.id));

        let beneficiaries = service
            .list_beneficiaries(created.policy.id)
            .await
            .expect("beneficiaries");
        assert_eq!(beneficiaries.len(), 2);
    }

    #[tokio::test]
    async fn missing_product_blocks_creation() {
        let server = MockServer::start_async().await;
        let customer = mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        let service = service_for(&database, &server);

        let err = service
            .create_policy(policy_payload("POL-1", 10, "NOPE"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::ProductNotFound(code) if code == "NOPE"));
        assert_eq!(customer.hits_async().await, 0);
        assert_eq!(count(&database, "policies").await, 0);
    }

    #[tokio::test]
    async fn unknown_customer_blocks_creation() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 404).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let err = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerNotFound(10)));
        assert_eq!(count(&database, "policies").await, 0);
    }

    #[tokio::test]
    async fn unavailable_customer_service_blocks_creation() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 503).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload("DEATH")];
        let err = service.create_policy(payload).await.unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerUnavailable(10)));
        assert_eq!(count(&database, "policies").await, 0);
        assert_eq!(count(&database, "policy_coverages").await, 0);
    }

    #[tokio::test]
    async fn unknown_beneficiary_client_blocks_creation() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        mock_customer(&server, 99, 404).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.beneficiaries = vec![beneficiary_payload(99, 100)];
        let err = service.create_policy(payload).await.unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerNotFound(99)));
        assert_eq!(count(&database, "policies").await, 0);
    }

    #[tokio::test]
    async fn duplicate_policy_number_rolls_back_nested_rows() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("first create");

        let mut duplicate = policy_payload("POL-1", 10, "LIFE-01");
        duplicate.coverages = vec![coverage_payload("DEATH")];
        let err = service.create_policy(duplicate).await.unwrap_err();
        assert!(matches!(err, PolicyServiceError::DuplicatePolicyNumber(number) if number == "POL-1"));
        assert_eq!(count(&database, "policies").await, 1);
        assert_eq!(count(&database, "policy_coverages").await, 0);
    }

    #[tokio::test]
    async fn invalid_nested_coverage_is_rejected_before_lookups() {
        let server = MockServer::start_async().await;
        let customer = mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload(" ")];
        let err = service.create_policy(payload).await.unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::Validation(ValidationError::Coverage { index: 0, .. })
        ));
        assert_eq!(customer.hits_async().await, 0);
    }

    #[tokio::test]
    async fn soft_delete_cancels_and_hard_delete_purges_children() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload("DEATH")];
        payload.beneficiaries = vec![beneficiary_payload(10, 100)];
        let id = service.create_policy(payload).await.expect("create").policy.id;

        service.delete_policy(id, false).await.expect("cancel");
        let cancelled = service.get_policy(id).await.expect("still readable");
        assert_eq!(cancelled.policy.status, STATUS_CANCELLED);
        assert_eq!(cancelled.coverages.len(), 1);

        service.delete_policy(id, true).await.expect("purge");
        assert!(matches!(
            service.get_policy(id).await,
            Err(PolicyServiceError::PolicyNotFound(missing)) if missing == id
        ));
        assert_eq!(count(&database, "policy_coverages").await, 0);
        assert_eq!(count(&database, "beneficiaries").await, 0);

        assert!(matches!(
            service.delete_policy(id, true).await,
            Err(PolicyServiceError::PolicyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_revalidates_changed_references() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let unknown = mock_customer(&server, 11, 404).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        seed_product(&database, "LIFE-02").await;
        let service = service_for(&database, &server);
        let id = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("create")
            .policy
            .id;

        let err = service
            .update_policy(
                id,
                PolicyPatch {
                    customer_id: Some(11),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerNotFound(11)));
        assert_eq!(unknown.hits_async().await, 1);

        let err = service
            .update_policy(
                id,
                PolicyPatch {
                    product_id: Some("MISSING".to_string()),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::ProductNotFound(_)));

        let updated = service
            .update_policy(
                id,
                PolicyPatch {
                    product_id: Some("LIFE-02".to_string()),
                    agent_id: Some("AG-1".to_string()),
                    ..PolicyPatch::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.policy.product_id, "LIFE-02");
        assert_eq!(updated.policy.agent_id.as_deref(), Some("AG-1"));
        assert_eq!(updated.policy.customer_id, 10);
    }

    #[tokio::test]
    async fn update_checks_date_order_against_stored_values() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.start_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        let id = service.create_policy(payload).await.expect("create").policy.id;

        let err = service
            .update_policy(
                id,
                PolicyPatch {
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::Validation(ValidationError::DateOrder { .. })
        ));
    }

    #[tokio::test]
    async fn inverted_dates_are_rejected_before_reference_lookups() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let unavailable = mock_customer(&server, 12, 503).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.start_date = NaiveDate::from_ymd_opt(2024, 6, 1);
        let id = service.create_policy(payload).await.expect("create").policy.id;

        let err = service
            .update_policy(
                id,
                PolicyPatch {
                    customer_id: Some(12),
                    product_id: Some("MISSING".to_string()),
                    end_date: NaiveDate::from_ymd_opt(2024, 1, 1),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::Validation(ValidationError::DateOrder { .. })
        ));
        assert_eq!(unavailable.hits_async().await, 0);
    }

    #[tokio::test]
    async fn update_with_unavailable_customer_service_leaves_row_unchanged() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let unavailable = mock_customer(&server, 13, 503).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);
        let created = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("create");

        let err = service
            .update_policy(
                created.policy.id,
                PolicyPatch {
                    customer_id: Some(13),
                    premium: Some(Decimal::new(50000, 2)),
                    ..PolicyPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerUnavailable(13)));
        assert_eq!(unavailable.hits_async().await, 1);

        let stored = service.get_policy(created.policy.id).await.expect("get");
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn concurrent_patches_to_different_fields_both_persist() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/customers/11");
                then.status(200)
                    .delay(Duration::from_millis(300))
                    .json_body(json!({ "id": 11, "full_name": "Slow Customer" }));
            })
            .await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);
        let id = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("create")
            .policy
            .id;

        let reassign = service.update_policy(
            id,
            PolicyPatch {
                customer_id: Some(11),
                ..PolicyPatch::default()
            },
        );
        let reprice = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            service
                .update_policy(
                    id,
                    PolicyPatch {
                        premium: Some(Decimal::new(99900, 2)),
                        ..PolicyPatch::default()
                    },
                )
                .await
        };
        let (reassigned, repriced) = tokio::join!(reassign, reprice);
        reassigned.expect("reassign");
        repriced.expect("reprice");

        let stored = service.get_policy(id).await.expect("get").policy;
        assert_eq!(stored.customer_id, 11);
        assert_eq!(stored.premium, Some(Decimal::new(99900, 2)));
    }

    #[tokio::test]
    async fn create_returns_the_row_as_stored() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server).with_clock(Arc::new(|| {
            DateTime::parse_from_rfc3339("2024-03-01T12:00:00.123456789Z")
                .expect("timestamp")
                .with_timezone(&Utc)
        }));

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload("DEATH"), coverage_payload("DISABILITY")];
        payload.status = Some("PENDING".to_string());
        let created = service.create_policy(payload).await.expect("create");

        assert_eq!(created.policy.created_at.timestamp_subsec_millis(), 123);
        assert_eq!(created.policy.created_at.timestamp_subsec_nanos(), 123_000_000);
        let fetched = service.get_policy(created.policy.id).await.expect("get");
        assert_eq!(created, fetched);
    }

    #[tokio::test]
    async fn children_are_scoped_to_their_policy() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);
        let first = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("create")
            .policy
            .id;
        let second = service
            .create_policy(policy_payload("POL-2", 10, "LIFE-01"))
            .await
            .expect("create")
            .policy
            .id;

        let coverage = service
            .add_coverage(first, coverage_payload("DEATH"))
            .await
            .expect("add coverage");
        let err = service
            .get_coverage(second, coverage.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PolicyServiceError::CoverageNotFound { policy_id, coverage_id }
                if policy_id == second && coverage_id == coverage.id
        ));

        let err = service
            .add_coverage(404, coverage_payload("DEATH"))
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::PolicyNotFound(404)));

        let updated = service
            .update_coverage(
                first,
                coverage.id,
                CoveragePatch {
                    coverage_type: Some("ACCIDENT".to_string()),
                    ..CoveragePatch::default()
                },
            )
            .await
            .expect("update coverage");
        assert_eq!(updated.coverage_type, "ACCIDENT");

        service
            .remove_coverage(first, coverage.id)
            .await
            .expect("remove");
        assert!(service
            .list_coverages(first)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn beneficiary_writes_validate_client() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        mock_customer(&server, 30, 200).await;
        mock_customer(&server, 31, 503).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);
        let id = service
            .create_policy(policy_payload("POL-1", 10, "LIFE-01"))
            .await
            .expect("create")
            .policy
            .id;

        let beneficiary = service
            .add_beneficiary(id, beneficiary_payload(30, 50))
            .await
            .expect("add");
        assert_eq!(beneficiary.policy_id, id);

        let err = service
            .update_beneficiary(
                id,
                beneficiary.id,
                BeneficiaryPatch {
                    client_id: Some(31),
                    ..BeneficiaryPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyServiceError::CustomerUnavailable(31)));

        let unchanged = service
            .get_beneficiary(id, beneficiary.id)
            .await
            .expect("get");
        assert_eq!(unchanged.client_id, 30);

        service
            .remove_beneficiary(id, beneficiary.id)
            .await
            .expect("remove");
        assert!(matches!(
            service.remove_beneficiary(id, beneficiary.id).await,
            Err(PolicyServiceError::BeneficiaryNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_embeds_coverages_and_filters() {
        let server = MockServer::start_async().await;
        mock_customer(&server, 10, 200).await;
        mock_customer(&server, 20, 200).await;
        let database = setup_database().await;
        seed_product(&database, "LIFE-01").await;
        let service = service_for(&database, &server);

        let mut payload = policy_payload("POL-1", 10, "LIFE-01");
        payload.coverages = vec![coverage_payload("DEATH")];
        service.create_policy(payload).await.expect("create");
        service
            .create_policy(policy_payload("POL-2", 20, "LIFE-01"))
            .await
            .expect("create");

        let listed = service
            .list_policies(&PolicyFilter {
                customer_id: Some(10),
                ..PolicyFilter::default()
            })
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].coverages.len(), 1);
    }
}
