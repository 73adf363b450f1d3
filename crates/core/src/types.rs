use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Status assigned to policies created without an explicit status.
pub const STATUS_ACTIVE: &str = "ACTIVE";
/// Status written by a soft delete.
pub const STATUS_CANCELLED: &str = "CANCELLED";

/// Insurance product identified by its business code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub product_type: Option<String>,
    pub base_premium: Decimal,
}

/// Payload used to register a new product.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewProduct {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub base_premium: Option<Decimal>,
}

impl NewProduct {
    /// Materialises the product, defaulting the premium to zero.
    pub fn into_product(self) -> Product {
        Product {
            code: self.code,
            name: self.name,
            description: self.description,
            product_type: self.product_type,
            base_premium: self.base_premium.unwrap_or(Decimal::ZERO),
        }
    }
}

/// Partial update for a product. The code is immutable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProductPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub base_premium: Option<Decimal>,
}

/// Policy header row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: i64,
    pub policy_number: String,
    pub customer_id: i64,
    /// Business code of the referenced [`Product`].
    pub product_id: String,
    pub agent_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sum_insured: Option<Decimal>,
    pub premium: Option<Decimal>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Policy as exposed on reads: the header plus its coverage lines.
///
/// Beneficiaries are intentionally not embedded; they are only reachable
/// through their own nested resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyWithCoverages {
    #[serde(flatten)]
    pub policy: Policy,
    pub coverages: Vec<PolicyCoverage>,
}

/// Payload used to create a policy together with its nested collections.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPolicy {
    pub policy_number: String,
    pub customer_id: i64,
    pub product_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub sum_insured: Option<Decimal>,
    #[serde(default)]
    pub premium: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub coverages: Vec<NewCoverage>,
    #[serde(default)]
    pub beneficiaries: Vec<NewBeneficiary>,
}

impl NewPolicy {
    /// Returns the requested status or [`STATUS_ACTIVE`].
    pub fn status_or_default(&self) -> &str {
        match self.status.as_deref() {
            Some(status) if !status.trim().is_empty() => status,
            _ => STATUS_ACTIVE,
        }
    }
}

/// Partial update for the policy header.
///
/// A `null` value is treated the same as an omitted field.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PolicyPatch {
    #[serde(default)]
    pub policy_number: Option<String>,
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub sum_insured: Option<Decimal>,
    #[serde(default)]
    pub premium: Option<Decimal>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PolicyPatch {
    /// Returns the new customer id when it differs from the current one.
    pub fn changed_customer(&self, current: &Policy) -> Option<i64> {
        self.customer_id.filter(|id| *id != current.customer_id)
    }

    /// Returns the new product code when it differs from the current one.
    pub fn changed_product(&self, current: &Policy) -> Option<&str> {
        self.product_id
            .as_deref()
            .filter(|code| *code != current.product_id)
    }

    pub fn apply_to(self, policy: &mut Policy) {
        if let Some(policy_number) = self.policy_number {
            policy.policy_number = policy_number;
        }
        if let Some(customer_id) = self.customer_id {
            policy.customer_id = customer_id;
        }
        if let Some(product_id) = self.product_id {
            policy.product_id = product_id;
        }
        if let Some(agent_id) = self.agent_id {
            policy.agent_id = Some(agent_id);
        }
        if let Some(start_date) = self.start_date {
            policy.start_date = Some(start_date);
        }
        if let Some(end_date) = self.end_date {
            policy.end_date = Some(end_date);
        }
        if let Some(sum_insured) = self.sum_insured {
            policy.sum_insured = Some(sum_insured);
        }
        if let Some(premium) = self.premium {
            policy.premium = Some(premium);
        }
        if let Some(status) = self.status {
            policy.status = status;
        }
    }
}

/// Coverage line item owned by a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyCoverage {
    pub id: i64,
    pub policy_id: i64,
    pub coverage_type: String,
    pub sum_assured: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewCoverage {
    pub coverage_type: String,
    #[serde(default)]
    pub sum_assured: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CoveragePatch {
    #[serde(default)]
    pub coverage_type: Option<String>,
    #[serde(default)]
    pub sum_assured: Option<Decimal>,
}

/// Person designated to receive a share of a policy payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: i64,
    pub policy_id: i64,
    pub client_id: i64,
    pub full_name: String,
    pub relationship: String,
    pub percentage: Decimal,
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewBeneficiary {
    pub client_id: i64,
    pub full_name: String,
    pub relationship: String,
    pub percentage: Decimal,
    #[serde(default)]
    pub contact_info: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BeneficiaryPatch {
    #[serde(default)]
    pub client_id: Option<i64>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub percentage: Option<Decimal>,
    #[serde(default)]
    pub contact_info: Option<String>,
}

impl BeneficiaryPatch {
    /// Returns the new client id when it differs from the current one.
    pub fn changed_client(&self, current: &Beneficiary) -> Option<i64> {
        self.client_id.filter(|id| *id != current.client_id)
    }
}
