use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::{
    BeneficiaryPatch, CoveragePatch, NewBeneficiary, NewCoverage, NewPolicy, NewProduct,
    PolicyPatch, ProductPatch,
};

/// Upper bound accepted for list `limit` parameters.
pub const MAX_PAGE_LIMIT: u32 = 1000;
pub const DEFAULT_PAGE_LIMIT: u32 = 100;

const MAX_PERCENTAGE: Decimal = Decimal::ONE_HUNDRED;

/// Payload rejected before reaching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
    #[error("percentage must be between 0 and 100 (got {0})")]
    Percentage(Decimal),
    #[error("end_date {end} is before start_date {start}")]
    DateOrder { start: NaiveDate, end: NaiveDate },
    #[error("limit must be between 1 and 1000 (got {0})")]
    Limit(u32),
    #[error("coverages[{index}]: {source}")]
    Coverage {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
    #[error("beneficiaries[{index}]: {source}")]
    Beneficiary {
        index: usize,
        #[source]
        source: Box<ValidationError>,
    },
}

/// Limit/offset window for list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Result<Self, ValidationError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(ValidationError::Limit(limit));
        }
        Ok(Self {
            limit,
            offset: offset.unwrap_or(0),
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank { field });
    }
    Ok(())
}

fn optional_text(field: &'static str, value: Option<&str>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |value| require_text(field, value))
}

fn non_negative(field: &'static str, value: Option<Decimal>) -> Result<(), ValidationError> {
    match value {
        Some(value) if value < Decimal::ZERO => Err(ValidationError::Negative { field }),
        _ => Ok(()),
    }
}

fn percentage(value: Option<Decimal>) -> Result<(), ValidationError> {
    match value {
        Some(value) if value < Decimal::ZERO || value > MAX_PERCENTAGE => {
            Err(ValidationError::Percentage(value))
        }
        _ => Ok(()),
    }
}

/// Checks that `end` does not precede `start` when both are known.
pub fn validate_dates(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => Err(ValidationError::DateOrder { start, end }),
        _ => Ok(()),
    }
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("code", &self.code)?;
        require_text("name", &self.name)?;
        non_negative("base_premium", self.base_premium)
    }
}

impl ProductPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        optional_text("name", self.name.as_deref())?;
        non_negative("base_premium", self.base_premium)
    }
}

impl NewCoverage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("coverage_type", &self.coverage_type)?;
        non_negative("sum_assured", self.sum_assured)
    }
}

impl CoveragePatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        optional_text("coverage_type", self.coverage_type.as_deref())?;
        non_negative("sum_assured", self.sum_assured)
    }
}

impl NewBeneficiary {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("full_name", &self.full_name)?;
        require_text("relationship", &self.relationship)?;
        percentage(Some(self.percentage))
    }
}

impl BeneficiaryPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        optional_text("full_name", self.full_name.as_deref())?;
        optional_text("relationship", self.relationship.as_deref())?;
        percentage(self.percentage)
    }
}

impl NewPolicy {
    /// Validates the header and every nested coverage and beneficiary.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("policy_number", &self.policy_number)?;
        require_text("product_id", &self.product_id)?;
        non_negative("sum_insured", self.sum_insured)?;
        non_negative("premium", self.premium)?;
        validate_dates(self.start_date, self.end_date)?;

        for (index, coverage) in self.coverages.iter().enumerate() {
            coverage
                .validate()
                .map_err(|source| ValidationError::Coverage {
                    index,
                    source: Box::new(source),
                })?;
        }
        for (index, beneficiary) in self.beneficiaries.iter().enumerate() {
            beneficiary
                .validate()
                .map_err(|source| ValidationError::Beneficiary {
                    index,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }
}

impl PolicyPatch {
    /// Field-level checks. Date ordering is checked against the merged row.
    pub fn validate(&self) -> Result<(), ValidationError> {
        optional_text("policy_number", self.policy_number.as_deref())?;
        optional_text("product_id", self.product_id.as_deref())?;
        optional_text("status", self.status.as_deref())?;
        non_negative("sum_insured", self.sum_insured)?;
        non_negative("premium", self.premium)
    }
}
