//! Domain types shared by the storage layer and the HTTP application.
//!
//! Nothing in this crate performs I/O: it describes products, policies and
//! their nested coverages and beneficiaries, plus the payload validation that
//! runs before any write reaches the database.

pub mod types;
pub mod validation;

pub use types::{
    Beneficiary, BeneficiaryPatch, CoveragePatch, NewBeneficiary, NewCoverage, NewPolicy,
    NewProduct, Policy, PolicyCoverage, PolicyPatch, PolicyWithCoverages, Product, ProductPatch,
    STATUS_ACTIVE, STATUS_CANCELLED,
};
pub use validation::{Page, ValidationError};
