//! Business services: tree placement and rule-driven bonus computation.

pub mod bonus;
pub mod organization;
pub mod rules;

pub use bonus::{BonusEngine, BonusError, BonusPipeline};
pub use organization::{OrganizationError, OrganizationService};
pub use rules::{BonusRule, CascadeRule, FlatBeneficiary, FlatRule, RatePlan};
