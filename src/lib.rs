pub mod config;
pub mod domain;
pub mod engine;
pub mod orchestration;
pub mod store;
pub mod wallet;

pub use config::Config;
pub use domain::{
    BonusEntry, BonusStatus, BonusType, Decimal, OrderRecord, OrderSubmission, OrganizationNode,
    TimeMs, TreeType, UserId,
};
pub use engine::{BonusEngine, BonusPipeline, OrganizationService, RatePlan};
pub use orchestration::{ClosingEngine, OrderIngestor, RetrySweeper};
pub use store::{init_db, SqliteStore, StoreError};
pub use wallet::{CreditRequest, WalletCreditor};
