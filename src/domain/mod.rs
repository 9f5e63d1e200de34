//! Domain types for the settlement pipeline.
//!
//! This module provides:
//! - Lossless monetary amounts via the Decimal wrapper
//! - Identifier newtypes and tree/status enums
//! - Organization node, order, bonus, and idempotency records with
//!   canonical JSON serialization for stored metadata

pub mod bonus;
pub mod decimal;
pub mod idempotency;
pub mod node;
pub mod order;
pub mod primitives;

pub use bonus::{BonusEntry, BonusMetadata, BonusRetryRecord};
pub use decimal::Decimal;
pub use idempotency::IdempotencyKey;
pub use node::{BinarySlot, ClosureRow, OrganizationNode, SpilloverLog};
pub use order::{OrderEvent, OrderMetadata, OrderRecord, OrderSubmission};
pub use primitives::{
    BonusId, BonusStatus, BonusType, IdempotencyStatus, NodeId, OrderId, RetryStatus, SlotPosition,
    SlotStatus, TimeMs, TreeType, UserId,
};
