//! Domain primitives: TimeMs, identifier newtypes, tree and status enums.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// This time shifted forward by `ms` milliseconds.
    pub fn plus_millis(&self, ms: i64) -> Self {
        TimeMs(self.0.saturating_add(ms))
    }
}

/// Participant identifier, as supplied by the account system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Create a UserId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Organization tree node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a NodeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Mint a fresh random node id.
    pub fn generate() -> Self {
        NodeId(Uuid::new_v4().to_string())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commerce order identifier (externally supplied, natural key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    /// Create an OrderId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        OrderId(id.into())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bonus entry identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BonusId(pub String);

impl BonusId {
    /// Create a BonusId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        BonusId(id.into())
    }

    /// Mint a fresh random bonus id.
    pub fn generate() -> Self {
        BonusId(Uuid::new_v4().to_string())
    }

    /// Get the id as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BonusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Organization tree flavor. Each participant holds at most one node per tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeType {
    /// Unbounded-fanout referral tree; parent is always the sponsor.
    Unilevel,
    /// Capacity-2 tree with breadth-first spillover placement.
    Binary,
}

impl std::fmt::Display for TreeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeType::Unilevel => write!(f, "unilevel"),
            TreeType::Binary => write!(f, "binary"),
        }
    }
}

impl std::str::FromStr for TreeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unilevel" => Ok(TreeType::Unilevel),
            "binary" => Ok(TreeType::Binary),
            other => Err(format!("unknown tree type: {}", other)),
        }
    }
}

/// Binary child slot position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotPosition {
    L,
    R,
}

impl SlotPosition {
    /// Both positions in fill order.
    pub const ORDERED: [SlotPosition; 2] = [SlotPosition::L, SlotPosition::R];

    /// Get the position as a string reference.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotPosition::L => "L",
            SlotPosition::R => "R",
        }
    }
}

impl std::fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SlotPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "L" => Ok(SlotPosition::L),
            "R" => Ok(SlotPosition::R),
            other => Err(format!("unknown slot position: {}", other)),
        }
    }
}

/// Binary slot occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotStatus {
    Open,
    Filled,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Open => write!(f, "OPEN"),
            SlotStatus::Filled => write!(f, "FILLED"),
        }
    }
}

impl std::str::FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(SlotStatus::Open),
            "FILLED" => Ok(SlotStatus::Filled),
            other => Err(format!("unknown slot status: {}", other)),
        }
    }
}

/// Commission rule family a bonus entry was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusType {
    /// Unilevel ancestor cascade.
    Recommend,
    /// Binary ancestor cascade.
    Sponsor,
    /// Flat self-rebate on the purchase.
    Share,
    /// Flat payout to the handling center owner.
    Center,
    /// Flat payout to the center's referrer.
    CenterReferral,
}

impl std::fmt::Display for BonusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BonusType::Recommend => write!(f, "recommend"),
            BonusType::Sponsor => write!(f, "sponsor"),
            BonusType::Share => write!(f, "share"),
            BonusType::Center => write!(f, "center"),
            BonusType::CenterReferral => write!(f, "center_referral"),
        }
    }
}

impl std::str::FromStr for BonusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recommend" => Ok(BonusType::Recommend),
            "sponsor" => Ok(BonusType::Sponsor),
            "share" => Ok(BonusType::Share),
            "center" => Ok(BonusType::Center),
            "center_referral" => Ok(BonusType::CenterReferral),
            other => Err(format!("unknown bonus type: {}", other)),
        }
    }
}

/// Settlement state of a bonus entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BonusStatus {
    Pending,
    Confirmed,
    Retry,
    Failed,
}

impl std::fmt::Display for BonusStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BonusStatus::Pending => write!(f, "PENDING"),
            BonusStatus::Confirmed => write!(f, "CONFIRMED"),
            BonusStatus::Retry => write!(f, "RETRY"),
            BonusStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for BonusStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(BonusStatus::Pending),
            "CONFIRMED" => Ok(BonusStatus::Confirmed),
            "RETRY" => Ok(BonusStatus::Retry),
            "FAILED" => Ok(BonusStatus::Failed),
            other => Err(format!("unknown bonus status: {}", other)),
        }
    }
}

/// State of a retry-queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for RetryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryStatus::Pending => write!(f, "PENDING"),
            RetryStatus::Processing => write!(f, "PROCESSING"),
            RetryStatus::Completed => write!(f, "COMPLETED"),
            RetryStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for RetryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RetryStatus::Pending),
            "PROCESSING" => Ok(RetryStatus::Processing),
            "COMPLETED" => Ok(RetryStatus::Completed),
            "FAILED" => Ok(RetryStatus::Failed),
            other => Err(format!("unknown retry status: {}", other)),
        }
    }
}

/// Lifecycle of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IdempotencyStatus {
    Pending,
    Succeeded,
    Failed,
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "PENDING"),
            IdempotencyStatus::Succeeded => write!(f, "SUCCEEDED"),
            IdempotencyStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(IdempotencyStatus::Pending),
            "SUCCEEDED" => Ok(IdempotencyStatus::Succeeded),
            "FAILED" => Ok(IdempotencyStatus::Failed),
            other => Err(format!("unknown idempotency status: {}", other)),
        }
    }
}
