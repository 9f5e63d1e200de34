//! Order-driven bonus computation.
//!
//! [`BonusEngine`] applies a [`RatePlan`] to one paid order: each cascade
//! rule walks the purchaser's ancestor chain in its tree, each flat rule
//! pays a single participant a percentage of the order total. Every entry
//! an order produces is persisted PENDING in one batch, so a crash between
//! computation and settlement can never leave a partial fan-out behind.

use crate::domain::{BonusEntry, BonusMetadata, OrderEvent, OrganizationNode, TimeMs};
use crate::engine::rules::{BonusRule, CascadeRule, FlatBeneficiary, FlatRule, RatePlan};
use crate::store::{BonusRepository, OrganizationRepository, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BonusError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Computes and persists bonus entries for paid orders.
#[async_trait]
pub trait BonusPipeline: Send + Sync + fmt::Debug {
    /// Apply every configured rule to one order. Returns the entries it
    /// created, already persisted; a storage failure persists none of them.
    async fn process_order(&self, event: &OrderEvent) -> Result<Vec<BonusEntry>, BonusError>;
}

/// Rule-driven [`BonusPipeline`] over the organization and bonus stores.
#[derive(Debug)]
pub struct BonusEngine {
    organization: Arc<dyn OrganizationRepository>,
    bonuses: Arc<dyn BonusRepository>,
    plan: RatePlan,
}

impl BonusEngine {
    pub fn new(
        organization: Arc<dyn OrganizationRepository>,
        bonuses: Arc<dyn BonusRepository>,
        plan: RatePlan,
    ) -> Self {
        BonusEngine {
            organization,
            bonuses,
            plan,
        }
    }

    async fn cascade_entries(
        &self,
        rule: &CascadeRule,
        event: &OrderEvent,
        now: TimeMs,
    ) -> Result<Vec<BonusEntry>, BonusError> {
        let Some(node) = self
            .organization
            .get_node_by_user(rule.tree_type, &event.user_id)
            .await?
        else {
            tracing::warn!(
                user_id = %event.user_id,
                tree_type = %rule.tree_type,
                bonus_type = %rule.bonus_type,
                "purchaser has no node in tree, cascade rule skipped"
            );
            return Ok(Vec::new());
        };

        let mut ancestor_ids = node.ancestor_ids();
        ancestor_ids.truncate(rule.percentages.len());
        if ancestor_ids.is_empty() {
            return Ok(Vec::new());
        }

        let fetched = self.organization.get_nodes_by_ids(&ancestor_ids).await?;
        let by_id: HashMap<&str, &OrganizationNode> = fetched
            .iter()
            .map(|ancestor| (ancestor.node_id.as_str(), ancestor))
            .collect();

        let mut entries = Vec::new();
        for (idx, ancestor_id) in ancestor_ids.iter().enumerate() {
            // A zero percentage skips the level; the ones below keep their
            // own index, they do not shift up.
            let percentage = rule.percentages[idx];
            if !percentage.is_positive() {
                continue;
            }
            let Some(ancestor) = by_id.get(ancestor_id.as_str()) else {
                tracing::warn!(
                    node_id = %ancestor_id,
                    tree_type = %rule.tree_type,
                    "ancestor on path has no stored node, level skipped"
                );
                continue;
            };

            let amount = (event.pv_amount * percentage).truncate(self.plan.scale);
            let mut metadata = BonusMetadata::default();
            metadata.extra.insert(
                "tree_type".to_string(),
                Value::String(rule.tree_type.to_string()),
            );
            metadata.extra.insert(
                "source_node_id".to_string(),
                Value::String(node.node_id.to_string()),
            );
            metadata.extra.insert(
                "ancestor_node_id".to_string(),
                Value::String(ancestor_id.to_string()),
            );
            metadata.extra.insert(
                "pv_amount".to_string(),
                Value::String(event.pv_amount.to_canonical_string()),
            );
            merge_order_metadata(&mut metadata, event);

            entries.push(BonusEntry::pending(
                ancestor.user_id.clone(),
                Some(event.user_id.clone()),
                rule.bonus_type,
                event.order_id.clone(),
                (idx + 1) as i64,
                event.pv_amount,
                amount,
                metadata,
                now,
            ));
        }
        Ok(entries)
    }

    fn flat_entry(&self, rule: &FlatRule, event: &OrderEvent, now: TimeMs) -> Option<BonusEntry> {
        if !rule.percent.is_positive() {
            return None;
        }
        let beneficiary = match rule.beneficiary {
            FlatBeneficiary::Purchaser => Some(event.user_id.clone()),
            FlatBeneficiary::CenterOwner => event.metadata.center_user_id.clone(),
            FlatBeneficiary::CenterReferrer => event.metadata.center_referrer_user_id.clone(),
        }?;

        let amount = (event.total_amount * rule.percent).truncate(self.plan.scale);
        if !amount.is_positive() {
            return None;
        }

        let mut metadata = BonusMetadata::default();
        metadata.extra.insert(
            "basis".to_string(),
            Value::String(rule.bonus_type.to_string()),
        );
        metadata.extra.insert(
            "pv_amount".to_string(),
            Value::String(event.pv_amount.to_canonical_string()),
        );
        merge_order_metadata(&mut metadata, event);

        Some(BonusEntry::pending(
            beneficiary,
            Some(event.user_id.clone()),
            rule.bonus_type,
            event.order_id.clone(),
            0,
            event.pv_amount,
            amount,
            metadata,
            now,
        ))
    }
}

#[async_trait]
impl BonusPipeline for BonusEngine {
    async fn process_order(&self, event: &OrderEvent) -> Result<Vec<BonusEntry>, BonusError> {
        let now = TimeMs::now();
        let mut entries = Vec::new();
        for rule in &self.plan.rules {
            match rule {
                BonusRule::Cascade(cascade) => {
                    entries.extend(self.cascade_entries(cascade, event, now).await?);
                }
                BonusRule::Flat(flat) => {
                    entries.extend(self.flat_entry(flat, event, now));
                }
            }
        }

        if !entries.is_empty() {
            self.bonuses.record_batch(&entries).await?;
        }
        tracing::debug!(
            order_id = %event.order_id,
            entries = entries.len(),
            "bonus entries recorded"
        );
        Ok(entries)
    }
}

/// Copy the order's metadata onto a bonus entry, order keys winning over
/// rule-context keys on collision.
fn merge_order_metadata(metadata: &mut BonusMetadata, event: &OrderEvent) {
    if let Value::Object(map) = event.metadata.canonical_value() {
        for (key, value) in map {
            metadata.extra.insert(key, value);
        }
    }
}
