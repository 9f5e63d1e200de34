//! Commission rule configuration.
//!
//! A [`RatePlan`] is the full set of rules the bonus engine applies to each
//! paid order: percentage cascades walked up an organization tree, and flat
//! percentages paid to a single participant. The plan is plain data handed
//! to the engine at construction; nothing here touches storage.

use crate::domain::{BonusType, Decimal, TreeType};
use rust_decimal::Decimal as RustDecimal;

/// Who receives a flat-percentage bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlatBeneficiary {
    /// The purchasing participant themself.
    Purchaser,
    /// The `center_user_id` named in the order metadata.
    CenterOwner,
    /// The `center_referrer_user_id` named in the order metadata.
    CenterReferrer,
}

/// A percentage cascade over the purchaser's ancestors in one tree.
///
/// `percentages[0]` pays the direct parent (level 1), `percentages[1]` the
/// grandparent, and so on. A zero percentage skips that level without
/// shifting the ones below it.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeRule {
    pub bonus_type: BonusType,
    pub tree_type: TreeType,
    pub percentages: Vec<Decimal>,
}

/// A flat percentage of the order total paid to one beneficiary.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRule {
    pub bonus_type: BonusType,
    pub beneficiary: FlatBeneficiary,
    pub percent: Decimal,
}

/// One commission rule.
#[derive(Debug, Clone, PartialEq)]
pub enum BonusRule {
    Cascade(CascadeRule),
    Flat(FlatRule),
}

/// The full rule configuration for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePlan {
    pub rules: Vec<BonusRule>,
    /// Fractional digits kept on computed amounts; excess digits are
    /// truncated toward zero, never rounded up.
    pub scale: u32,
}

impl RatePlan {
    pub fn new(rules: Vec<BonusRule>, scale: u32) -> Self {
        RatePlan { rules, scale }
    }
}

impl Default for RatePlan {
    /// The production plan: a ten-level recommend cascade on the unilevel
    /// tree, a twenty-level sponsor cascade on the binary tree, and flat
    /// share / center / center-referral bonuses off the order total.
    fn default() -> Self {
        RatePlan {
            rules: vec![
                BonusRule::Cascade(CascadeRule {
                    bonus_type: BonusType::Recommend,
                    tree_type: TreeType::Unilevel,
                    percentages: recommend_percentages(),
                }),
                BonusRule::Cascade(CascadeRule {
                    bonus_type: BonusType::Sponsor,
                    tree_type: TreeType::Binary,
                    percentages: vec![pct(1); 20],
                }),
                BonusRule::Flat(FlatRule {
                    bonus_type: BonusType::Share,
                    beneficiary: FlatBeneficiary::Purchaser,
                    percent: pct(5),
                }),
                BonusRule::Flat(FlatRule {
                    bonus_type: BonusType::Center,
                    beneficiary: FlatBeneficiary::CenterOwner,
                    percent: pct(8),
                }),
                BonusRule::Flat(FlatRule {
                    bonus_type: BonusType::CenterReferral,
                    beneficiary: FlatBeneficiary::CenterReferrer,
                    percent: pct(2),
                }),
            ],
            scale: 8,
        }
    }
}

fn recommend_percentages() -> Vec<Decimal> {
    let mut table = vec![pct(30), pct(5), pct(5), pct(3), pct(2)];
    table.extend(vec![pct(1); 5]);
    table
}

/// Whole-percent literal, e.g. `pct(30)` is `0.30`.
fn pct(percent: i64) -> Decimal {
    Decimal::new(RustDecimal::new(percent, 2))
}
