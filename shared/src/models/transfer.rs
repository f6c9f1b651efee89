//! Cross-branch transfer recommendation
//!
//! For one product, finds branches holding surplus near-expiry stock and
//! branches below their minimum, then pairs them by net benefit. The result
//! is advisory only; nothing here touches the ledger.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Batch, ExpiryTag, Urgency};
use crate::types::round_currency;

/// Scoring knobs for transfer recommendations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// Units kept above the minimum before a branch counts as surplus.
    pub reorder_buffer: i64,
    /// Flat handling cost per transfer.
    pub fixed_cost: Decimal,
    /// Freight cost per unit moved.
    pub cost_per_unit: Decimal,
    /// Share of the moved stock's cost that would be written off if it stayed
    /// put, per urgency tier.
    pub risk_weights: RiskWeights,
}

/// Write-off risk per urgency tier, as a fraction of stock cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub low: Decimal,
    pub medium: Decimal,
    pub high: Decimal,
    pub critical: Decimal,
}

impl RiskWeights {
    pub fn for_urgency(&self, urgency: Urgency) -> Decimal {
        match urgency {
            Urgency::Low => self.low,
            Urgency::Medium => self.medium,
            Urgency::High => self.high,
            Urgency::Critical => self.critical,
        }
    }
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            low: Decimal::ZERO,
            medium: Decimal::new(25, 2),
            high: Decimal::new(50, 2),
            critical: Decimal::new(75, 2),
        }
    }
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            reorder_buffer: 0,
            fixed_cost: Decimal::ZERO,
            cost_per_unit: Decimal::ZERO,
            risk_weights: RiskWeights::default(),
        }
    }
}

/// Minimum stock a branch should hold for a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchThreshold {
    pub branch_id: i64,
    pub minimum_stock: i64,
}

/// Priority of a proposed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl From<Urgency> for TransferPriority {
    fn from(urgency: Urgency) -> Self {
        match urgency {
            Urgency::Low => TransferPriority::Low,
            Urgency::Medium => TransferPriority::Normal,
            Urgency::High => TransferPriority::High,
            Urgency::Critical => TransferPriority::Urgent,
        }
    }
}

/// A proposed, not yet executed, stock movement between branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCandidate {
    pub product_id: i64,
    pub source_branch_id: i64,
    pub target_branch_id: i64,
    pub batch_id: i64,
    pub batch_number: String,
    pub quantity: i64,
    pub estimated_benefit: Decimal,
    pub estimated_cost: Decimal,
    pub net_benefit: Decimal,
    pub priority: TransferPriority,
    pub urgency: Urgency,
    pub expiry_date: Option<NaiveDate>,
    pub days_until_expiry: Option<i64>,
}

/// Everything the recommender needs to know about one product
#[derive(Debug, Clone, Copy)]
pub struct ProductTransferInput<'a> {
    pub product_id: i64,
    /// Sale price per unit at the receiving branch.
    pub unit_price: Decimal,
    pub warning_window_days: u32,
    pub batches: &'a [Batch],
    pub thresholds: &'a [BranchThreshold],
}

/// Per-branch stock position for one product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPosition {
    pub branch_id: i64,
    pub current_stock: i64,
    pub minimum_stock: i64,
}

impl BranchPosition {
    pub fn surplus(&self, reorder_buffer: i64) -> i64 {
        self.current_stock - (self.minimum_stock + reorder_buffer)
    }

    pub fn deficit(&self) -> i64 {
        (self.minimum_stock - self.current_stock).max(0)
    }
}

/// Stock positions of every branch that holds stock or has a threshold.
/// Global batches are not counted toward any branch.
pub fn branch_positions(batches: &[Batch], thresholds: &[BranchThreshold]) -> Vec<BranchPosition> {
    let mut stock: BTreeMap<i64, i64> = BTreeMap::new();
    for batch in batches.iter().filter(|b| b.is_sellable()) {
        if let Some(branch_id) = batch.branch_id {
            *stock.entry(branch_id).or_default() += batch.current_stock;
        }
    }

    let minimums: HashMap<i64, i64> = thresholds
        .iter()
        .map(|t| (t.branch_id, t.minimum_stock))
        .collect();

    let branches: BTreeSet<i64> = stock.keys().chain(minimums.keys()).copied().collect();
    branches
        .into_iter()
        .map(|branch_id| BranchPosition {
            branch_id,
            current_stock: stock.get(&branch_id).copied().unwrap_or(0),
            minimum_stock: minimums.get(&branch_id).copied().unwrap_or(0),
        })
        .collect()
}

struct SourceBatch<'a> {
    batch: &'a Batch,
    branch_id: i64,
    tag: ExpiryTag,
}

struct Score {
    benefit: Decimal,
    cost: Decimal,
    net: Decimal,
}

fn score(source: &SourceBatch<'_>, quantity: i64, unit_price: Decimal, policy: &TransferPolicy) -> Score {
    let qty = Decimal::from(quantity);
    let sale_value = qty * unit_price;
    let avoided_write_off =
        qty * source.batch.cost_per_unit * policy.risk_weights.for_urgency(source.tag.urgency);
    let benefit = round_currency(sale_value + avoided_write_off);
    let cost = round_currency(policy.fixed_cost + qty * policy.cost_per_unit);

    Score {
        benefit,
        cost,
        net: benefit - cost,
    }
}

/// Ranking: higher net benefit, then higher urgency, then earlier expiry,
/// then lower batch id, then lower target branch id.
pub fn rank_transfers(a: &TransferCandidate, b: &TransferCandidate) -> Ordering {
    b.net_benefit
        .cmp(&a.net_benefit)
        .then_with(|| b.urgency.cmp(&a.urgency))
        .then_with(|| match (a.expiry_date, b.expiry_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.batch_id.cmp(&b.batch_id))
        .then_with(|| a.target_branch_id.cmp(&b.target_branch_id))
}

/// Propose transfers for one product.
///
/// Surplus, deficit and batch stock are each consumed as candidates are
/// accepted, so the proposals never promise the same unit twice.
pub fn recommend_transfers(
    input: &ProductTransferInput<'_>,
    policy: &TransferPolicy,
    as_of: NaiveDate,
) -> Vec<TransferCandidate> {
    let positions = branch_positions(input.batches, input.thresholds);

    let mut surplus: HashMap<i64, i64> = HashMap::new();
    let mut deficit: HashMap<i64, i64> = HashMap::new();
    for position in &positions {
        let s = position.surplus(policy.reorder_buffer);
        if s > 0 {
            surplus.insert(position.branch_id, s);
        }
        let d = position.deficit();
        if d > 0 {
            deficit.insert(position.branch_id, d);
        }
    }
    if surplus.is_empty() || deficit.is_empty() {
        return Vec::new();
    }

    let sources: Vec<SourceBatch<'_>> = input
        .batches
        .iter()
        .filter(|b| b.product_id == input.product_id && b.is_sellable())
        .filter_map(|batch| {
            let branch_id = batch.branch_id?;
            if !surplus.contains_key(&branch_id) {
                return None;
            }
            let tag = batch.expiry_tag(as_of, input.warning_window_days);
            (!tag.is_expired() && tag.urgency >= Urgency::Medium).then_some(SourceBatch {
                batch,
                branch_id,
                tag,
            })
        })
        .collect();

    let build = |source: &SourceBatch<'_>, target_branch_id: i64, quantity: i64| {
        let s = score(source, quantity, input.unit_price, policy);
        TransferCandidate {
            product_id: input.product_id,
            source_branch_id: source.branch_id,
            target_branch_id,
            batch_id: source.batch.id,
            batch_number: source.batch.batch_number.clone(),
            quantity,
            estimated_benefit: s.benefit,
            estimated_cost: s.cost,
            net_benefit: s.net,
            priority: source.tag.urgency.into(),
            urgency: source.tag.urgency,
            expiry_date: source.batch.expiry_date,
            days_until_expiry: source.tag.days_until_expiry,
        }
    };

    // Rank every feasible pairing at its unconstrained size first.
    let mut pairs: Vec<(usize, TransferCandidate)> = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        for (&target_branch_id, &need) in &deficit {
            if target_branch_id == source.branch_id {
                continue;
            }
            let quantity = surplus[&source.branch_id]
                .min(need)
                .min(source.batch.current_stock);
            if quantity > 0 {
                pairs.push((idx, build(source, target_branch_id, quantity)));
            }
        }
    }
    pairs.sort_by(|(_, a), (_, b)| rank_transfers(a, b));

    let mut batch_left: HashMap<i64, i64> = sources
        .iter()
        .map(|s| (s.batch.id, s.batch.current_stock))
        .collect();
    let mut accepted = Vec::new();
    for (idx, proposal) in pairs {
        let source = &sources[idx];
        let quantity = surplus[&source.branch_id]
            .min(deficit[&proposal.target_branch_id])
            .min(batch_left[&source.batch.id]);
        if quantity <= 0 {
            continue;
        }

        let candidate = build(source, proposal.target_branch_id, quantity);
        if candidate.net_benefit <= Decimal::ZERO {
            continue;
        }

        if let Some(left) = surplus.get_mut(&source.branch_id) {
            *left -= quantity;
        }
        if let Some(left) = deficit.get_mut(&proposal.target_branch_id) {
            *left -= quantity;
        }
        if let Some(left) = batch_left.get_mut(&source.batch.id) {
            *left -= quantity;
        }
        accepted.push(candidate);
    }

    accepted.sort_by(rank_transfers);
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewBatch;
    use chrono::Utc;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn batch(id: i64, branch: i64, stock: i64, expiry_in: i64) -> Batch {
        NewBatch {
            product_id: 5,
            branch_id: Some(branch),
            batch_number: format!("T{id}"),
            quantity: stock,
            cost_per_unit: Decimal::from(10),
            production_date: None,
            expiry_date: Some(today() + chrono::Duration::days(expiry_in)),
            supplier_name: None,
            purchase_order_number: None,
            notes: None,
        }
        .into_batch(id, Utc::now())
    }

    fn input<'a>(batches: &'a [Batch], thresholds: &'a [BranchThreshold]) -> ProductTransferInput<'a> {
        ProductTransferInput {
            product_id: 5,
            unit_price: Decimal::from(15),
            warning_window_days: 30,
            batches,
            thresholds,
        }
    }

    #[test]
    fn positions_ignore_global_batches() {
        let mut global = batch(1, 1, 40, 5);
        global.branch_id = None;
        let batches = vec![global, batch(2, 1, 10, 5)];
        let positions = branch_positions(&batches, &[]);
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].current_stock, 10);
    }

    #[test]
    fn no_target_means_no_candidates() {
        let batches = vec![batch(1, 1, 50, 5)];
        let thresholds = [BranchThreshold { branch_id: 1, minimum_stock: 10 }];
        assert!(recommend_transfers(&input(&batches, &thresholds), &TransferPolicy::default(), today()).is_empty());
    }

    #[test]
    fn low_urgency_stock_is_not_a_source() {
        let batches = vec![batch(1, 1, 70, 90)];
        let thresholds = [
            BranchThreshold { branch_id: 1, minimum_stock: 20 },
            BranchThreshold { branch_id: 2, minimum_stock: 30 },
        ];
        assert!(recommend_transfers(&input(&batches, &thresholds), &TransferPolicy::default(), today()).is_empty());
    }

    #[test]
    fn transfer_cost_can_cancel_a_move() {
        let batches = vec![batch(1, 1, 70, 5)];
        let thresholds = [
            BranchThreshold { branch_id: 1, minimum_stock: 20 },
            BranchThreshold { branch_id: 2, minimum_stock: 30 },
        ];
        let policy = TransferPolicy {
            fixed_cost: Decimal::from(10_000),
            ..TransferPolicy::default()
        };
        assert!(recommend_transfers(&input(&batches, &thresholds), &policy, today()).is_empty());
    }

    #[test]
    fn deficit_is_split_across_batches_without_overlap() {
        let batches = vec![batch(1, 1, 10, 3), batch(2, 1, 40, 20)];
        let thresholds = [
            BranchThreshold { branch_id: 1, minimum_stock: 10 },
            BranchThreshold { branch_id: 2, minimum_stock: 25 },
        ];
        let out = recommend_transfers(&input(&batches, &thresholds), &TransferPolicy::default(), today());
        let moved: i64 = out.iter().map(|c| c.quantity).sum();
        assert_eq!(moved, 25);
        assert!(out.iter().all(|c| c.source_branch_id == 1 && c.target_branch_id == 2));
    }
}
