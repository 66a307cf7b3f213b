use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// One tier of the graduated tariff. Lower tiers are consumed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slab {
    pub unit_count: u64,
    pub rate_per_unit: Decimal,
    pub surcharge_percent: Decimal,
}

impl Slab {
    pub fn new(unit_count: u64, rate_per_unit: Decimal, surcharge_percent: Decimal) -> Self {
        Self {
            unit_count,
            rate_per_unit,
            surcharge_percent,
        }
    }

    /// Base and surcharge cost of drawing `units` from this tier, or `None`
    /// if the amounts overflow.
    pub fn charge(&self, units: u64) -> Option<(Decimal, Decimal)> {
        let base_cost = Decimal::from(units).checked_mul(self.rate_per_unit)?;
        let surcharge_cost = base_cost.checked_mul(self.surcharge_percent / HUNDRED)?;
        Some((base_cost, surcharge_cost))
    }

    /// Cost of the whole tier if every unit were drawn.
    pub fn quote(&self) -> Option<SlabQuote> {
        let (base_cost, surcharge_cost) = self.charge(self.unit_count)?;
        Some(SlabQuote {
            unit_count: self.unit_count,
            rate_per_unit: self.rate_per_unit,
            surcharge_percent: self.surcharge_percent,
            base_cost,
            surcharge_cost,
            total: base_cost.checked_add(surcharge_cost)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    pub id: String,
    pub raw_consumption: u64,
}

impl Consumer {
    pub fn new(id: impl Into<String>, raw_consumption: u64) -> Self {
        Self {
            id: id.into(),
            raw_consumption,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedComponent {
    pub name: String,
    pub amount: Decimal,
}

impl FixedComponent {
    pub fn new(name: impl Into<String>, amount: Decimal) -> Self {
        Self {
            name: name.into(),
            amount,
        }
    }
}

/// Units one consumer drew from one tier, and what they cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierAllocationRecord {
    pub consumer_id: String,
    pub slab_index: usize,
    pub units_consumed_in_tier: u64,
    pub rate: Decimal,
    pub surcharge_percent: Decimal,
    pub base_cost: Decimal,
    pub surcharge_cost: Decimal,
}

impl TierAllocationRecord {
    pub fn total_cost(&self) -> Decimal {
        self.base_cost + self.surcharge_cost
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub consumer_id: String,
    pub variable_cost: Decimal,
    pub fixed_share: Decimal,
    pub total_before_rebate: Decimal,
    pub rebate_share: Decimal,
    pub net_payable: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityShortfall {
    pub demand: u64,
    pub capacity: u64,
    /// Per consumer, in input order.
    pub unallocated_units: Vec<u64>,
}

impl CapacityShortfall {
    pub fn missing_units(&self) -> u64 {
        self.demand - self.capacity
    }
}

/// Output of the slab allocator. `unallocated_units` is indexed like the
/// consumer slice that was allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabAllocation {
    pub variable_costs: BTreeMap<String, Decimal>,
    pub records: Vec<TierAllocationRecord>,
    pub unallocated_units: Vec<u64>,
    pub demand: u64,
    pub capacity: u64,
}

impl SlabAllocation {
    pub fn variable_cost(&self, consumer_id: &str) -> Option<Decimal> {
        self.variable_costs.get(consumer_id).copied()
    }

    pub fn records_for<'a>(
        &'a self,
        consumer_id: &'a str,
    ) -> impl Iterator<Item = &'a TierAllocationRecord> + 'a {
        self.records
            .iter()
            .filter(move |record| record.consumer_id == consumer_id)
    }

    pub fn shortfall(&self) -> Option<CapacityShortfall> {
        if self.demand <= self.capacity {
            return None;
        }
        Some(CapacityShortfall {
            demand: self.demand,
            capacity: self.capacity,
            unallocated_units: self.unallocated_units.clone(),
        })
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeficitPolicy {
    /// Bill what the tiers can hold and report the remainder.
    #[default]
    Truncate,
    /// Fail the run with `CapacityDeficit`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillInput {
    pub slabs: Vec<Slab>,
    pub fixed_components: Vec<FixedComponent>,
    pub consumers: Vec<Consumer>,
    pub rebate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlabQuote {
    pub unit_count: u64,
    pub rate_per_unit: Decimal,
    pub surcharge_percent: Decimal,
    pub base_cost: Decimal,
    pub surcharge_cost: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatement {
    pub consumer_id: String,
    pub raw_consumption: u64,
    pub proportion: Decimal,
    pub tiers: Vec<TierAllocationRecord>,
    pub result: AllocationResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillStatement {
    pub slabs: Vec<SlabQuote>,
    pub fixed_components: Vec<FixedComponent>,
    pub fixed_total: Decimal,
    pub rebate: Decimal,
    pub total_units: u64,
    pub consumers: Vec<ConsumerStatement>,
    pub total_before_rebate: Decimal,
    pub total_rebate: Decimal,
    pub total_net_payable: Decimal,
    pub capacity_deficit: Option<CapacityShortfall>,
}
