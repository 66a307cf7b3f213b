use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{BillInput, Consumer, DeficitPolicy, FixedComponent, Slab};

const FIRST_DEFAULT_CONSUMER_ID: u64 = 401;
const DEFAULT_CONSUMPTIONS: [u64; 3] = [550, 650, 150];

/// Default tariff, fixed charges and consumers for a billing run. Every
/// field can be overridden before the values reach the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BillingConfig {
    pub slabs: Vec<Slab>,
    pub fixed_components: Vec<FixedComponent>,
    pub consumers: Vec<Consumer>,
    pub rebate: Decimal,
    pub deficit_policy: DeficitPolicy,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            slabs: default_slabs(),
            fixed_components: default_fixed_components(),
            consumers: default_consumers(DEFAULT_CONSUMPTIONS.len()),
            rebate: Decimal::ZERO,
            deficit_policy: DeficitPolicy::default(),
        }
    }
}

impl BillingConfig {
    pub fn bill_input(&self) -> BillInput {
        BillInput {
            slabs: self.slabs.clone(),
            fixed_components: self.fixed_components.clone(),
            consumers: self.consumers.clone(),
            rebate: self.rebate,
        }
    }
}

pub fn default_slabs() -> Vec<Slab> {
    let surcharge = Decimal::new(3583, 2);
    [
        (198, Decimal::new(3, 0)),
        (199, Decimal::new(45, 1)),
        (396, Decimal::new(65, 1)),
        (397, Decimal::new(7, 0)),
        (160, Decimal::new(8, 0)),
    ]
    .into_iter()
    .map(|(units, rate)| Slab::new(units, rate, surcharge))
    .collect()
}

pub fn default_fixed_components() -> Vec<FixedComponent> {
    [
        ("A", Decimal::new(19828, 2)),
        ("D", Decimal::ZERO),
        ("E", Decimal::new(70534, 2)),
        ("F", Decimal::new(61718, 2)),
        ("G", Decimal::new(7104, 2)),
        ("H", Decimal::new(6198, 1)),
        ("I", Decimal::ZERO),
        ("J", Decimal::new(23, 1)),
    ]
    .into_iter()
    .map(|(name, amount)| FixedComponent::new(name, amount))
    .collect()
}

/// Consumers named 401, 402, ... with the customary 550/650/150 readings;
/// any consumer past the third defaults to 150 units.
pub fn default_consumers(count: usize) -> Vec<Consumer> {
    (0..count)
        .map(|i| {
            let consumption = DEFAULT_CONSUMPTIONS
                .get(i)
                .copied()
                .unwrap_or(DEFAULT_CONSUMPTIONS[DEFAULT_CONSUMPTIONS.len() - 1]);
            Consumer::new(default_consumer_id(i), consumption)
        })
        .collect()
}

fn default_consumer_id(index: usize) -> String {
    (FIRST_DEFAULT_CONSUMER_ID + index as u64).to_string()
}
