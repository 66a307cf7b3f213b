use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::error::{BillingError, BillingResult};
use super::types::{Consumer, Slab, SlabAllocation, TierAllocationRecord};

/// Spreads the tiers over the consumers in slab order and prices what each
/// consumer draws.
///
/// Within a tier every consumer first gets `unit_count / consumers` units,
/// capped by what it still has to allocate. Any capacity left over is
/// handed out one unit at a time, scanning consumers in input order and
/// skipping those already at their cap, until the tier is full or nobody
/// can take more. So the first consumer in input order with remaining
/// capacity wins every single-unit remainder.
///
/// Consumption beyond the total tier capacity is left unallocated and
/// reported through [`SlabAllocation::shortfall`].
pub fn allocate(slabs: &[Slab], consumers: &[Consumer]) -> BillingResult<SlabAllocation> {
    validate_slabs(slabs)?;
    validate_consumers(consumers)?;

    let capacity = checked_total(slabs.iter().map(|s| s.unit_count), "slab capacity")?;
    let demand = checked_total(consumers.iter().map(|c| c.raw_consumption), "consumption")?;

    let mut remaining: Vec<u64> = consumers.iter().map(|c| c.raw_consumption).collect();
    let mut costs = vec![Decimal::ZERO; consumers.len()];
    let mut records = Vec::new();

    for (slab_index, slab) in slabs.iter().enumerate() {
        let shares = tier_shares(slab.unit_count, &remaining);
        debug!(slab_index, unit_count = slab.unit_count, ?shares, "tier allocated");

        for (i, share) in shares.into_iter().enumerate() {
            let consumed = share.min(remaining[i]);
            if consumed == 0 {
                continue;
            }
            let (base_cost, surcharge_cost) = slab
                .charge(consumed)
                .ok_or_else(|| cost_overflow(slab_index))?;
            costs[i] = costs[i]
                .checked_add(base_cost)
                .and_then(|c| c.checked_add(surcharge_cost))
                .ok_or_else(|| cost_overflow(slab_index))?;
            remaining[i] -= consumed;
            records.push(TierAllocationRecord {
                consumer_id: consumers[i].id.clone(),
                slab_index,
                units_consumed_in_tier: consumed,
                rate: slab.rate_per_unit,
                surcharge_percent: slab.surcharge_percent,
                base_cost,
                surcharge_cost,
            });
        }
    }

    if demand > capacity {
        warn!(
            demand,
            capacity,
            unallocated = demand - capacity,
            "slab capacity exhausted, excess consumption left unbilled"
        );
    }

    let variable_costs: BTreeMap<String, Decimal> = consumers
        .iter()
        .zip(costs)
        .map(|(consumer, cost)| (consumer.id.clone(), cost))
        .collect();

    Ok(SlabAllocation {
        variable_costs,
        records,
        unallocated_units: remaining,
        demand,
        capacity,
    })
}

/// Units each consumer is granted from a tier of `capacity` units.
///
/// Grants whole top-up passes at once while the set of consumers with
/// headroom is unchanged; the last partial pass goes to the lowest indices.
/// The outcome equals the unit-by-unit scan.
fn tier_shares(capacity: u64, remaining: &[u64]) -> Vec<u64> {
    let baseline = capacity / remaining.len() as u64;
    let mut shares: Vec<u64> = remaining.iter().map(|&r| baseline.min(r)).collect();
    let mut shortfall = capacity - shares.iter().sum::<u64>();

    while shortfall > 0 {
        let eligible: Vec<usize> = (0..shares.len())
            .filter(|&i| shares[i] < remaining[i])
            .collect();
        let Some(headroom) = eligible.iter().map(|&i| remaining[i] - shares[i]).min() else {
            break;
        };

        let width = eligible.len() as u64;
        let passes = (shortfall / width).min(headroom);
        if passes == 0 {
            for &i in eligible.iter().take(shortfall as usize) {
                shares[i] += 1;
            }
            break;
        }
        for &i in &eligible {
            shares[i] += passes;
        }
        shortfall -= passes * width;
    }

    shares
}

pub(crate) fn validate_slabs(slabs: &[Slab]) -> BillingResult<()> {
    if slabs.is_empty() {
        return Err(BillingError::invalid("at least one slab is required"));
    }
    for (i, slab) in slabs.iter().enumerate() {
        if slab.unit_count == 0 {
            return Err(BillingError::invalid(format!(
                "slab {} must hold at least one unit",
                i + 1
            )));
        }
        if slab.rate_per_unit < Decimal::ZERO {
            return Err(BillingError::invalid(format!(
                "slab {} rate must be >= 0",
                i + 1
            )));
        }
        if slab.surcharge_percent < Decimal::ZERO {
            return Err(BillingError::invalid(format!(
                "slab {} surcharge must be >= 0",
                i + 1
            )));
        }
    }
    Ok(())
}

pub(crate) fn validate_consumers(consumers: &[Consumer]) -> BillingResult<()> {
    if consumers.is_empty() {
        return Err(BillingError::invalid("at least one consumer is required"));
    }
    let mut seen = BTreeSet::new();
    for consumer in consumers {
        if consumer.id.trim().is_empty() {
            return Err(BillingError::invalid("consumer id must not be empty"));
        }
        if !seen.insert(consumer.id.as_str()) {
            return Err(BillingError::invalid(format!(
                "duplicate consumer id {:?}",
                consumer.id
            )));
        }
    }
    Ok(())
}

fn checked_total(mut values: impl Iterator<Item = u64>, what: &str) -> BillingResult<u64> {
    values
        .try_fold(0u64, u64::checked_add)
        .ok_or_else(|| BillingError::invalid(format!("total {what} overflows")))
}

fn cost_overflow(slab_index: usize) -> BillingError {
    BillingError::invalid(format!("cost of slab {} overflows", slab_index + 1))
}
