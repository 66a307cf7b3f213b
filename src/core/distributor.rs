use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::allocator::validate_consumers;
use super::error::{BillingError, BillingResult};
use super::types::{AllocationResult, Consumer};

/// Share of total consumption for each consumer, in input order.
pub fn proportions(consumers: &[Consumer]) -> BillingResult<Vec<Decimal>> {
    if consumers.is_empty() {
        return Err(BillingError::invalid("at least one consumer is required"));
    }
    let total_units = consumers
        .iter()
        .try_fold(0u64, |acc, c| acc.checked_add(c.raw_consumption))
        .ok_or_else(|| BillingError::invalid("total consumption overflows"))?;
    if total_units == 0 {
        return Err(BillingError::invalid(
            "total consumption is zero, proportions are undefined",
        ));
    }
    let total = Decimal::from(total_units);
    Ok(consumers
        .iter()
        .map(|c| Decimal::from(c.raw_consumption) / total)
        .collect())
}

/// Splits the fixed pool and the rebate by consumption share and nets each
/// consumer's bill. Amounts are left unrounded.
pub fn distribute(
    fixed_total: Decimal,
    rebate_total: Decimal,
    consumers: &[Consumer],
    variable_costs: &BTreeMap<String, Decimal>,
) -> BillingResult<Vec<AllocationResult>> {
    validate_consumers(consumers)?;
    if fixed_total < Decimal::ZERO {
        return Err(BillingError::invalid("fixed total must be >= 0"));
    }
    if rebate_total < Decimal::ZERO {
        return Err(BillingError::invalid("rebate must be >= 0"));
    }
    if variable_costs.len() != consumers.len() {
        return Err(BillingError::invalid(format!(
            "{} variable costs supplied for {} consumers",
            variable_costs.len(),
            consumers.len()
        )));
    }

    let shares = proportions(consumers)?;
    consumers
        .iter()
        .zip(shares)
        .map(|(consumer, proportion)| {
            let variable_cost = *variable_costs.get(&consumer.id).ok_or_else(|| {
                BillingError::invalid(format!("no variable cost for consumer {:?}", consumer.id))
            })?;
            let fixed_share = fixed_total * proportion;
            let total_before_rebate = variable_cost
                .checked_add(fixed_share)
                .ok_or_else(|| BillingError::invalid("bill total overflows"))?;
            let rebate_share = rebate_total * proportion;
            Ok(AllocationResult {
                consumer_id: consumer.id.clone(),
                variable_cost,
                fixed_share,
                total_before_rebate,
                rebate_share,
                net_payable: total_before_rebate - rebate_share,
            })
        })
        .collect()
}
