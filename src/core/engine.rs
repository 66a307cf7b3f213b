use rust_decimal::Decimal;
use tracing::debug;

use super::allocator::{allocate, validate_consumers, validate_slabs};
use super::distributor::{distribute, proportions};
use super::error::{BillingError, BillingResult};
use super::types::{
    BillInput, BillStatement, ConsumerStatement, DeficitPolicy, FixedComponent, SlabQuote,
};

/// Runs one billing pass: slab allocation, then the fixed and rebate split.
///
/// The whole input is validated before anything is computed, so a run either
/// yields a complete statement or an error.
pub fn run_bill(input: &BillInput, policy: DeficitPolicy) -> BillingResult<BillStatement> {
    validate_input(input)?;

    let fixed_total = fixed_pool(&input.fixed_components)?;
    let slabs = input
        .slabs
        .iter()
        .enumerate()
        .map(|(i, slab)| {
            slab.quote().ok_or_else(|| {
                BillingError::invalid(format!("cost of slab {} overflows", i + 1))
            })
        })
        .collect::<BillingResult<Vec<SlabQuote>>>()?;

    let allocation = allocate(&input.slabs, &input.consumers)?;
    let capacity_deficit = allocation.shortfall();
    if let (Some(deficit), DeficitPolicy::Reject) = (&capacity_deficit, policy) {
        return Err(BillingError::CapacityDeficit {
            demand: deficit.demand,
            capacity: deficit.capacity,
        });
    }

    let shares = proportions(&input.consumers)?;
    let results = distribute(
        fixed_total,
        input.rebate,
        &input.consumers,
        &allocation.variable_costs,
    )?;

    let mut total_before_rebate = Decimal::ZERO;
    let mut total_rebate = Decimal::ZERO;
    let mut total_net_payable = Decimal::ZERO;
    let mut consumers = Vec::with_capacity(results.len());
    for ((consumer, proportion), result) in input.consumers.iter().zip(shares).zip(results) {
        total_before_rebate = add_total(total_before_rebate, result.total_before_rebate)?;
        total_rebate = add_total(total_rebate, result.rebate_share)?;
        total_net_payable = add_total(total_net_payable, result.net_payable)?;
        consumers.push(ConsumerStatement {
            consumer_id: consumer.id.clone(),
            raw_consumption: consumer.raw_consumption,
            proportion,
            tiers: allocation.records_for(&consumer.id).cloned().collect(),
            result,
        });
    }

    debug!(
        consumers = consumers.len(),
        %fixed_total,
        %total_net_payable,
        "bill computed"
    );

    Ok(BillStatement {
        slabs,
        fixed_components: input.fixed_components.clone(),
        fixed_total,
        rebate: input.rebate,
        total_units: allocation.demand,
        consumers,
        total_before_rebate,
        total_rebate,
        total_net_payable,
        capacity_deficit,
    })
}

/// Sum of the named fixed charges.
pub fn fixed_pool(components: &[FixedComponent]) -> BillingResult<Decimal> {
    components.iter().try_fold(Decimal::ZERO, |acc, component| {
        acc.checked_add(component.amount)
            .ok_or_else(|| BillingError::invalid("fixed components overflow"))
    })
}

fn add_total(acc: Decimal, amount: Decimal) -> BillingResult<Decimal> {
    acc.checked_add(amount)
        .ok_or_else(|| BillingError::invalid("bill total overflows"))
}

fn validate_input(input: &BillInput) -> BillingResult<()> {
    validate_slabs(&input.slabs)?;
    validate_consumers(&input.consumers)?;

    for component in &input.fixed_components {
        if component.amount < Decimal::ZERO {
            return Err(BillingError::invalid(format!(
                "fixed component {:?} must be >= 0",
                component.name
            )));
        }
    }

    if input.rebate < Decimal::ZERO {
        return Err(BillingError::invalid("rebate must be >= 0"));
    }

    if input.consumers.iter().all(|c| c.raw_consumption == 0) {
        return Err(BillingError::invalid(
            "total consumption is zero, proportions are undefined",
        ));
    }

    Ok(())
}
