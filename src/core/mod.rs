mod allocator;
mod config;
mod distributor;
mod engine;
mod error;
mod types;

pub use allocator::allocate;
pub use config::{BillingConfig, default_consumers, default_fixed_components, default_slabs};
pub use distributor::{distribute, proportions};
pub use engine::{fixed_pool, run_bill};
pub use error::{BillingError, BillingResult};
pub use types::{
    AllocationResult, BillInput, BillStatement, CapacityShortfall, Consumer, ConsumerStatement,
    DeficitPolicy, FixedComponent, Slab, SlabAllocation, SlabQuote, TierAllocationRecord,
};
