use crate::virtual_machine::errors::VmError;
use crate::virtual_machine::vm::config::VmConfig;

/// Number of cost categories tracked by [`CostProfile`].
const COST_CATEGORY_COUNT: usize = 6;

/// Categories of operation cost for profiling and debugging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CostCategory {
    /// Base cost of every evaluated instruction, skipped or not.
    Base = 0,
    /// Bytes pushed or produced onto the stack.
    Push = 1,
    /// Operand bytes consumed by numeric operations.
    Arithmetic = 2,
    /// Hash digest iterations.
    Hashing = 3,
    /// Signature verifications.
    SignatureChecks = 4,
    /// Bytes re-evaluated by loops.
    Repeated = 5,
}

impl CostCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Base => "Instruction Base",
            CostCategory::Push => "Stack Push",
            CostCategory::Arithmetic => "Arithmetic",
            CostCategory::Hashing => "Hashing",
            CostCategory::SignatureChecks => "Signature Checks",
            CostCategory::Repeated => "Repeated Bytes",
        }
    }

    /// All categories in discriminant order.
    const ALL: [CostCategory; COST_CATEGORY_COUNT] = [
        CostCategory::Base,
        CostCategory::Push,
        CostCategory::Arithmetic,
        CostCategory::Hashing,
        CostCategory::SignatureChecks,
        CostCategory::Repeated,
    ];
}

/// Operation cost broken down by [`CostCategory`].
///
/// Backed by a flat array indexed by category discriminant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CostProfile {
    counts: [u64; COST_CATEGORY_COUNT],
}

impl CostProfile {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn add(&mut self, category: CostCategory, amount: u64) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(amount);
    }

    pub fn get(&self, category: CostCategory) -> u64 {
        self.counts[category as usize]
    }

    /// Returns the total cost across all categories.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    /// Returns an iterator over all categories and their costs.
    pub fn iter(&self) -> impl Iterator<Item = (CostCategory, u64)> {
        CostCategory::ALL.into_iter().zip(self.counts)
    }
}

/// Per-evaluation resource counters.
///
/// A plain value copied into every [`VmState`](crate::virtual_machine::state::VmState);
/// every counter is non-decreasing along a trace. The `maximum_*` fields are
/// the budgets fixed at the start of the evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metrics {
    pub executed_instruction_count: u64,
    pub operation_cost: u64,
    pub signature_check_count: u64,
    pub hash_digest_iterations: u64,
    /// Largest combined byte size of both stacks observed after any step.
    pub max_memory_usage: u64,
    pub repeated_bytes: u64,
    pub arithmetic_cost: u64,
    pub stack_pushed_bytes: u64,
    pub density_control_length: u64,
    pub maximum_operation_cost: u64,
    pub maximum_hash_digest_iterations: u64,
    pub maximum_signature_check_count: u64,
    pub profile: CostProfile,
}

impl Metrics {
    /// Fresh counters with budgets derived from `density_control_length`.
    pub fn new(density_control_length: u64, config: &VmConfig) -> Self {
        Self {
            density_control_length,
            maximum_operation_cost: config.maximum_operation_cost(density_control_length),
            maximum_hash_digest_iterations: config
                .maximum_hash_digest_iterations(density_control_length),
            maximum_signature_check_count: config
                .maximum_signature_check_count(density_control_length),
            ..Self::default()
        }
    }

    /// Adds `amount` to the operation cost under `category`.
    #[inline(always)]
    pub fn charge(&mut self, category: CostCategory, amount: u64) {
        self.profile.add(category, amount);
        self.operation_cost = self.operation_cost.saturating_add(amount);
    }

    pub fn record_push(&mut self, bytes: usize, config: &VmConfig) {
        let bytes = bytes as u64;
        self.stack_pushed_bytes = self.stack_pushed_bytes.saturating_add(bytes);
        self.charge(
            CostCategory::Push,
            bytes.saturating_mul(config.costs.push_byte_cost),
        );
    }

    pub fn record_arithmetic(&mut self, bytes: u64, config: &VmConfig) {
        self.arithmetic_cost = self.arithmetic_cost.saturating_add(bytes);
        self.charge(
            CostCategory::Arithmetic,
            bytes.saturating_mul(config.costs.arithmetic_byte_cost),
        );
    }

    pub fn record_hash(&mut self, iterations: u64, config: &VmConfig) {
        self.hash_digest_iterations = self.hash_digest_iterations.saturating_add(iterations);
        self.charge(
            CostCategory::Hashing,
            iterations.saturating_mul(config.hash_iteration_cost()),
        );
    }

    pub fn record_signature_checks(&mut self, count: u64, config: &VmConfig) {
        self.signature_check_count = self.signature_check_count.saturating_add(count);
        self.charge(
            CostCategory::SignatureChecks,
            count.saturating_mul(config.costs.signature_check_cost),
        );
    }

    pub fn record_repeated(&mut self, bytes: usize, config: &VmConfig) {
        let bytes = bytes as u64;
        self.repeated_bytes = self.repeated_bytes.saturating_add(bytes);
        self.charge(
            CostCategory::Repeated,
            bytes.saturating_mul(config.costs.repeated_byte_cost),
        );
    }

    pub fn observe_memory(&mut self, usage: u64) {
        self.max_memory_usage = self.max_memory_usage.max(usage);
    }

    /// Fails if any counter has passed its budget.
    pub fn check_budgets(&self) -> Result<(), VmError> {
        if self.operation_cost > self.maximum_operation_cost {
            return Err(VmError::ExceededMaximumOperationCost {
                limit: self.maximum_operation_cost,
            });
        }
        if self.hash_digest_iterations > self.maximum_hash_digest_iterations {
            return Err(VmError::ExceededMaximumHashDigestIterations {
                limit: self.maximum_hash_digest_iterations,
            });
        }
        if self.signature_check_count > self.maximum_signature_check_count {
            return Err(VmError::ExceededMaximumSignatureCheckCount {
                limit: self.maximum_signature_check_count,
            });
        }
        Ok(())
    }
}
