//! Versioned evaluation policy.
//!
//! Limits and costs differ across protocol upgrades, so every evaluation
//! takes them from a [`VmConfig`] instead of hard-coded constants.

use crate::virtual_machine::isa::InstructionSetVersion;

/// Structural limits enforced during evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_bytecode_length: usize,
    pub max_stack_item_length: usize,
    /// Combined depth of the stack and alternate stack.
    pub max_stack_depth: usize,
    /// `None` leaves the control stack unbounded.
    pub max_control_stack_depth: Option<usize>,
    pub max_number_length: usize,
    /// Legacy count of executed non-push opcodes; `None` disables it.
    pub max_operation_count: Option<usize>,
}

impl Limits {
    pub const fn bch_2023() -> Self {
        Self {
            max_bytecode_length: 10_000,
            max_stack_item_length: 520,
            max_stack_depth: 1_000,
            max_control_stack_depth: None,
            max_number_length: 8,
            max_operation_count: Some(201),
        }
    }

    pub const fn bch_2025() -> Self {
        Self {
            max_bytecode_length: 10_000,
            max_stack_item_length: 10_000,
            max_stack_depth: 1_000,
            max_control_stack_depth: Some(100),
            max_number_length: 10_000,
            max_operation_count: None,
        }
    }
}

/// Operation cost charged per instruction and the density-derived budgets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CostTable {
    /// Charged for every evaluated instruction, skipped or not.
    pub base_instruction_cost: u64,
    pub push_byte_cost: u64,
    pub arithmetic_byte_cost: u64,
    pub hash_iteration_cost_standard: u64,
    pub hash_iteration_cost_nonstandard: u64,
    pub signature_check_cost: u64,
    pub repeated_byte_cost: u64,
    /// Operation cost allowed per density-control byte; `None` disables all
    /// density-derived budgets.
    pub operation_cost_per_density_byte: Option<u64>,
    /// Hash digest iterations allowed per density-control byte, as a fraction.
    pub hash_iterations_per_byte_standard: (u64, u64),
    pub hash_iterations_per_byte_nonstandard: (u64, u64),
    /// Signature checks allowed: `(density + offset) / divisor`.
    pub signature_check_offset: u64,
    pub signature_check_divisor: u64,
}

impl CostTable {
    pub const fn bch_2025() -> Self {
        Self {
            base_instruction_cost: 100,
            push_byte_cost: 1,
            arithmetic_byte_cost: 1,
            hash_iteration_cost_standard: 192,
            hash_iteration_cost_nonstandard: 64,
            signature_check_cost: 26_000,
            repeated_byte_cost: 1,
            operation_cost_per_density_byte: Some(800),
            hash_iterations_per_byte_standard: (1, 2),
            hash_iterations_per_byte_nonstandard: (7, 2),
            signature_check_offset: 19,
            signature_check_divisor: 43,
        }
    }

    /// 2025 costs with every budget disabled; costs are still accounted.
    pub const fn bch_2023() -> Self {
        let mut table = Self::bch_2025();
        table.operation_cost_per_density_byte = None;
        table
    }
}

/// Complete evaluation policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    pub version: InstructionSetVersion,
    pub limits: Limits,
    pub costs: CostTable,
    /// Standard mode charges more per hash iteration, allows fewer of them,
    /// and rejects upgradable no-ops.
    pub standard: bool,
}

impl VmConfig {
    pub const fn bch_2023() -> Self {
        Self {
            version: InstructionSetVersion::Bch2023,
            limits: Limits::bch_2023(),
            costs: CostTable::bch_2023(),
            standard: true,
        }
    }

    pub const fn bch_2025() -> Self {
        Self {
            version: InstructionSetVersion::Bch2025,
            limits: Limits::bch_2025(),
            costs: CostTable::bch_2025(),
            standard: true,
        }
    }

    pub const fn bch_2026() -> Self {
        Self {
            version: InstructionSetVersion::Bch2026,
            limits: Limits::bch_2025(),
            costs: CostTable::bch_2025(),
            standard: true,
        }
    }

    /// Configuration for `version`.
    pub const fn for_version(version: InstructionSetVersion) -> Self {
        match version {
            InstructionSetVersion::Bch2023 => Self::bch_2023(),
            InstructionSetVersion::Bch2025 => Self::bch_2025(),
            InstructionSetVersion::Bch2026 => Self::bch_2026(),
        }
    }

    /// Relaxes this configuration to non-standard (consensus-only) rules.
    pub const fn nonstandard(mut self) -> Self {
        self.standard = false;
        self
    }

    pub const fn hash_iteration_cost(&self) -> u64 {
        if self.standard {
            self.costs.hash_iteration_cost_standard
        } else {
            self.costs.hash_iteration_cost_nonstandard
        }
    }

    /// Maximum operation cost for an input of `density` bytes.
    pub fn maximum_operation_cost(&self, density: u64) -> u64 {
        match self.costs.operation_cost_per_density_byte {
            Some(per_byte) => density.saturating_mul(per_byte),
            None => u64::MAX,
        }
    }

    pub fn maximum_hash_digest_iterations(&self, density: u64) -> u64 {
        if self.costs.operation_cost_per_density_byte.is_none() {
            return u64::MAX;
        }
        let (numerator, denominator) = if self.standard {
            self.costs.hash_iterations_per_byte_standard
        } else {
            self.costs.hash_iterations_per_byte_nonstandard
        };
        density.saturating_mul(numerator) / denominator.max(1)
    }

    pub fn maximum_signature_check_count(&self, density: u64) -> u64 {
        if self.costs.operation_cost_per_density_byte.is_none() {
            return u64::MAX;
        }
        density.saturating_add(self.costs.signature_check_offset)
            / self.costs.signature_check_divisor.max(1)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::bch_2025()
    }
}
