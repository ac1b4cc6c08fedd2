//! Resource budgets for the perception loop.
//!
//! Tracks cycles, token totals, derived cost, and elapsed wall time against
//! immutable limits. The loop consults `can_proceed` at the top of every
//! cycle; once a limit is hit the controller denies forever.

use serde::Serialize;
use std::time::Instant;

const INPUT_COST_PER_MTOK: f64 = 3.0;
const OUTPUT_COST_PER_MTOK: f64 = 15.0;

/// Rough token footprint of a JPEG frame at the given dimensions.
pub fn estimate_frame_tokens(width: u32, height: u32) -> u64 {
    let pixels = width as u64 * height as u64;
    pixels.div_ceil(750)
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetLimits {
    pub max_cycles: u32,
    pub max_tokens: u64,
    pub max_cost_usd: f64,
    pub max_duration_ms: u64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            max_cycles: 100,
            max_tokens: 500_000,
            max_cost_usd: 5.00,
            max_duration_ms: 600_000,
        }
    }
}

/// Tokens consumed by a single model call.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Point-in-time view of the budget, embedded in audit records.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BudgetSnapshot {
    pub cycles: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub elapsed_ms: u64,
    pub limits: BudgetLimits,
}

pub struct BudgetController {
    cycles: u32,
    input_tokens: u64,
    output_tokens: u64,
    started: Instant,
    limits: BudgetLimits,
}

impl BudgetController {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            cycles: 0,
            input_tokens: 0,
            output_tokens: 0,
            started: Instant::now(),
            limits,
        }
    }

    /// Check limits in order: cycles, tokens, cost, duration. Returns the
    /// first violation as a reason string.
    pub fn can_proceed(&self) -> Result<(), String> {
        if self.cycles >= self.limits.max_cycles {
            return Err(format!(
                "Max cycles reached ({}/{})",
                self.cycles, self.limits.max_cycles
            ));
        }
        let tokens = self.input_tokens + self.output_tokens;
        if tokens >= self.limits.max_tokens {
            return Err(format!(
                "Max tokens reached ({}/{})",
                tokens, self.limits.max_tokens
            ));
        }
        let cost = self.estimated_cost();
        if cost >= self.limits.max_cost_usd {
            return Err(format!(
                "Max cost reached (${:.2}/${:.2})",
                cost, self.limits.max_cost_usd
            ));
        }
        let elapsed = self.elapsed_ms();
        if elapsed >= self.limits.max_duration_ms {
            return Err(format!(
                "Max duration reached ({}ms/{}ms)",
                elapsed, self.limits.max_duration_ms
            ));
        }
        Ok(())
    }

    /// Record a finished cycle. The loop must not call this after a denial.
    pub fn on_cycle_complete(&mut self, usage: TokenUsage) {
        self.cycles += 1;
        self.input_tokens += usage.input;
        self.output_tokens += usage.output;
    }

    pub fn estimated_cost(&self) -> f64 {
        self.input_tokens as f64 / 1e6 * INPUT_COST_PER_MTOK
            + self.output_tokens as f64 / 1e6 * OUTPUT_COST_PER_MTOK
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        BudgetSnapshot {
            cycles: self.cycles,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_usd: self.estimated_cost(),
            elapsed_ms: self.elapsed_ms(),
            limits: self.limits,
        }
    }
}
