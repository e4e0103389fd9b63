use crate::error::{BudgetDimension, BudgetError, BudgetOverrun};
use helmsman_config::BudgetConfig;
use serde::{Deserialize, Serialize};

/// Immutable spending ceilings and running spend for a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolBudget {
    cost_ceiling: f64,
    cost_spent: f64,
    call_ceiling: u32,
    call_spent: u32,
    token_ceiling: u64,
    token_spent: u64,
}

impl Default for ToolBudget {
    fn default() -> Self {
        Self::from_config(&BudgetConfig::default())
    }
}

impl ToolBudget {
    pub fn new(cost_ceiling: f64, call_ceiling: u32, token_ceiling: u64) -> Self {
        Self {
            cost_ceiling: cost_ceiling.max(0.0),
            cost_spent: 0.0,
            call_ceiling,
            call_spent: 0,
            token_ceiling,
            token_spent: 0,
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.cost_ceiling, config.call_ceiling, config.token_ceiling)
    }

    pub fn cost_ceiling(&self) -> f64 {
        self.cost_ceiling
    }

    pub fn cost_spent(&self) -> f64 {
        self.cost_spent
    }

    pub fn call_ceiling(&self) -> u32 {
        self.call_ceiling
    }

    pub fn call_spent(&self) -> u32 {
        self.call_spent
    }

    pub fn token_ceiling(&self) -> u64 {
        self.token_ceiling
    }

    pub fn token_spent(&self) -> u64 {
        self.token_spent
    }

    pub fn remaining_cost(&self) -> f64 {
        (self.cost_ceiling - self.cost_spent).max(0.0)
    }

    pub fn remaining_calls(&self) -> u32 {
        self.call_ceiling.saturating_sub(self.call_spent)
    }

    pub fn remaining_tokens(&self) -> u64 {
        self.token_ceiling.saturating_sub(self.token_spent)
    }

    pub fn with_cost(&self, cost: f64) -> Self {
        Self {
            cost_spent: self.cost_spent + cost.max(0.0),
            ..self.clone()
        }
    }

    pub fn with_call(&self) -> Self {
        Self {
            call_spent: self.call_spent.saturating_add(1),
            ..self.clone()
        }
    }

    pub fn with_tokens(&self, tokens: u64) -> Self {
        Self {
            token_spent: self.token_spent.saturating_add(tokens),
            ..self.clone()
        }
    }

    /// Check plan totals against the ceilings themselves.
    ///
    /// Prior spend is ignored. Every exceeded dimension is reported, not
    /// just the first.
    pub fn check_ceilings(&self, cost: f64, calls: usize, tokens: u64) -> Result<(), BudgetError> {
        overruns(
            (self.cost_ceiling, self.call_ceiling, self.token_ceiling),
            (cost, calls, tokens),
        )
    }

    /// Check a request against what is left of each ceiling after spend.
    pub fn check_remaining(&self, cost: f64, calls: usize, tokens: u64) -> Result<(), BudgetError> {
        overruns(
            (
                self.remaining_cost(),
                self.remaining_calls(),
                self.remaining_tokens(),
            ),
            (cost, calls, tokens),
        )
    }
}

fn overruns(
    (cost_limit, call_limit, token_limit): (f64, u32, u64),
    (cost, calls, tokens): (f64, usize, u64),
) -> Result<(), BudgetError> {
    let mut overruns = Vec::new();
    if cost > cost_limit {
        overruns.push(BudgetOverrun {
            dimension: BudgetDimension::Cost,
            limit: cost_limit,
            requested: cost,
            excess: cost - cost_limit,
        });
    }
    if tokens > token_limit {
        overruns.push(BudgetOverrun {
            dimension: BudgetDimension::Tokens,
            limit: token_limit as f64,
            requested: tokens as f64,
            excess: (tokens - token_limit) as f64,
        });
    }
    let call_limit = call_limit as usize;
    if calls > call_limit {
        overruns.push(BudgetOverrun {
            dimension: BudgetDimension::Calls,
            limit: call_limit as f64,
            requested: calls as f64,
            excess: (calls - call_limit) as f64,
        });
    }
    if overruns.is_empty() {
        Ok(())
    } else {
        Err(BudgetError { overruns })
    }
}
