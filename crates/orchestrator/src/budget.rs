//! Cost calculation, the budget gate, and usage tracking.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::instrument;
use workflow_runtime_common::error::{Error, Result};
use workflow_runtime_common::types::{Cost, ModelId, ModelPricing, ModelRole, Run, TokenCount};
use workflow_runtime_core::{BudgetEnforcer, CostCalculator, UsageTracker};

/// Resolves model pricing and role lookups against a static catalog.
#[derive(Debug, Default)]
pub struct CatalogCostCalculator {
    catalog: HashMap<String, ModelPricing>,
}

impl CatalogCostCalculator {
    #[must_use]
    pub fn new(catalog: HashMap<String, ModelPricing>) -> Self {
        Self { catalog }
    }
}

impl CostCalculator for CatalogCostCalculator {
    #[instrument(skip(self))]
    fn estimate_cost(&self, tokens: TokenCount, model: &ModelId) -> Result<Cost> {
        let pricing = self
            .catalog
            .get(&model.0)
            .ok_or_else(|| Error::ModelUnknown(model.to_string()))?;
        let avg_per_million = (pricing.input_per_million + pricing.output_per_million) / 2.0;
        let amount = (tokens as f64) * avg_per_million / 1_000_000.0;
        Ok(Cost {
            amount,
            currency: "USD".to_string(),
        })
    }

    fn resolve_role(&self, role: ModelRole) -> Option<ModelId> {
        self.catalog
            .iter()
            .find(|(_, pricing)| pricing.default_role == Some(role))
            .map(|(id, _)| ModelId(id.clone()))
    }
}

/// Mutex-serialized pre-execution spend gate and post-execution
/// recorder. The mutex is per-run in practice (one instance guards one
/// `Run`), matching the spec's "serializes with a mutex" wording.
#[derive(Debug, Default)]
pub struct DefaultBudgetEnforcer {
    lock: Mutex<()>,
}

impl DefaultBudgetEnforcer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, run: &Run, estimate: &Cost) -> Result<()> {
        if run.policy.budget_limit.amount <= 0.0 {
            return Err(Error::BudgetNotSet);
        }
        if !run.policy.budget_limit.is_unset_currency()
            && !estimate.is_unset_currency()
            && run.policy.budget_limit.currency != estimate.currency
        {
            return Err(Error::InvalidInput(format!(
                "currency mismatch: budget={} estimate={}",
                run.policy.budget_limit.currency, estimate.currency
            )));
        }
        if run.usage.cost.amount + estimate.amount > run.policy.budget_limit.amount {
            return Err(Error::BudgetExceeded);
        }
        Ok(())
    }
}

impl BudgetEnforcer for DefaultBudgetEnforcer {
    #[instrument(skip(self, run, estimate))]
    fn allow(&self, run: &Run, estimate: &Cost) -> Result<()> {
        let _guard = self.lock.lock();
        self.check(run, estimate)
    }

    #[instrument(skip(self, run, actual))]
    fn record(&self, run: &mut Run, actual: &Cost) -> Result<()> {
        let _guard = self.lock.lock();
        self.check(run, actual)?;
        run.usage.cost.amount += actual.amount;
        if run.usage.cost.is_unset_currency() {
            run.usage.cost.currency = actual.currency.clone();
        }
        Ok(())
    }
}

/// Accumulates token usage only; never touches cost.
#[derive(Debug, Default)]
pub struct DefaultUsageTracker;

impl DefaultUsageTracker {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl UsageTracker for DefaultUsageTracker {
    fn add(&self, run: &mut Run, tokens: TokenCount) {
        run.usage.tokens += tokens;
    }
}
