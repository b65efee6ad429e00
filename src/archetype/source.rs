use serde::Deserialize;
use serde_json::Value as Config;
use tracing::debug;

use crate::agent::{AgentMeta, Archetype};
use crate::archetype::{Coordinates, parse_config};
use crate::context::Context;
use crate::error::SimResult;
use crate::exchange::graph::{Bid, BidPortfolio, CapacityConstraint, CommodityRequests};
use crate::exchange::{Commodity, Trade, TradeResponse};
use crate::resource::material::Material;
use crate::resource::{QTY_EPS, ResourceLike};
use crate::trader::Trader;

fn inf() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Commodity offered.
    pub commod: String,
    /// Recipe of the produced material.
    pub recipe: String,
    /// Per-timestep production cap.
    #[serde(default = "inf")]
    pub throughput: f64,
    /// Lifetime production cap.
    #[serde(default = "inf")]
    pub inventory_size: f64,
    #[serde(flatten)]
    pub position: Coordinates,
}

/// A facility that produces material of a fixed recipe on demand.
///
/// Bids on every request for its commodity, bounded per timestep by
/// `throughput` and over its lifetime by `inventory_size`. The matter it
/// creates enters the simulation from outside; conservation accounting
/// treats sources as external producers.
pub struct Source {
    config: SourceConfig,
    /// Lifetime production still available.
    remaining: f64,
}

impl Source {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        let config: SourceConfig = parse_config(":nucycle:Source", config)?;
        Ok(Self {
            remaining: config.inventory_size,
            config,
        })
    }

    fn step_capacity(&self) -> f64 {
        self.config.throughput.min(self.remaining)
    }
}

impl Archetype for Source {
    fn spec(&self) -> &'static str {
        ":nucycle:Source"
    }

    fn enter_notify(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        self.config.position.record(ctx, own)
    }

    fn material_trader(&mut self) -> Option<&mut dyn Trader<Material>> {
        Some(self)
    }
}

impl Trader<Material> for Source {
    fn bids(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
        requests: &CommodityRequests<Material>,
    ) -> SimResult<Vec<BidPortfolio<Material>>> {
        let cap = self.step_capacity();
        if cap <= QTY_EPS {
            return Ok(Vec::new());
        }
        let comp = ctx.recipe(&self.config.recipe)?;
        let commod = Commodity::from(self.config.commod.as_str());

        let mut portfolio = BidPortfolio::new();
        for stub in requests.get(&commod) {
            let qty = stub.target.quantity().min(cap);
            if qty <= QTY_EPS {
                continue;
            }
            let offer = Material::create_untracked(qty, comp.clone())?;
            portfolio.bids.push(Bid::new(stub.id, offer));
        }
        if portfolio.bids.is_empty() {
            return Ok(Vec::new());
        }
        // One cap across all bids of the step.
        portfolio
            .constraints
            .push(CapacityConstraint::quantity(cap));
        Ok(vec![portfolio])
    }

    fn get_trades(
        &mut self,
        ctx: &mut Context,
        own: &AgentMeta,
        trades: &[Trade<Material>],
    ) -> SimResult<Vec<TradeResponse<Material>>> {
        let comp = ctx.recipe(&self.config.recipe)?;
        let mut responses = Vec::with_capacity(trades.len());
        for trade in trades {
            let mat = Material::create(ctx, own.id, trade.qty, comp.clone())?;
            self.remaining -= trade.qty;
            debug!(qty = trade.qty, commod = %trade.request.commodity, "source shipped");
            responses.push(TradeResponse {
                trade: trade.clone(),
                resource: mat,
            });
        }
        Ok(responses)
    }

    fn accept_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _responses: Vec<TradeResponse<Material>>,
    ) -> SimResult<()> {
        Ok(())
    }

    /// Refused shipments vanish back into the source's ledger.
    fn return_resources(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        resources: Vec<Material>,
    ) {
        for mat in resources {
            self.remaining += mat.quantity();
        }
    }
}
