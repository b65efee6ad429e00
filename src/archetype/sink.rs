use serde::Deserialize;
use serde_json::Value as Config;
use tracing::debug;

use crate::agent::{AgentMeta, Archetype};
use crate::archetype::{Coordinates, parse_config};
use crate::composition::{CompRef, Composition};
use crate::context::Context;
use crate::error::SimResult;
use crate::exchange::graph::{CapacityConstraint, Request, RequestPortfolio};
use crate::exchange::{Trade, TradeResponse};
use crate::nuclide::NucId;
use crate::resource::buffer::ResBuf;
use crate::resource::material::Material;
use crate::resource::{QTY_EPS, ResourceLike};
use crate::trader::Trader;

fn inf() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Commodities this sink accepts, in request order.
    pub in_commods: Vec<String>,
    /// Recipe describing the wanted composition; without one the sink
    /// takes whatever matches its commodities.
    #[serde(default)]
    pub recipe: Option<String>,
    /// Per-timestep intake cap.
    #[serde(default = "inf")]
    pub capacity: f64,
    /// Total inventory cap.
    #[serde(default = "inf")]
    pub max_inv_size: f64,
    #[serde(flatten)]
    pub position: Coordinates,
}

/// A terminal facility that requests and stores material.
pub struct Sink {
    config: SinkConfig,
    inventory: ResBuf<Material>,
}

impl Sink {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        let config: SinkConfig = parse_config(":nucycle:Sink", config)?;
        Ok(Self {
            inventory: ResBuf::new(config.max_inv_size),
            config,
        })
    }

    pub fn inventory_qty(&self) -> f64 {
        self.inventory.quantity()
    }

    fn target_comp(&self, ctx: &Context) -> SimResult<CompRef> {
        match &self.config.recipe {
            Some(recipe) => ctx.recipe(recipe),
            // No recipe: an indifferent placeholder exemplar.
            None => Composition::from_mass([(NucId::new(1, 1, 0)?, 1.0)]),
        }
    }
}

impl Archetype for Sink {
    fn spec(&self) -> &'static str {
        ":nucycle:Sink"
    }

    fn enter_notify(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        self.config.position.record(ctx, own)
    }

    fn material_trader(&mut self) -> Option<&mut dyn Trader<Material>> {
        Some(self)
    }
}

impl Trader<Material> for Sink {
    fn requests(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
    ) -> SimResult<Vec<RequestPortfolio<Material>>> {
        let amt = self
            .config
            .capacity
            .min(self.inventory.space())
            .min(crate::exchange::MAX_REQUEST_QTY);
        if amt <= QTY_EPS {
            return Ok(Vec::new());
        }
        let comp = self.target_comp(ctx)?;

        // One request per commodity; the shared constraint keeps the total
        // across commodities at the step's intake.
        let mut portfolio = RequestPortfolio::new();
        for commod in &self.config.in_commods {
            let target = Material::create_untracked(amt, comp.clone())?;
            portfolio.requests.push(Request::new(commod.as_str(), target));
        }
        portfolio
            .constraints
            .push(CapacityConstraint::quantity(amt));
        Ok(vec![portfolio])
    }

    fn get_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _trades: &[Trade<Material>],
    ) -> SimResult<Vec<TradeResponse<Material>>> {
        Ok(Vec::new())
    }

    fn accept_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        responses: Vec<TradeResponse<Material>>,
    ) -> SimResult<()> {
        for response in responses {
            debug!(
                qty = response.resource.quantity(),
                commod = %response.trade.request.commodity,
                "sink stored"
            );
            self.inventory.push(response.resource)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentId, AgentKind, AgentState};

    fn leu() -> CompRef {
        let u235 = NucId::new(92, 235, 0).unwrap();
        let u238 = NucId::new(92, 238, 0).unwrap();
        Composition::from_mass([(u235, 0.04), (u238, 0.96)]).unwrap()
    }

    fn meta() -> AgentMeta {
        AgentMeta {
            id: AgentId(2),
            kind: AgentKind::Facility,
            prototype: "sink".to_string(),
            implementation: ":nucycle:Sink".to_string(),
            parent: None,
            children: Vec::new(),
            enter_time: Some(0),
            exit_time: None,
            state: AgentState::Entered,
        }
    }

    #[test]
    fn requests_shrink_as_inventory_fills() {
        let mut ctx = Context::for_testing();
        ctx.add_recipe("leu", leu()).unwrap();
        let mut sink = Sink::from_config(&serde_json::json!({
            "in_commods": ["enr_u"], "recipe": "leu",
            "capacity": 1.0, "max_inv_size": 1.5
        }))
        .unwrap();

        let portfolios = sink.requests(&mut ctx, &meta()).unwrap();
        assert!((portfolios[0].requests[0].target.quantity() - 1.0).abs() < QTY_EPS);

        // Store 1.0 kg; only 0.5 kg of space remains.
        let mat = Material::create_untracked(1.0, leu()).unwrap();
        sink.inventory.push(mat).unwrap();
        let portfolios = sink.requests(&mut ctx, &meta()).unwrap();
        assert!((portfolios[0].requests[0].target.quantity() - 0.5).abs() < QTY_EPS);

        // Full: no requests at all.
        let mat = Material::create_untracked(0.5, leu()).unwrap();
        sink.inventory.push(mat).unwrap();
        assert!(sink.requests(&mut ctx, &meta()).unwrap().is_empty());
    }

    #[test]
    fn multiple_commodities_share_one_cap() {
        let mut ctx = Context::for_testing();
        ctx.add_recipe("leu", leu()).unwrap();
        let mut sink = Sink::from_config(&serde_json::json!({
            "in_commods": ["enr_u", "mox"], "recipe": "leu", "capacity": 2.0
        }))
        .unwrap();

        let portfolios = sink.requests(&mut ctx, &meta()).unwrap();
        assert_eq!(portfolios.len(), 1);
        assert_eq!(portfolios[0].requests.len(), 2);
        assert_eq!(portfolios[0].constraints.len(), 1);
        assert!((portfolios[0].constraints[0].capacity() - 2.0).abs() < QTY_EPS);
    }
}
