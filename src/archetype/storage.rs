use serde::Deserialize;
use serde_json::Value as Config;
use tracing::debug;

use crate::agent::{AgentMeta, Archetype};
use crate::archetype::{Coordinates, parse_config};
use crate::context::Context;
use crate::error::SimResult;
use crate::exchange::graph::{
    Bid, BidPortfolio, CapacityConstraint, CommodityRequests, Request, RequestPortfolio,
};
use crate::exchange::{Commodity, Trade, TradeResponse};
use crate::resource::buffer::ResBuf;
use crate::resource::material::Material;
use crate::resource::{QTY_EPS, ResourceLike};
use crate::trader::Trader;

fn inf() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Commodities accepted into the buffer.
    pub in_commods: Vec<String>,
    /// Commodity offered once material has aged.
    pub out_commod: String,
    /// Exemplar recipe for incoming requests.
    pub in_recipe: Option<String>,
    /// Minimum timesteps a batch sits before it may trade out.
    #[serde(default)]
    pub residence_time: u32,
    /// Per-timestep intake cap.
    #[serde(default = "inf")]
    pub throughput: f64,
    /// Total inventory cap across both buffers.
    #[serde(default = "inf")]
    pub max_inv_size: f64,
    #[serde(flatten)]
    pub position: Coordinates,
}

/// A pass-through store: buys on its input commodities, ages each batch
/// for `residence_time` steps, then offers it on the output commodity.
///
/// Aging happens on Tick, before the step's exchange, so a batch accepted
/// at `t` is biddable from `t + residence_time` onward (never the same
/// resolution it arrived in). Stored material decays lazily under the
/// context's decay interval as batches mature.
pub struct Storage {
    config: StorageConfig,
    /// Batches still aging, tagged with their entry time.
    processing: Vec<(u32, Material)>,
    /// Batches old enough to trade.
    ready: ResBuf<Material>,
}

impl Storage {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        let config: StorageConfig = parse_config(":nucycle:Storage", config)?;
        Ok(Self {
            config,
            processing: Vec::new(),
            ready: ResBuf::unlimited(),
        })
    }

    pub fn total_qty(&self) -> f64 {
        self.processing.iter().map(|(_, m)| m.quantity()).sum::<f64>() + self.ready.quantity()
    }

    pub fn ready_qty(&self) -> f64 {
        self.ready.quantity()
    }

    fn combine(ctx: &mut Context, mut mats: Vec<Material>) -> SimResult<Material> {
        let mut first = mats
            .pop()
            .ok_or(crate::error::ValueError::EmptyComposition)?;
        for mut rest in mats {
            first.absorb(ctx, &mut rest)?;
        }
        Ok(first)
    }
}

impl Archetype for Storage {
    fn spec(&self) -> &'static str {
        ":nucycle:Storage"
    }

    fn enter_notify(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        self.config.position.record(ctx, own)
    }

    fn time_listener(&self) -> bool {
        true
    }

    /// Matured batches move into the tradable buffer, decaying on the way
    /// out if due.
    fn tick(&mut self, ctx: &mut Context, _own: &AgentMeta) -> SimResult<()> {
        let t = ctx.time();
        let residence = self.config.residence_time;
        let mut still_aging = Vec::with_capacity(self.processing.len());
        for (entered, mut mat) in self.processing.drain(..) {
            if entered + residence <= t {
                mat.decay(ctx, t)?;
                debug!(qty = mat.quantity(), entered, "batch matured");
                self.ready.push(mat)?;
            } else {
                still_aging.push((entered, mat));
            }
        }
        self.processing = still_aging;
        Ok(())
    }

    fn material_trader(&mut self) -> Option<&mut dyn Trader<Material>> {
        Some(self)
    }
}

impl Trader<Material> for Storage {
    fn requests(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
    ) -> SimResult<Vec<RequestPortfolio<Material>>> {
        let amt = self
            .config
            .throughput
            .min(self.config.max_inv_size - self.total_qty())
            .min(crate::exchange::MAX_REQUEST_QTY);
        if amt <= QTY_EPS {
            return Ok(Vec::new());
        }
        let comp = match &self.config.in_recipe {
            Some(recipe) => ctx.recipe(recipe)?,
            None => crate::composition::Composition::from_mass([(
                crate::nuclide::NucId::new(1, 1, 0)?,
                1.0,
            )])?,
        };

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

    fn bids(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        requests: &CommodityRequests<Material>,
    ) -> SimResult<Vec<BidPortfolio<Material>>> {
        let available = self.ready.quantity();
        if available <= QTY_EPS {
            return Ok(Vec::new());
        }
        let out_commod = Commodity::from(self.config.out_commod.as_str());

        let mut portfolio = BidPortfolio::new();
        for stub in requests.get(&out_commod) {
            let qty = stub.target.quantity().min(available);
            if qty <= QTY_EPS {
                continue;
            }
            // Exemplar composition from the head of the buffer; the
            // delivered material is the true mix of what gets popped.
            let comp = self
                .ready
                .peek()
                .expect("non-empty buffer")
                .comp()
                .clone();
            let offer = Material::create_untracked(qty, comp)?;
            portfolio.bids.push(Bid::new(stub.id, offer));
        }
        if portfolio.bids.is_empty() {
            return Ok(Vec::new());
        }
        portfolio
            .constraints
            .push(CapacityConstraint::quantity(available));
        Ok(vec![portfolio])
    }

    fn get_trades(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
        trades: &[Trade<Material>],
    ) -> SimResult<Vec<TradeResponse<Material>>> {
        let mut responses = Vec::with_capacity(trades.len());
        for trade in trades {
            let popped = self.ready.pop_qty(ctx, trade.qty)?;
            let mat = Self::combine(ctx, popped)?;
            responses.push(TradeResponse {
                trade: trade.clone(),
                resource: mat,
            });
        }
        Ok(responses)
    }

    fn accept_trades(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
        responses: Vec<TradeResponse<Material>>,
    ) -> SimResult<()> {
        let t = ctx.time();
        for response in responses {
            debug!(qty = response.resource.quantity(), t, "batch stored");
            self.processing.push((t, response.resource));
        }
        Ok(())
    }

    fn return_resources(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        resources: Vec<Material>,
    ) {
        for mat in resources {
            let _ = self.ready.push(mat);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentId, AgentKind, AgentState};
    use crate::composition::Composition;
    use crate::nuclide::NucId;

    fn natu() -> crate::composition::CompRef {
        let u235 = NucId::new(92, 235, 0).unwrap();
        let u238 = NucId::new(92, 238, 0).unwrap();
        Composition::from_mass([(u235, 0.007), (u238, 0.993)]).unwrap()
    }

    fn meta() -> AgentMeta {
        AgentMeta {
            id: AgentId(4),
            kind: AgentKind::Facility,
            prototype: "store".to_string(),
            implementation: ":nucycle:Storage".to_string(),
            parent: None,
            children: Vec::new(),
            enter_time: Some(0),
            exit_time: None,
            state: AgentState::Entered,
        }
    }

    fn store(residence: u32) -> Storage {
        Storage::from_config(&serde_json::json!({
            "in_commods": ["natu"],
            "out_commod": "stored_natu",
            "in_recipe": "natu1",
            "residence_time": residence
        }))
        .unwrap()
    }

    #[test]
    fn batches_age_before_becoming_tradable() {
        let mut ctx = Context::for_testing();
        ctx.add_recipe("natu1", natu()).unwrap();
        let mut store = store(2);

        let mat = Material::create_untracked(3.0, natu()).unwrap();
        store.processing.push((0, mat));

        // t=0 and t=1: still aging.
        store.tick(&mut ctx, &meta()).unwrap();
        assert_eq!(store.ready_qty(), 0.0);
        ctx.timer_mut().advance();
        store.tick(&mut ctx, &meta()).unwrap();
        assert_eq!(store.ready_qty(), 0.0);

        // t=2: matured.
        ctx.timer_mut().advance();
        store.tick(&mut ctx, &meta()).unwrap();
        assert!((store.ready_qty() - 3.0).abs() < QTY_EPS);
        assert!(store.processing.is_empty());
    }

    #[test]
    fn intake_respects_inventory_cap() {
        let mut ctx = Context::for_testing();
        ctx.add_recipe("natu1", natu()).unwrap();
        let mut store = Storage::from_config(&serde_json::json!({
            "in_commods": ["natu"],
            "out_commod": "stored_natu",
            "in_recipe": "natu1",
            "max_inv_size": 5.0,
            "throughput": 2.0
        }))
        .unwrap();

        let portfolios = store.requests(&mut ctx, &meta()).unwrap();
        assert!((portfolios[0].requests[0].target.quantity() - 2.0).abs() < QTY_EPS);

        store
            .processing
            .push((0, Material::create_untracked(4.0, natu()).unwrap()));
        let portfolios = store.requests(&mut ctx, &meta()).unwrap();
        assert!((portfolios[0].requests[0].target.quantity() - 1.0).abs() < QTY_EPS);
    }
}
