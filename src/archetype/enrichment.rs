use serde::Deserialize;
use serde_json::Value as Config;
use tracing::{debug, trace};

use crate::agent::{AgentMeta, Archetype};
use crate::archetype::{Coordinates, parse_config};
use crate::composition::Composition;
use crate::context::Context;
use crate::error::{SimResult, ValueError};
use crate::exchange::graph::{
    Bid, BidPortfolio, CapacityConstraint, CommodityRequests, Request, RequestPortfolio,
};
use crate::exchange::{Commodity, Trade, TradeResponse};
use crate::nuclide::NucId;
use crate::resource::buffer::ResBuf;
use crate::resource::material::Material;
use crate::resource::{QTY_EPS, ResourceLike};
use crate::trader::Trader;

fn inf() -> f64 {
    f64::INFINITY
}

fn default_tails_assay() -> f64 {
    0.003
}

fn default_max_enrich() -> f64 {
    1.0
}

fn default_order_prefs() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub feed_commod: String,
    pub feed_recipe: String,
    pub product_commod: String,
    pub tails_commod: String,
    #[serde(default = "default_tails_assay")]
    pub tails_assay: f64,
    /// Highest product assay this plant will produce.
    #[serde(default = "default_max_enrich")]
    pub max_enrich: f64,
    /// Feed buffer target; requests top the inventory up to this level.
    #[serde(default = "inf")]
    pub max_feed_inventory: f64,
    /// Feed present at startup.
    #[serde(default)]
    pub initial_feed: f64,
    /// Separative work available per timestep.
    #[serde(default = "inf")]
    pub swu_capacity: f64,
    /// When false, offers are not ranked by fissile content.
    #[serde(default = "default_order_prefs")]
    pub order_prefs: bool,
    #[serde(flatten)]
    pub position: Coordinates,
}

/// An enrichment facility: buys feed on one commodity, sells enriched
/// product and depleted tails on two others.
///
/// Production follows the standard separative-work model. Offered product
/// is bounded by both the feed on hand and the per-step SWU capacity; both
/// bounds ride into the exchange as bid-portfolio constraints so the
/// matcher, not the facility, settles contention between requests.
pub struct Enrichment {
    config: EnrichmentConfig,
    inventory: ResBuf<Material>,
    tails: ResBuf<Material>,
}

// ================================================================================================
// Separative work
// ================================================================================================

/// The value function `V(x) = (1 - 2x) · ln((1 - x) / x)`.
pub fn value_func(x: f64) -> f64 {
    (1.0 - 2.0 * x) * ((1.0 - x) / x).ln()
}

/// Mass fraction of U-235 within the uranium content of a composition.
pub fn uranium_assay(comp: &Composition) -> f64 {
    let u235 = comp.mass_frac(NucId::new(92, 235, 0).expect("static id"));
    let u238 = comp.mass_frac(NucId::new(92, 238, 0).expect("static id"));
    if u235 + u238 <= 0.0 {
        return 0.0;
    }
    u235 / (u235 + u238)
}

/// Feed required per unit product: `(x_p - x_t) / (x_f - x_t)`.
pub fn feed_per_product(product_assay: f64, feed_assay: f64, tails_assay: f64) -> f64 {
    (product_assay - tails_assay) / (feed_assay - tails_assay)
}

/// Separative work per unit product:
/// `V(x_p) + (F/P - 1)·V(x_t) - (F/P)·V(x_f)`.
pub fn swu_per_product(product_assay: f64, feed_assay: f64, tails_assay: f64) -> f64 {
    let fpp = feed_per_product(product_assay, feed_assay, tails_assay);
    value_func(product_assay) + (fpp - 1.0) * value_func(tails_assay)
        - fpp * value_func(feed_assay)
}

impl Enrichment {
    pub fn from_config(config: &Config) -> SimResult<Self> {
        let config: EnrichmentConfig = parse_config(":nucycle:Enrichment", config)?;
        Ok(Self {
            config,
            inventory: ResBuf::unlimited(),
            tails: ResBuf::unlimited(),
        })
    }

    pub fn feed_qty(&self) -> f64 {
        self.inventory.quantity()
    }

    pub fn tails_qty(&self) -> f64 {
        self.tails.quantity()
    }

    /// Whether a product request is one this plant can serve: a uranium
    /// target strictly above the tails assay and within `max_enrich`.
    fn valid_req(&self, product_assay: f64, target: &Material) -> bool {
        let u238 = target
            .comp()
            .mass_frac(NucId::new(92, 238, 0).expect("static id"));
        u238 > 0.0
            && product_assay > self.config.tails_assay
            && product_assay <= self.config.max_enrich
    }

    fn combine(ctx: &mut Context, mut mats: Vec<Material>) -> SimResult<Material> {
        let mut first = mats
            .pop()
            .ok_or(ValueError::EmptyComposition)?;
        for mut rest in mats {
            first.absorb(ctx, &mut rest)?;
        }
        Ok(first)
    }
}

impl Archetype for Enrichment {
    fn spec(&self) -> &'static str {
        ":nucycle:Enrichment"
    }

    fn enter_notify(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        self.config.position.record(ctx, own)?;
        if self.config.initial_feed > QTY_EPS {
            let comp = ctx.recipe(&self.config.feed_recipe)?;
            let mat = Material::create(ctx, own.id, self.config.initial_feed, comp)?;
            self.inventory.push(mat)?;
        }
        Ok(())
    }

    fn material_trader(&mut self) -> Option<&mut dyn Trader<Material>> {
        Some(self)
    }

    /// Agent-private state rows, written at decommission.
    fn snapshot(&mut self, ctx: &mut Context, own: &AgentMeta) -> SimResult<()> {
        let sim = ctx.sim_id().0;
        ctx.new_datum("EnrichmentInventories")
            .add_val("SimId", sim)
            .add_val("AgentId", own.id.0)
            .add_val("FeedQty", self.inventory.quantity())
            .add_val("TailsQty", self.tails.quantity())
            .record()
    }
}

impl Trader<Material> for Enrichment {
    fn requests(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
    ) -> SimResult<Vec<RequestPortfolio<Material>>> {
        // An unbounded buffer still needs a finite request quantity.
        let amt = (self.config.max_feed_inventory - self.inventory.quantity())
            .min(crate::exchange::MAX_REQUEST_QTY);
        if amt <= QTY_EPS {
            return Ok(Vec::new());
        }
        let comp = ctx.recipe(&self.config.feed_recipe)?;
        let target = Material::create_untracked(amt, comp)?;
        Ok(vec![
            RequestPortfolio::new()
                .with_request(Request::new(self.config.feed_commod.as_str(), target))
                .with_constraint(CapacityConstraint::quantity(amt)),
        ])
    }

    fn bids(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
        requests: &CommodityRequests<Material>,
    ) -> SimResult<Vec<BidPortfolio<Material>>> {
        let mut portfolios = Vec::new();
        let feed_comp = ctx.recipe(&self.config.feed_recipe)?;
        let xf = uranium_assay(&feed_comp);
        let xt = self.config.tails_assay;

        // === Product bids ===
        let feed_qty = self.inventory.quantity();
        if feed_qty > QTY_EPS {
            let mut portfolio = BidPortfolio::new();
            let product_commod = Commodity::from(self.config.product_commod.as_str());
            for stub in requests.get(&product_commod) {
                let xp = uranium_assay(stub.target.comp());
                if !self.valid_req(xp, &stub.target) {
                    trace!(request = %stub.id, xp, "product request rejected");
                    continue;
                }
                let fpp = feed_per_product(xp, xf, xt);
                let spp = swu_per_product(xp, xf, xt);
                let qty = stub
                    .target
                    .quantity()
                    .min(feed_qty / fpp)
                    .min(self.config.swu_capacity / spp);
                if qty <= QTY_EPS {
                    continue;
                }
                let offer = Material::create_untracked(qty, stub.target.comp().clone())?;
                portfolio.bids.push(Bid::new(stub.id, offer));
            }
            if !portfolio.bids.is_empty() {
                // Feed and separative work bound the portfolio as a whole;
                // the rate of both scales with the offered assay.
                portfolio.constraints.push(CapacityConstraint::new(
                    feed_qty,
                    move |offer: &Material| {
                        feed_per_product(uranium_assay(offer.comp()), xf, xt)
                    },
                ));
                portfolio.constraints.push(CapacityConstraint::new(
                    self.config.swu_capacity,
                    move |offer: &Material| {
                        swu_per_product(uranium_assay(offer.comp()), xf, xt)
                    },
                ));
                portfolios.push(portfolio);
            }
        }

        // === Tails bids ===
        if self.tails.quantity() > QTY_EPS {
            let mut portfolio = BidPortfolio::new();
            let tails_commod = Commodity::from(self.config.tails_commod.as_str());
            for stub in requests.get(&tails_commod) {
                // One bid per buffer element; the matcher trims to demand.
                for element in self.tails.iter() {
                    let offer =
                        Material::create_untracked(element.quantity(), element.comp().clone())?;
                    portfolio.bids.push(Bid::new(stub.id, offer));
                }
            }
            if !portfolio.bids.is_empty() {
                portfolio
                    .constraints
                    .push(CapacityConstraint::quantity(self.tails.quantity()));
                portfolios.push(portfolio);
            }
        }

        Ok(portfolios)
    }

    fn preference(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        request: &Request<Material>,
        offer: &Material,
    ) -> f64 {
        if request.commodity.as_str() == self.config.feed_commod {
            // Feed below the tails assay is worthless to enrich.
            if uranium_assay(offer.comp()) <= self.config.tails_assay {
                return -1.0;
            }
            if !self.config.order_prefs {
                return request.preference;
            }
        }
        request.preference * offer.default_preference()
    }

    fn get_trades(
        &mut self,
        ctx: &mut Context,
        _own: &AgentMeta,
        trades: &[Trade<Material>],
    ) -> SimResult<Vec<TradeResponse<Material>>> {
        let feed_comp = ctx.recipe(&self.config.feed_recipe)?;
        let xf = uranium_assay(&feed_comp);
        let xt = self.config.tails_assay;

        let mut responses = Vec::with_capacity(trades.len());
        for trade in trades {
            let commod = trade.request.commodity.as_str();
            if commod == self.config.product_commod {
                let xp = uranium_assay(trade.request.target.comp());
                let feed_needed =
                    (feed_per_product(xp, xf, xt) * trade.qty).min(self.inventory.quantity());
                let popped = self.inventory.pop_qty(ctx, feed_needed)?;
                let mut feed = Self::combine(ctx, popped)?;
                let product =
                    feed.extract_comp(ctx, trade.qty, trade.request.target.comp(), 1e-9)?;
                debug!(
                    product = trade.qty,
                    feed = feed_needed,
                    tails = feed.quantity(),
                    "enriched"
                );
                if feed.quantity() > QTY_EPS {
                    self.tails.push(feed)?;
                }
                responses.push(TradeResponse {
                    trade: trade.clone(),
                    resource: product,
                });
            } else if commod == self.config.tails_commod {
                let popped = self.tails.pop_qty(ctx, trade.qty)?;
                let mat = Self::combine(ctx, popped)?;
                responses.push(TradeResponse {
                    trade: trade.clone(),
                    resource: mat,
                });
            }
        }
        Ok(responses)
    }

    fn accept_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        responses: Vec<TradeResponse<Material>>,
    ) -> SimResult<()> {
        for response in responses {
            debug!(qty = response.resource.quantity(), "feed received");
            self.inventory.push(response.resource)?;
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
            // Undeliverable product goes back into the feed ledger as-is.
            let _ = self.inventory.push(mat);
        }
    }
}
