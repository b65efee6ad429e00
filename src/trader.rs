use crate::agent::AgentMeta;
use crate::context::Context;
use crate::error::SimResult;
use crate::exchange::graph::{BidPortfolio, CommodityRequests, Request, RequestPortfolio};
use crate::exchange::{Trade, TradeResponse};
use crate::resource::ResourceLike;

/// The capability set of an agent willing to trade one resource family.
///
/// The exchange drives these callbacks once per resolution: request
/// collection, bid provision against incoming requests, per-arc preference
/// evaluation, and finally trade execution on both sides of each matched
/// arc. Every method except the execution pair has a neutral default, so a
/// pure supplier or pure consumer implements only its half.
pub trait Trader<R: ResourceLike> {
    /// Called at resolve time to collect this agent's demand.
    fn requests(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
    ) -> SimResult<Vec<RequestPortfolio<R>>> {
        Ok(Vec::new())
    }

    /// Called with every request of the resolution, indexed by commodity;
    /// the trader answers with bids for the commodities it serves.
    fn bids(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _requests: &CommodityRequests<R>,
    ) -> SimResult<Vec<BidPortfolio<R>>> {
        Ok(Vec::new())
    }

    /// Requester-side preference for `offer` against one of this agent's
    /// requests. Arcs with negative preference are dropped from matching.
    ///
    /// The default scales the request's base preference by the offer's
    /// intrinsic preference (for materials: fissile content).
    fn preference(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        request: &Request<R>,
        offer: &R,
    ) -> f64 {
        request.preference * offer.default_preference()
    }

    /// Supply side of execution: split the agreed quantities off inventory
    /// and hand them over. A response whose quantity disagrees with its
    /// trade is nulled by the exchange.
    fn get_trades(
        &mut self,
        ctx: &mut Context,
        own: &AgentMeta,
        trades: &[Trade<R>],
    ) -> SimResult<Vec<TradeResponse<R>>>;

    /// Demand side of execution: take delivery of matched resources.
    fn accept_trades(
        &mut self,
        ctx: &mut Context,
        own: &AgentMeta,
        responses: Vec<TradeResponse<R>>,
    ) -> SimResult<()>;

    /// Hands resources back after a requester refused delivery; the
    /// default drops them on the floor, suppliers usually restock.
    fn return_resources(&mut self, _ctx: &mut Context, _own: &AgentMeta, _resources: Vec<R>) {}
}
