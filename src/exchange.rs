pub mod graph;
pub mod solver;

pub use graph::{
    Bid, BidId, BidPortfolio, CapacityConstraint, CommodityRequests, ExchangeGraph, Request,
    RequestId, RequestPortfolio, RequestStub, TradeArc,
};
pub use solver::{Match, solve};

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use crate::agent::{AgentId, AgentMeta, AgentRegistry, Archetype};
use crate::context::Context;
use crate::error::{SimError, SimResult};
use crate::resource::material::Material;
use crate::resource::product::Product;
use crate::resource::{QTY_EPS, ResourceLike};
use crate::trader::Trader;

/// Stand-in for an unbounded request quantity; exemplar resources must
/// stay finite.
pub const MAX_REQUEST_QTY: f64 = 1e299;

/// A named family of tradable resources; requests and bids are scoped per
/// commodity.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Commodity(String);

impl Commodity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Commodity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Commodity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Commodity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A matched arc as seen by the two executing parties.
#[derive(Debug, Clone)]
pub struct Trade<R> {
    /// The request being satisfied.
    pub request: RequestStub<R>,
    pub bidder: AgentId,
    /// Agreed quantity.
    pub qty: f64,
    /// Recorded into the `Transactions` row.
    pub price: f64,
}

/// A bidder's answer to one matched trade: the actual resource.
#[derive(Debug, Clone)]
pub struct TradeResponse<R> {
    pub trade: Trade<R>,
    pub resource: R,
}

/// One arc's preference, exposed to ancestor policy layers.
#[derive(Debug, Clone)]
pub struct PrefEntry {
    pub request: RequestId,
    pub bid: BidId,
    pub bidder: AgentId,
    pub commodity: Commodity,
    /// Mutable preference; negative drops the arc.
    pub pref: f64,
}

/// All arcs of one requester, handed up its institution → region chain
/// for reweighting between graph construction and resolution.
#[derive(Debug, Clone)]
pub struct PrefAdjustment {
    pub requester: AgentId,
    pub entries: Vec<PrefEntry>,
}

/// Binds a resource family to the archetype capability surface that trades
/// it, so one exchange implementation serves both families.
pub trait TradeFamily: ResourceLike {
    const LABEL: &'static str;

    fn trader_of<'a>(behavior: &'a mut dyn Archetype) -> Option<&'a mut dyn Trader<Self>>;

    fn adjust_prefs(
        behavior: &mut dyn Archetype,
        ctx: &mut Context,
        own: &AgentMeta,
        prefs: &mut PrefAdjustment,
    );
}

impl TradeFamily for Material {
    const LABEL: &'static str = "material";

    fn trader_of<'a>(behavior: &'a mut dyn Archetype) -> Option<&'a mut dyn Trader<Self>> {
        behavior.material_trader()
    }

    fn adjust_prefs(
        behavior: &mut dyn Archetype,
        ctx: &mut Context,
        own: &AgentMeta,
        prefs: &mut PrefAdjustment,
    ) {
        behavior.adjust_material_prefs(ctx, own, prefs);
    }
}

impl TradeFamily for Product {
    const LABEL: &'static str = "product";

    fn trader_of<'a>(behavior: &'a mut dyn Archetype) -> Option<&'a mut dyn Trader<Self>> {
        behavior.product_trader()
    }

    fn adjust_prefs(
        behavior: &mut dyn Archetype,
        ctx: &mut Context,
        own: &AgentMeta,
        prefs: &mut PrefAdjustment,
    ) {
        behavior.adjust_product_prefs(ctx, own, prefs);
    }
}

/// The per-timestep, per-family resolution: collect requests, solicit
/// bids, evaluate and adjust preferences, match, and execute trades.
///
/// Agent failures during the request/bid phases drop that agent's
/// portfolios and are recorded against it; they never affect other
/// agents. Fatal (backend) errors propagate.
pub struct ResourceExchange<R: TradeFamily> {
    _family: PhantomData<R>,
}

impl<R: TradeFamily> Default for ResourceExchange<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: TradeFamily> ResourceExchange<R> {
    pub fn new() -> Self {
        Self {
            _family: PhantomData,
        }
    }

    /// Runs one full resolution for this family.
    pub fn resolve(&self, ctx: &mut Context, agents: &mut AgentRegistry) -> SimResult<()> {
        let span = info_span!("dre", family = R::LABEL, t = ctx.time());
        let _enter = span.enter();

        let traders = trader_ids::<R>(agents);
        if traders.is_empty() {
            return Ok(());
        }

        // === 1. Request phase ===
        let mut graph = ExchangeGraph::<R>::new();
        let mut commod_requests = CommodityRequests::<R>::default();
        for &id in &traders {
            let collected = with_trader::<R, _, _>(ctx, agents, id, "request", |ctx, meta, t| {
                t.requests(ctx, meta)
            })?;
            let Some(portfolios) = collected else {
                continue;
            };
            for portfolio in portfolios {
                for stub in graph.add_request_portfolio(id, portfolio) {
                    commod_requests.insert(stub);
                }
            }
        }
        if graph.num_requests() == 0 {
            return Ok(());
        }

        // === 2. Bid phase ===
        for &id in &traders {
            let collected = with_trader::<R, _, _>(ctx, agents, id, "bid", |ctx, meta, t| {
                t.bids(ctx, meta, &commod_requests)
            })?;
            let Some(portfolios) = collected else {
                continue;
            };
            for portfolio in portfolios {
                if let Err(err) = graph.add_bid_portfolio(id, portfolio) {
                    warn!(agent = %id, %err, "bid portfolio dropped");
                    ctx.record_error(Some(id), "bid", err.kind(), &err.to_string());
                }
            }
        }
        if graph.num_bids() == 0 {
            return Ok(());
        }

        // === 3. Preference & adjustment phase ===
        let mut arcs = Vec::with_capacity(graph.num_bids());
        for b in 0..graph.num_bids() {
            let bid = graph.bid(BidId(b as u32));
            let (bid_id, request_id, offer) = (bid.id, bid.request, bid.offer.clone());
            let stub = graph.request(request_id).stub.clone();
            let request = Request {
                commodity: stub.commodity.clone(),
                target: stub.target.clone(),
                preference: stub.preference,
                exclusive: stub.exclusive,
            };
            let pref = with_trader::<R, _, _>(
                ctx,
                agents,
                stub.requester,
                "preference",
                |ctx, meta, t| Ok(t.preference(ctx, meta, &request, &offer)),
            )?
            .unwrap_or(-1.0);
            arcs.push(TradeArc {
                request: request_id,
                bid: bid_id,
                pref,
            });
        }

        // Ancestors reweight each requester's arcs, nearest first.
        let mut requesters: Vec<AgentId> =
            (0..graph.num_requests())
                .map(|r| graph.request(RequestId(r as u32)).stub.requester)
                .collect();
        requesters.sort_unstable();
        requesters.dedup();
        for requester in requesters {
            let entries: Vec<PrefEntry> = arcs
                .iter()
                .filter(|arc| graph.request(arc.request).stub.requester == requester)
                .map(|arc| PrefEntry {
                    request: arc.request,
                    bid: arc.bid,
                    bidder: graph.bid(arc.bid).bidder,
                    commodity: graph.request(arc.request).stub.commodity.clone(),
                    pref: arc.pref,
                })
                .collect();
            if entries.is_empty() {
                continue;
            }
            let mut adjustment = PrefAdjustment { requester, entries };
            for ancestor in agents.ancestors(requester) {
                let Some(mut slot) = agents.take(ancestor) else {
                    continue;
                };
                R::adjust_prefs(&mut *slot.behavior, ctx, &slot.meta, &mut adjustment);
                agents.put(slot);
            }
            let adjusted: BTreeMap<(RequestId, BidId), f64> = adjustment
                .entries
                .iter()
                .map(|e| ((e.request, e.bid), e.pref))
                .collect();
            for arc in &mut arcs {
                if let Some(pref) = adjusted.get(&(arc.request, arc.bid)) {
                    arc.pref = *pref;
                }
            }
        }
        graph.set_arcs(arcs);

        // === 4. Match phase ===
        let matches = solve(&graph);
        if matches.is_empty() {
            debug!("no feasible matching");
            return Ok(());
        }

        // === 5. Execution ===
        self.execute(ctx, agents, &graph, matches)
    }

    fn execute(
        &self,
        ctx: &mut Context,
        agents: &mut AgentRegistry,
        graph: &ExchangeGraph<R>,
        matches: Vec<Match>,
    ) -> SimResult<()> {
        // Group matched arcs by bidder, ascending agent id.
        let mut by_bidder: BTreeMap<AgentId, Vec<Trade<R>>> = BTreeMap::new();
        for m in matches {
            let bid = graph.bid(m.bid);
            let stub = graph.request(m.request).stub.clone();
            by_bidder.entry(bid.bidder).or_default().push(Trade {
                request: stub,
                bidder: bid.bidder,
                qty: m.qty,
                price: 0.0,
            });
        }

        // Suppliers split actual resources off their inventories.
        let mut by_requester: BTreeMap<AgentId, Vec<TradeResponse<R>>> = BTreeMap::new();
        for (bidder, trades) in by_bidder {
            let responses = with_trader::<R, _, _>(ctx, agents, bidder, "trade", |ctx, meta, t| {
                t.get_trades(ctx, meta, &trades)
            })?;
            let Some(responses) = responses else {
                continue;
            };
            for response in responses {
                // A bidder that returns the wrong quantity nulls the trade.
                if (response.resource.quantity() - response.trade.qty).abs() > QTY_EPS {
                    warn!(
                        bidder = %bidder,
                        expected = response.trade.qty,
                        got = response.resource.quantity(),
                        "trade nulled: wrong quantity"
                    );
                    ctx.record_error(
                        Some(bidder),
                        "trade",
                        crate::error::ErrorKind::Value,
                        "trade response quantity mismatch",
                    );
                    continue;
                }
                by_requester
                    .entry(response.trade.request.requester)
                    .or_default()
                    .push(response);
            }
        }

        // Requesters take delivery; refusals hand resources back.
        for (requester, responses) in by_requester {
            let pending: Vec<(Commodity, AgentId, crate::resource::ResourceId, f64)> = responses
                .iter()
                .map(|r| {
                    (
                        r.trade.request.commodity.clone(),
                        r.trade.bidder,
                        r.resource.id(),
                        r.trade.price,
                    )
                })
                .collect();
            let returned: Vec<R> = responses.iter().map(|r| r.resource.clone()).collect();

            let accepted = with_trader::<R, _, _>(ctx, agents, requester, "accept", |ctx, meta, t| {
                t.accept_trades(ctx, meta, responses)
            })?;
            match accepted {
                Some(()) => {
                    for (commodity, bidder, resource, price) in pending {
                        ctx.record_transaction(
                            commodity.as_str(),
                            bidder,
                            requester,
                            resource,
                            price,
                        );
                    }
                }
                None => {
                    // Delivery refused: bidders keep their resources.
                    let mut by_bidder_return: BTreeMap<AgentId, Vec<R>> = BTreeMap::new();
                    for (info, resource) in pending.iter().zip(returned) {
                        by_bidder_return.entry(info.1).or_default().push(resource);
                    }
                    for (bidder, resources) in by_bidder_return {
                        let _ = with_trader::<R, _, _>(
                            ctx,
                            agents,
                            bidder,
                            "return",
                            |ctx, meta, t| {
                                t.return_resources(ctx, meta, resources);
                                Ok(())
                            },
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Ascending ids of live agents exposing this family's trader capability.
fn trader_ids<R: TradeFamily>(agents: &mut AgentRegistry) -> Vec<AgentId> {
    let ids = agents.live_ids();
    ids.into_iter()
        .filter(|id| {
            agents
                .get_mut(*id)
                .map(|slot| R::trader_of(&mut *slot.behavior).is_some())
                .unwrap_or(false)
        })
        .collect()
}

/// Runs one trader callback under the kernel's error boundary.
///
/// Returns `Ok(None)` when the agent failed non-fatally (recorded and
/// absorbed, its output discarded) or lacks the capability; fatal errors
/// propagate.
fn with_trader<R, T, F>(
    ctx: &mut Context,
    agents: &mut AgentRegistry,
    id: AgentId,
    phase: &str,
    f: F,
) -> SimResult<Option<T>>
where
    R: TradeFamily,
    F: FnOnce(&mut Context, &AgentMeta, &mut dyn Trader<R>) -> SimResult<T>,
{
    let Some(mut slot) = agents.take(id) else {
        return Ok(None);
    };
    let result = match R::trader_of(&mut *slot.behavior) {
        Some(trader) => f(ctx, &slot.meta, trader),
        None => {
            agents.put(slot);
            return Ok(None);
        }
    };
    agents.put(slot);
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            warn!(agent = %id, phase, %err, "agent failure absorbed");
            record_absorbed(ctx, id, phase, &err);
            Ok(None)
        }
    }
}

fn record_absorbed(ctx: &mut Context, id: AgentId, phase: &str, err: &SimError) {
    ctx.record_error(Some(id), phase, err.kind(), &err.to_string());
}
