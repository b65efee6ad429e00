use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::agent::AgentId;
use crate::error::{KeyError, SimResult};
use crate::exchange::Commodity;
use crate::impl_display_primitive;
use crate::resource::ResourceLike;

/// Index of a request node within one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u32);
impl_display_primitive!(RequestId);

/// Index of a bid node within one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BidId(pub u32);
impl_display_primitive!(BidId);

/// A trader's declared need: an exemplar describing what is wanted.
#[derive(Debug, Clone)]
pub struct Request<R> {
    pub commodity: Commodity,
    /// Exemplar resource; its quantity is the requested amount.
    pub target: R,
    /// Base preference weight; the requester's preference function scales
    /// from here.
    pub preference: f64,
    /// All-or-nothing: at most one arc, at the full target quantity.
    pub exclusive: bool,
}

impl<R> Request<R> {
    pub fn new(commodity: impl Into<Commodity>, target: R) -> Self {
        Self {
            commodity: commodity.into(),
            target,
            preference: 1.0,
            exclusive: false,
        }
    }
}

/// An offer to supply a resource against a specific request.
#[derive(Debug, Clone)]
pub struct Bid<R> {
    /// The request this bid answers.
    pub request: RequestId,
    /// Offered resource; its quantity is the offered amount.
    pub offer: R,
    /// All-or-nothing: matched at the full offer quantity or not at all;
    /// at most one exclusive bid per (portfolio, request) group.
    pub exclusive: bool,
}

impl<R> Bid<R> {
    pub fn new(request: RequestId, offer: R) -> Self {
        Self {
            request,
            offer,
            exclusive: false,
        }
    }
}

/// A linear capacity bound shared by every request or bid of a portfolio.
///
/// `rate` maps a flowing resource exemplar to constraint units consumed per
/// unit of quantity; total consumption across the portfolio's arcs may not
/// exceed `capacity`.
pub struct CapacityConstraint<R> {
    capacity: f64,
    rate: Rc<dyn Fn(&R) -> f64>,
}

impl<R> CapacityConstraint<R> {
    pub fn new(capacity: f64, rate: impl Fn(&R) -> f64 + 'static) -> Self {
        Self {
            capacity,
            rate: Rc::new(rate),
        }
    }

    /// A plain quantity cap: one constraint unit per resource unit.
    pub fn quantity(capacity: f64) -> Self {
        Self::new(capacity, |_| 1.0)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Constraint units consumed per unit of `exemplar`.
    pub fn rate(&self, exemplar: &R) -> f64 {
        (self.rate)(exemplar)
    }
}

impl<R> Clone for CapacityConstraint<R> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            rate: Rc::clone(&self.rate),
        }
    }
}

impl<R> fmt::Debug for CapacityConstraint<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityConstraint")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Requests sharing capacity constraints.
#[derive(Debug, Clone, Default)]
pub struct RequestPortfolio<R> {
    pub requests: Vec<Request<R>>,
    pub constraints: Vec<CapacityConstraint<R>>,
}

impl<R> RequestPortfolio<R> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_request(mut self, request: Request<R>) -> Self {
        self.requests.push(request);
        self
    }

    pub fn with_constraint(mut self, constraint: CapacityConstraint<R>) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Bids sharing capacity constraints; symmetric to [`RequestPortfolio`].
#[derive(Debug, Clone, Default)]
pub struct BidPortfolio<R> {
    pub bids: Vec<Bid<R>>,
    pub constraints: Vec<CapacityConstraint<R>>,
}

impl<R> BidPortfolio<R> {
    pub fn new() -> Self {
        Self {
            bids: Vec::new(),
            constraints: Vec::new(),
        }
    }

    pub fn with_bid(mut self, bid: Bid<R>) -> Self {
        self.bids.push(bid);
        self
    }

    pub fn with_constraint(mut self, constraint: CapacityConstraint<R>) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Read-only view of one request handed to bidders.
#[derive(Debug, Clone)]
pub struct RequestStub<R> {
    pub id: RequestId,
    pub commodity: Commodity,
    pub target: R,
    pub requester: AgentId,
    pub preference: f64,
    pub exclusive: bool,
}

/// All requests of a resolution, indexed by commodity.
#[derive(Debug, Clone)]
pub struct CommodityRequests<R> {
    by_commod: BTreeMap<Commodity, Vec<RequestStub<R>>>,
}

impl<R> Default for CommodityRequests<R> {
    fn default() -> Self {
        Self {
            by_commod: BTreeMap::new(),
        }
    }
}

impl<R: Clone> CommodityRequests<R> {
    pub fn insert(&mut self, stub: RequestStub<R>) {
        self.by_commod
            .entry(stub.commodity.clone())
            .or_default()
            .push(stub);
    }

    /// Requests for one commodity; empty if nobody asked.
    pub fn get(&self, commodity: &Commodity) -> &[RequestStub<R>] {
        self.by_commod
            .get(commodity)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn commodities(&self) -> impl Iterator<Item = &Commodity> {
        self.by_commod.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.by_commod.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RequestStub<R>> {
        self.by_commod.values().flatten()
    }
}

// ================================================================================================
// The trade graph
// ================================================================================================

#[derive(Debug)]
pub(crate) struct RequestNode<R> {
    pub stub: RequestStub<R>,
    pub portfolio: usize,
}

#[derive(Debug)]
pub(crate) struct BidNode<R> {
    pub id: BidId,
    pub request: RequestId,
    pub bidder: AgentId,
    pub offer: R,
    pub portfolio: usize,
    pub exclusive: bool,
}

#[derive(Debug)]
pub(crate) struct PortfolioNode<R> {
    pub owner: AgentId,
    pub constraints: Vec<CapacityConstraint<R>>,
}

/// An arc between a request and a bid, weighted by resolved preference.
#[derive(Debug, Clone, Copy)]
pub struct TradeArc {
    pub request: RequestId,
    pub bid: BidId,
    pub pref: f64,
}

/// Nodes and arcs of one resolution: requests, bids, portfolio-level
/// capacity constraints, and preference-weighted arcs.
#[derive(Debug, Default)]
pub struct ExchangeGraph<R> {
    pub(crate) requests: Vec<RequestNode<R>>,
    pub(crate) bids: Vec<BidNode<R>>,
    pub(crate) request_portfolios: Vec<PortfolioNode<R>>,
    pub(crate) bid_portfolios: Vec<PortfolioNode<R>>,
    pub(crate) arcs: Vec<TradeArc>,
}

impl<R: ResourceLike> ExchangeGraph<R> {
    pub fn new() -> Self {
        Self {
            requests: Vec::new(),
            bids: Vec::new(),
            request_portfolios: Vec::new(),
            bid_portfolios: Vec::new(),
            arcs: Vec::new(),
        }
    }

    /// Adds a requester's portfolio, assigning request ids.
    pub fn add_request_portfolio(
        &mut self,
        requester: AgentId,
        portfolio: RequestPortfolio<R>,
    ) -> Vec<RequestStub<R>> {
        let pidx = self.request_portfolios.len();
        self.request_portfolios.push(PortfolioNode {
            owner: requester,
            constraints: portfolio.constraints,
        });

        let mut stubs = Vec::new();
        for request in portfolio.requests {
            // Trivial requests never enter the graph.
            if request.target.quantity() <= crate::resource::QTY_EPS {
                continue;
            }
            let id = RequestId(self.requests.len() as u32);
            let stub = RequestStub {
                id,
                commodity: request.commodity,
                target: request.target,
                requester,
                preference: request.preference,
                exclusive: request.exclusive,
            };
            self.requests.push(RequestNode {
                stub: stub.clone(),
                portfolio: pidx,
            });
            stubs.push(stub);
        }
        stubs
    }

    /// Adds a bidder's portfolio; bids referencing unknown requests fail.
    pub fn add_bid_portfolio(
        &mut self,
        bidder: AgentId,
        portfolio: BidPortfolio<R>,
    ) -> SimResult<()> {
        let pidx = self.bid_portfolios.len();
        self.bid_portfolios.push(PortfolioNode {
            owner: bidder,
            constraints: portfolio.constraints,
        });

        for bid in portfolio.bids {
            if bid.request.0 as usize >= self.requests.len() {
                return Err(KeyError::Field {
                    table: "ExchangeGraph".to_string(),
                    field: format!("request {}", bid.request),
                }
                .into());
            }
            if bid.offer.quantity() <= crate::resource::QTY_EPS {
                continue;
            }
            let id = BidId(self.bids.len() as u32);
            self.bids.push(BidNode {
                id,
                request: bid.request,
                bidder,
                offer: bid.offer,
                portfolio: pidx,
                exclusive: bid.exclusive,
            });
        }
        Ok(())
    }

    /// Installs the resolved preference arcs.
    pub fn set_arcs(&mut self, arcs: Vec<TradeArc>) {
        self.arcs = arcs;
    }

    pub(crate) fn request(&self, id: RequestId) -> &RequestNode<R> {
        &self.requests[id.0 as usize]
    }

    pub(crate) fn bid(&self, id: BidId) -> &BidNode<R> {
        &self.bids[id.0 as usize]
    }

    pub fn num_requests(&self) -> usize {
        self.requests.len()
    }

    pub fn num_bids(&self) -> usize {
        self.bids.len()
    }
}
