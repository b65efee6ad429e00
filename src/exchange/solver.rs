use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use ordered_float::OrderedFloat;
use tracing::{debug, trace};

use crate::exchange::graph::{BidId, ExchangeGraph, RequestId};
use crate::resource::{QTY_EPS, ResourceLike};

/// One matched arc with its agreed quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub request: RequestId,
    pub bid: BidId,
    pub qty: f64,
    pub pref: f64,
}

/// Mutable allocation state shared by the greedy pass and the refinement.
struct SolveState {
    rem_req: Vec<f64>,
    rem_bid: Vec<f64>,
    rem_req_con: Vec<Vec<f64>>,
    rem_bid_con: Vec<Vec<f64>>,
    /// Flow per arc index into `graph.arcs`.
    flow: Vec<f64>,
    /// Exclusive groups already consumed: (bid portfolio, request).
    taken_groups: BTreeSet<(usize, RequestId)>,
    /// Requests already served by an exclusive arc.
    exclusive_served: BTreeSet<RequestId>,
}

/// Resolves the trade graph into a set of matches.
///
/// Strategy: a greedy preference-ordered assignment with deterministic
/// tie-breaks — strictly greater preference first, then higher bid
/// capacity, then stable arc order — followed by an augmenting-path
/// refinement inside tied-preference cliques. The refinement only touches
/// arcs free of exclusivity and portfolio constraints; anything it cannot
/// reason about keeps its greedy allocation, so an over-constrained graph
/// degrades to the greedy prefix instead of failing. An empty match set is
/// a valid outcome.
pub fn solve<R: ResourceLike>(graph: &ExchangeGraph<R>) -> Vec<Match> {
    let mut state = SolveState {
        rem_req: graph
            .requests
            .iter()
            .map(|r| r.stub.target.quantity())
            .collect(),
        rem_bid: graph.bids.iter().map(|b| b.offer.quantity()).collect(),
        rem_req_con: graph
            .request_portfolios
            .iter()
            .map(|p| p.constraints.iter().map(|c| c.capacity()).collect())
            .collect(),
        rem_bid_con: graph
            .bid_portfolios
            .iter()
            .map(|p| p.constraints.iter().map(|c| c.capacity()).collect())
            .collect(),
        flow: vec![0.0; graph.arcs.len()],
        taken_groups: BTreeSet::new(),
        exclusive_served: BTreeSet::new(),
    };

    let order = arc_order(graph);
    greedy(graph, &order, &mut state);
    refine_ties(graph, &order, &mut state);

    let matches: Vec<Match> = graph
        .arcs
        .iter()
        .enumerate()
        .filter(|(idx, _)| state.flow[*idx] > QTY_EPS)
        .map(|(idx, arc)| Match {
            request: arc.request,
            bid: arc.bid,
            qty: state.flow[idx],
            pref: arc.pref,
        })
        .collect();
    debug!(
        requests = graph.num_requests(),
        bids = graph.num_bids(),
        matches = matches.len(),
        "exchange solved"
    );
    matches
}

/// Arc indices in resolution order: preference descending, then bid
/// capacity descending, then stable arc index.
fn arc_order<R: ResourceLike>(graph: &ExchangeGraph<R>) -> Vec<usize> {
    (0..graph.arcs.len())
        .sorted_by_key(|&idx| {
            let arc = &graph.arcs[idx];
            let cap = graph.bid(arc.bid).offer.quantity();
            (
                std::cmp::Reverse(OrderedFloat(arc.pref)),
                std::cmp::Reverse(OrderedFloat(cap)),
                idx,
            )
        })
        .collect()
}

fn greedy<R: ResourceLike>(graph: &ExchangeGraph<R>, order: &[usize], state: &mut SolveState) {
    for &idx in order {
        let arc = &graph.arcs[idx];
        // Negative preference means the requester refuses this offer.
        if arc.pref < 0.0 {
            continue;
        }
        let req = graph.request(arc.request);
        let bid = graph.bid(arc.bid);
        let r = arc.request.0 as usize;
        let b = arc.bid.0 as usize;

        if state.exclusive_served.contains(&arc.request) {
            continue;
        }
        if bid.exclusive && state.taken_groups.contains(&(bid.portfolio, bid.request)) {
            continue;
        }

        let mut headroom = state.rem_req[r].min(state.rem_bid[b]);
        for (c, con) in graph.request_portfolios[req.portfolio]
            .constraints
            .iter()
            .enumerate()
        {
            let rate = con.rate(&bid.offer);
            if rate > 0.0 {
                headroom = headroom.min(state.rem_req_con[req.portfolio][c] / rate);
            }
        }
        for (c, con) in graph.bid_portfolios[bid.portfolio]
            .constraints
            .iter()
            .enumerate()
        {
            let rate = con.rate(&bid.offer);
            if rate > 0.0 {
                headroom = headroom.min(state.rem_bid_con[bid.portfolio][c] / rate);
            }
        }

        let flow = if req.stub.exclusive {
            // All-or-nothing at the full target quantity.
            let want = req.stub.target.quantity();
            if headroom + QTY_EPS < want {
                continue;
            }
            want
        } else if bid.exclusive {
            // All-or-nothing at the full offer quantity.
            let offer = bid.offer.quantity();
            if headroom + QTY_EPS < offer {
                continue;
            }
            offer
        } else {
            headroom
        };
        if flow <= QTY_EPS {
            continue;
        }

        commit(graph, state, idx, flow);
        trace!(request = %arc.request, bid = %arc.bid, flow, pref = arc.pref, "arc matched");

        if req.stub.exclusive {
            state.exclusive_served.insert(arc.request);
        }
        if bid.exclusive {
            state.taken_groups.insert((bid.portfolio, bid.request));
        }
    }
}

fn commit<R: ResourceLike>(
    graph: &ExchangeGraph<R>,
    state: &mut SolveState,
    arc_idx: usize,
    flow: f64,
) {
    let arc = &graph.arcs[arc_idx];
    let req = graph.request(arc.request);
    let bid = graph.bid(arc.bid);
    state.flow[arc_idx] += flow;
    state.rem_req[arc.request.0 as usize] -= flow;
    state.rem_bid[arc.bid.0 as usize] -= flow;
    for (c, con) in graph.request_portfolios[req.portfolio]
        .constraints
        .iter()
        .enumerate()
    {
        state.rem_req_con[req.portfolio][c] -= con.rate(&bid.offer) * flow;
    }
    for (c, con) in graph.bid_portfolios[bid.portfolio]
        .constraints
        .iter()
        .enumerate()
    {
        state.rem_bid_con[bid.portfolio][c] -= con.rate(&bid.offer) * flow;
    }
}

/// Whether an arc is plain enough for flow rerouting: no exclusivity and
/// no portfolio constraints on either side.
fn reroutable<R: ResourceLike>(graph: &ExchangeGraph<R>, arc_idx: usize) -> bool {
    let arc = &graph.arcs[arc_idx];
    let req = graph.request(arc.request);
    let bid = graph.bid(arc.bid);
    !req.stub.exclusive
        && !bid.exclusive
        && graph.request_portfolios[req.portfolio].constraints.is_empty()
        && graph.bid_portfolios[bid.portfolio].constraints.is_empty()
}

/// Augmenting-path refinement inside tied-preference cliques.
///
/// Greedy order can strand a request when a bid it shares with an
/// equally-preferred competitor was consumed first even though the
/// competitor had an alternative. Within each preference class this
/// reroutes such flow along alternating paths until no request in the
/// class can be improved.
fn refine_ties<R: ResourceLike>(graph: &ExchangeGraph<R>, order: &[usize], state: &mut SolveState) {
    // Group reroutable arc indices by preference value, descending.
    let mut classes: BTreeMap<std::cmp::Reverse<OrderedFloat<f64>>, Vec<usize>> = BTreeMap::new();
    for &idx in order {
        let arc = &graph.arcs[idx];
        if arc.pref >= 0.0 && reroutable(graph, idx) {
            classes
                .entry(std::cmp::Reverse(OrderedFloat(arc.pref)))
                .or_default()
                .push(idx);
        }
    }

    for arcs in classes.values() {
        if arcs.len() < 2 {
            continue;
        }
        let mut requests: Vec<RequestId> =
            arcs.iter().map(|&i| graph.arcs[i].request).collect();
        requests.sort_unstable();
        requests.dedup();

        for r in requests {
            loop {
                let need = state.rem_req[r.0 as usize];
                if need <= QTY_EPS {
                    break;
                }
                let mut visited = BTreeSet::new();
                let pushed = find_supply(graph, arcs, state, r, need, &mut visited);
                if pushed <= QTY_EPS {
                    break;
                }
                state.rem_req[r.0 as usize] -= pushed;
            }
        }
    }
}

/// Finds up to `amount` of additional supply for `request` within the
/// clique, either from spare bid capacity or by relocating a competitor's
/// flow to one of its alternatives. Returns the quantity secured.
fn find_supply<R: ResourceLike>(
    graph: &ExchangeGraph<R>,
    arcs: &[usize],
    state: &mut SolveState,
    request: RequestId,
    amount: f64,
    visited: &mut BTreeSet<BidId>,
) -> f64 {
    // Spare capacity on a directly connected bid.
    for &idx in arcs {
        let arc = &graph.arcs[idx];
        if arc.request != request || visited.contains(&arc.bid) {
            continue;
        }
        let spare = state.rem_bid[arc.bid.0 as usize];
        if spare > QTY_EPS {
            let delta = amount.min(spare);
            state.flow[idx] += delta;
            state.rem_bid[arc.bid.0 as usize] -= delta;
            return delta;
        }
    }

    // Relocate a competitor's allocation away from a shared bid.
    for &idx in arcs {
        let arc = &graph.arcs[idx];
        if arc.request != request || visited.contains(&arc.bid) {
            continue;
        }
        visited.insert(arc.bid);

        for &other_idx in arcs {
            let other = &graph.arcs[other_idx];
            if other.bid != arc.bid
                || other.request == request
                || state.flow[other_idx] <= QTY_EPS
            {
                continue;
            }
            let movable = amount.min(state.flow[other_idx]);
            let freed = find_supply(graph, arcs, state, other.request, movable, visited);
            if freed > QTY_EPS {
                // The competitor sourced `freed` elsewhere; hand its slice
                // of this bid to the stranded request.
                state.flow[other_idx] -= freed;
                state.flow[idx] += freed;
                return freed;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentId;
    use crate::composition::Composition;
    use crate::exchange::graph::{
        Bid, BidPortfolio, CapacityConstraint, Request, RequestPortfolio, TradeArc,
    };
    use crate::nuclide::NucId;
    use crate::resource::material::Material;

    fn mat(qty: f64, u235_frac: f64) -> Material {
        let u235 = NucId::new(92, 235, 0).unwrap();
        let u238 = NucId::new(92, 238, 0).unwrap();
        let comp =
            Composition::from_mass([(u235, u235_frac), (u238, 1.0 - u235_frac)]).unwrap();
        Material::create_untracked(qty, comp).unwrap()
    }

    /// One request, two bids with differing preference: the preferred bid
    /// wins outright.
    #[test]
    fn higher_preference_wins() {
        let mut graph = ExchangeGraph::new();
        let stubs = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new().with_request(Request::new("natu", mat(1.0, 0.007))),
        );
        let rid = stubs[0].id;
        graph
            .add_bid_portfolio(
                AgentId(2),
                BidPortfolio::new().with_bid(Bid::new(rid, mat(1.0, 0.007))),
            )
            .unwrap();
        graph
            .add_bid_portfolio(
                AgentId(3),
                BidPortfolio::new().with_bid(Bid::new(rid, mat(1.0, 0.01))),
            )
            .unwrap();
        graph.set_arcs(vec![
            TradeArc {
                request: rid,
                bid: BidId(0),
                pref: 1.007,
            },
            TradeArc {
                request: rid,
                bid: BidId(1),
                pref: 1.01,
            },
        ]);

        let matches = solve(&graph);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].bid, BidId(1));
        assert!((matches[0].qty - 1.0).abs() < QTY_EPS);
    }

    /// Ties break by bid capacity, then by stable order.
    #[test]
    fn ties_break_deterministically()
    {
        let mut graph = ExchangeGraph::new();
        let stubs = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new().with_request(Request::new("natu", mat(1.0, 0.007))),
        );
        let rid = stubs[0].id;
        for (agent, qty) in [(2, 1.0), (3, 2.0)] {
            graph
                .add_bid_portfolio(
                    AgentId(agent),
                    BidPortfolio::new().with_bid(Bid::new(rid, mat(qty, 0.007))),
                )
                .unwrap();
        }
        graph.set_arcs(vec![
            TradeArc {
                request: rid,
                bid: BidId(0),
                pref: 1.0,
            },
            TradeArc {
                request: rid,
                bid: BidId(1),
                pref: 1.0,
            },
        ]);

        let matches = solve(&graph);
        // The larger-capacity bid wins the tie and covers the full request.
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].bid, BidId(1));
    }

    /// Portfolio constraints cap the total across all arcs of a portfolio.
    #[test]
    fn portfolio_constraint_caps_total() {
        let mut graph = ExchangeGraph::new();
        let stubs = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new()
                .with_request(Request::new("natu", mat(2.0, 0.007)))
                .with_constraint(CapacityConstraint::quantity(1.5)),
        );
        let rid = stubs[0].id;
        graph
            .add_bid_portfolio(
                AgentId(2),
                BidPortfolio::new().with_bid(Bid::new(rid, mat(5.0, 0.007))),
            )
            .unwrap();
        graph.set_arcs(vec![TradeArc {
            request: rid,
            bid: BidId(0),
            pref: 1.0,
        }]);

        let matches = solve(&graph);
        assert_eq!(matches.len(), 1);
        assert!((matches[0].qty - 1.5).abs() < QTY_EPS);
    }

    /// A stranded equal-preference request gets supply rerouted to it.
    #[test]
    fn tied_clique_reroutes_flow() {
        let mut graph = ExchangeGraph::new();
        // Request A can buy from bid X or Y; request B only from X.
        let stubs_a = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new().with_request(Request::new("natu", mat(1.0, 0.007))),
        );
        let stubs_b = graph.add_request_portfolio(
            AgentId(2),
            RequestPortfolio::new().with_request(Request::new("natu", mat(1.0, 0.007))),
        );
        let (ra, rb) = (stubs_a[0].id, stubs_b[0].id);
        // Bid X (1.0 kg) is reachable from both requests; bid Y (1.0 kg)
        // only from A. Greedy hands X to A in stable order, stranding B
        // until the refinement moves A over to Y.
        graph
            .add_bid_portfolio(
                AgentId(3),
                BidPortfolio::new().with_bid(Bid::new(ra, mat(1.0, 0.007))),
            )
            .unwrap();
        graph
            .add_bid_portfolio(
                AgentId(4),
                BidPortfolio::new().with_bid(Bid::new(ra, mat(1.0, 0.007))),
            )
            .unwrap();
        graph.set_arcs(vec![
            TradeArc {
                request: ra,
                bid: BidId(0),
                pref: 1.0,
            },
            TradeArc {
                request: rb,
                bid: BidId(0),
                pref: 1.0,
            },
            TradeArc {
                request: ra,
                bid: BidId(1),
                pref: 1.0,
            },
        ]);

        let matches = solve(&graph);
        let total: f64 = matches.iter().map(|m| m.qty).sum();
        assert!((total - 2.0).abs() < QTY_EPS);
        // Both requests fully served.
        let into_a: f64 = matches
            .iter()
            .filter(|m| m.request == ra)
            .map(|m| m.qty)
            .sum();
        let into_b: f64 = matches
            .iter()
            .filter(|m| m.request == rb)
            .map(|m| m.qty)
            .sum();
        assert!((into_a - 1.0).abs() < QTY_EPS);
        assert!((into_b - 1.0).abs() < QTY_EPS);
    }

    /// Exclusive bids are all-or-nothing and mutually exclusive per group.
    #[test]
    fn exclusive_bids_are_all_or_nothing() {
        let mut graph = ExchangeGraph::new();
        let stubs = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new().with_request(Request::new("fuel", mat(1.5, 0.04))),
        );
        let rid = stubs[0].id;
        // Two exclusive alternatives from one portfolio: a 2.0 batch that
        // does not fit, and a 1.0 batch that does.
        graph
            .add_bid_portfolio(
                AgentId(2),
                BidPortfolio::new()
                    .with_bid(Bid {
                        request: rid,
                        offer: mat(2.0, 0.04),
                        exclusive: true,
                    })
                    .with_bid(Bid {
                        request: rid,
                        offer: mat(1.0, 0.04),
                        exclusive: true,
                    }),
            )
            .unwrap();
        graph.set_arcs(vec![
            TradeArc {
                request: rid,
                bid: BidId(0),
                pref: 1.0,
            },
            TradeArc {
                request: rid,
                bid: BidId(1),
                pref: 1.0,
            },
        ]);

        let matches = solve(&graph);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].bid, BidId(1));
        assert!((matches[0].qty - 1.0).abs() < QTY_EPS);
    }

    /// Negative preferences drop arcs; no feasible arc means an empty
    /// match set, not an error.
    #[test]
    fn rejected_offers_yield_empty_match() {
        let mut graph = ExchangeGraph::new();
        let stubs = graph.add_request_portfolio(
            AgentId(1),
            RequestPortfolio::new().with_request(Request::new("natu", mat(1.0, 0.007))),
        );
        let rid = stubs[0].id;
        graph
            .add_bid_portfolio(
                AgentId(2),
                BidPortfolio::new().with_bid(Bid::new(rid, mat(1.0, 0.0))),
            )
            .unwrap();
        graph.set_arcs(vec![TradeArc {
            request: rid,
            bid: BidId(0),
            pref: -1.0,
        }]);

        assert!(solve(&graph).is_empty());
    }
}
