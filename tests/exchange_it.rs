mod common;

use common::*;
use nucycle::agent::{AgentKind, AgentMeta, Archetype};
use nucycle::context::Context;
use nucycle::error::SimResult;
use nucycle::exchange::graph::{Bid, BidPortfolio, CommodityRequests, Request, RequestPortfolio};
use nucycle::exchange::{PrefAdjustment, Trade, TradeResponse};
use nucycle::recorder::memory::MemBackend;
use nucycle::recorder::{Backend, Cond};
use nucycle::resource::ResourceLike;
use nucycle::trader::Trader;
use nucycle::{Kernel, Product, SimInfo};
use serde_json::json;

fn material_of(kernel: &Kernel, db: &MemBackend, resource_id: i64) -> (f64, nucycle::CompRef) {
    let qr = db
        .query("Resources", &[Cond::eq("ResourceId", resource_id)])
        .unwrap();
    let row = qr.rows.last().unwrap();
    let comp = kernel
        .context()
        .composition(nucycle::composition::QualId(
            row.int("QualId").unwrap() as u64
        ))
        .unwrap();
    (row.double("Quantity").unwrap(), comp)
}

/// An institution in the requester's ancestor chain can reverse the
/// market's preference ordering.
struct ContrarianInst;

impl Archetype for ContrarianInst {
    fn spec(&self) -> &'static str {
        ":test:ContrarianInst"
    }

    fn adjust_material_prefs(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        prefs: &mut PrefAdjustment,
    ) {
        for entry in &mut prefs.entries {
            entry.pref = 2.0 - entry.pref;
        }
    }
}

#[test]
fn ancestors_can_override_market_preferences() {
    init_tracing();
    let mut kernel = Kernel::new(SimInfo::new(1));
    let db = MemBackend::new();
    kernel.context_mut().register_backend(Box::new(db.clone()));
    kernel
        .specs_mut()
        .register(":test:ContrarianInst", |_| Ok(Box::new(ContrarianInst)));

    let ctx = kernel.context_mut();
    ctx.add_recipe("natu1", c_natu1()).unwrap();
    ctx.add_recipe("natu2", c_natu2()).unwrap();
    ctx.register_prototype("region", AgentKind::Region, ":nucycle:NullRegion", json!({}))
        .unwrap();
    ctx.register_prototype(
        "inst",
        AgentKind::Institution,
        ":test:ContrarianInst",
        json!({}),
    )
    .unwrap();
    ctx.register_prototype(
        "enr",
        AgentKind::Facility,
        ":nucycle:Enrichment",
        json!({
            "feed_commod": "natu",
            "feed_recipe": "natu1",
            "product_commod": "enr_u",
            "tails_commod": "tails",
            "max_feed_inventory": 1.0
        }),
    )
    .unwrap();
    ctx.register_prototype(
        "src1",
        AgentKind::Facility,
        ":nucycle:Source",
        json!({"commod": "natu", "recipe": "natu1", "throughput": 1.0}),
    )
    .unwrap();
    ctx.register_prototype(
        "src2",
        AgentKind::Facility,
        ":nucycle:Source",
        json!({"commod": "natu", "recipe": "natu2", "throughput": 1.0}),
    )
    .unwrap();

    let region = kernel.build_now("region", None).unwrap();
    let inst = kernel.build_now("inst", Some(region)).unwrap();
    kernel.build_now("enr", Some(inst)).unwrap();
    kernel.build_now("src1", Some(inst)).unwrap();
    kernel.build_now("src2", Some(inst)).unwrap();

    kernel.run().unwrap();

    let qr = db
        .query("Transactions", &[Cond::eq("Commodity", "natu")])
        .unwrap();
    assert_eq!(qr.rows.len(), 1);
    let (qty, comp) = material_of(&kernel, &db, qr.int("ResourceId").unwrap());
    assert!((qty - 1.0).abs() < 1e-10);
    // The institution inverted the ordering, so the low-fissile feed won.
    assert!((comp.mass_frac(u235()) - 0.007).abs() < 1e-12);
}

/// A product vendor: bids a fixed quality against any request on its
/// commodity.
struct CaskVendor;

impl Archetype for CaskVendor {
    fn spec(&self) -> &'static str {
        ":test:CaskVendor"
    }

    fn product_trader(&mut self) -> Option<&mut dyn Trader<Product>> {
        Some(self)
    }
}

impl Trader<Product> for CaskVendor {
    fn bids(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        requests: &CommodityRequests<Product>,
    ) -> SimResult<Vec<BidPortfolio<Product>>> {
        let mut portfolio = BidPortfolio::new();
        for stub in requests.get(&"casks".into()) {
            let offer = Product::create_untracked(stub.target.quantity(), "dry-cask")?;
            portfolio.bids.push(Bid::new(stub.id, offer));
        }
        if portfolio.bids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![portfolio])
    }

    fn get_trades(
        &mut self,
        ctx: &mut Context,
        own: &AgentMeta,
        trades: &[Trade<Product>],
    ) -> SimResult<Vec<TradeResponse<Product>>> {
        trades
            .iter()
            .map(|trade| {
                Ok(TradeResponse {
                    trade: trade.clone(),
                    resource: Product::create(ctx, own.id, trade.qty, "dry-cask")?,
                })
            })
            .collect()
    }

    fn accept_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _responses: Vec<TradeResponse<Product>>,
    ) -> SimResult<()> {
        Ok(())
    }
}

/// A product buyer: wants a fixed count once.
struct CaskBuyer {
    want: f64,
}

impl Archetype for CaskBuyer {
    fn spec(&self) -> &'static str {
        ":test:CaskBuyer"
    }

    fn product_trader(&mut self) -> Option<&mut dyn Trader<Product>> {
        Some(self)
    }
}

impl Trader<Product> for CaskBuyer {
    fn requests(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
    ) -> SimResult<Vec<RequestPortfolio<Product>>> {
        if self.want <= 0.0 {
            return Ok(Vec::new());
        }
        let target = Product::create_untracked(self.want, "dry-cask")?;
        Ok(vec![
            RequestPortfolio::new().with_request(Request::new("casks", target)),
        ])
    }

    fn get_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        _trades: &[Trade<Product>],
    ) -> SimResult<Vec<TradeResponse<Product>>> {
        Ok(Vec::new())
    }

    fn accept_trades(
        &mut self,
        _ctx: &mut Context,
        _own: &AgentMeta,
        responses: Vec<TradeResponse<Product>>,
    ) -> SimResult<()> {
        for response in responses {
            self.want -= response.resource.quantity();
        }
        Ok(())
    }
}

/// The product family trades through the same exchange machinery as
/// materials.
#[test]
fn product_family_trades_end_to_end() {
    init_tracing();
    let mut kernel = Kernel::new(SimInfo::new(2));
    let db = MemBackend::new();
    kernel.context_mut().register_backend(Box::new(db.clone()));
    kernel
        .specs_mut()
        .register(":test:CaskVendor", |_| Ok(Box::new(CaskVendor)));
    kernel
        .specs_mut()
        .register(":test:CaskBuyer", |_| Ok(Box::new(CaskBuyer { want: 5.0 })));

    let ctx = kernel.context_mut();
    ctx.register_prototype("vendor", AgentKind::Other, ":test:CaskVendor", json!({}))
        .unwrap();
    ctx.register_prototype("buyer", AgentKind::Other, ":test:CaskBuyer", json!({}))
        .unwrap();
    kernel.build_now("vendor", None).unwrap();
    kernel.build_now("buyer", None).unwrap();

    kernel.run().unwrap();

    let qr = db
        .query("Transactions", &[Cond::eq("Commodity", "casks")])
        .unwrap();
    // The buyer is satisfied in the first step and goes quiet.
    assert_eq!(qr.rows.len(), 1);

    let resources = db
        .query(
            "Resources",
            &[Cond::eq("ResourceId", qr.int("ResourceId").unwrap())],
        )
        .unwrap();
    assert_eq!(resources.text("Type").unwrap(), "Product");
    assert_eq!(resources.double("Quantity").unwrap(), 5.0);
    assert_eq!(resources.text("Units").unwrap(), "dry-cask");
}
