mod common;

use common::*;
use nucycle::recorder::Cond;
use nucycle::toolkit::MockSim;
use serde_json::json;

/// A request for feed material is fulfilled exactly, without any extra.
#[test]
fn request_qty_satisfied_exactly() {
    init_tracing();
    let mut sim = MockSim::new(1).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();

    sim.add_facility(
        ":nucycle:Enrichment",
        json!({
            "feed_commod": "natu",
            "feed_recipe": "natu1",
            "product_commod": "enr_u",
            "tails_commod": "tails",
            "max_feed_inventory": 1.0,
            "tails_assay": 0.003
        }),
    )
    .unwrap();
    sim.add_source("natu").recipe("natu1").finalize().unwrap();

    sim.run().unwrap();

    let qr = sim
        .query("Transactions", &[Cond::eq("Commodity", "natu")])
        .unwrap();
    assert_eq!(qr.rows.len(), 1, "exactly one transaction into the plant");

    let (qty, _comp) = sim.material(qr.int("ResourceId").unwrap()).unwrap();
    assert!(
        (qty - 1.0).abs() < 1e-10,
        "matched trade provides the wrong quantity of material: {qty}"
    );
}

/// A request for enrichment beyond the SWU capacity is fulfilled only up
/// to the available separative work.
#[test]
fn swu_constraint_bounds_the_trade() {
    init_tracing();
    let mut sim = MockSim::new(1).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();
    sim.add_recipe("heu", c_heu()).unwrap();

    sim.add_facility(
        ":nucycle:Enrichment",
        json!({
            "feed_commod": "natu",
            "feed_recipe": "natu1",
            "product_commod": "enr_u",
            "tails_commod": "tails",
            "tails_assay": 0.003,
            "initial_feed": 1000.0,
            "swu_capacity": 195.0
        }),
    )
    .unwrap();
    sim.add_sink("enr_u").recipe("heu").capacity(10.0).finalize().unwrap();

    sim.run().unwrap();

    let qr = sim
        .query("Transactions", &[Cond::eq("Commodity", "enr_u")])
        .unwrap();
    assert_eq!(qr.rows.len(), 1);

    let (qty, _comp) = sim.material(qr.int("ResourceId").unwrap()).unwrap();
    assert!(
        (qty - 5.0).abs() < 0.1,
        "traded quantity exceeds SWU constraint: {qty}"
    );
}

/// With two otherwise-equal feed suppliers, the plant buys the higher
/// fissile content.
#[test]
fn preference_orders_by_fissile_content() {
    init_tracing();
    let mut sim = MockSim::new(1).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();
    sim.add_recipe("natu2", c_natu2()).unwrap();

    sim.add_facility(
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
    sim.add_source("natu").recipe("natu1").capacity(1.0).finalize().unwrap();
    sim.add_source("natu").recipe("natu2").capacity(1.0).finalize().unwrap();

    sim.run().unwrap();

    let qr = sim
        .query("Transactions", &[Cond::eq("Commodity", "natu")])
        .unwrap();
    assert_eq!(qr.rows.len(), 1);

    let (qty, comp) = sim.material(qr.int("ResourceId").unwrap()).unwrap();
    assert!((qty - 1.0).abs() < 1e-10);
    assert!(
        (comp.mass_frac(u235()) - 0.01).abs() < 1e-12,
        "the delivered composition is not the high-fissile recipe"
    );
}

/// With preference ordering disabled both suppliers trade.
#[test]
fn disabled_preference_takes_both_suppliers() {
    init_tracing();
    let mut sim = MockSim::new(1).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();
    sim.add_recipe("natu2", c_natu2()).unwrap();

    sim.add_facility(
        ":nucycle:Enrichment",
        json!({
            "feed_commod": "natu",
            "feed_recipe": "natu1",
            "product_commod": "enr_u",
            "tails_commod": "tails",
            "max_feed_inventory": 2.0,
            "order_prefs": false
        }),
    )
    .unwrap();
    sim.add_source("natu").recipe("natu1").capacity(1.0).finalize().unwrap();
    sim.add_source("natu").recipe("natu2").capacity(1.0).finalize().unwrap();

    sim.run().unwrap();

    let qr = sim
        .query("Transactions", &[Cond::eq("Commodity", "natu")])
        .unwrap();
    assert_eq!(qr.rows.len(), 2);

    let total: f64 = qr
        .rows
        .iter()
        .map(|row| sim.material(row.int("ResourceId").unwrap()).unwrap().0)
        .sum();
    assert!((total - 2.0).abs() < 1e-10, "got {total}");
}

/// Tails bank per enrichment operation and trade out at the accounting
/// quantity `Q·(e_p − e_f)/(e_f − e_t)`.
#[test]
fn tails_accounting() {
    init_tracing();
    let mut sim = MockSim::new(3).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();
    sim.add_recipe("leu", c_leu()).unwrap();

    sim.add_facility(
        ":nucycle:Enrichment",
        json!({
            "feed_commod": "natu",
            "feed_recipe": "natu1",
            "product_commod": "enr_u",
            "tails_commod": "tails",
            "tails_assay": 0.003,
            "max_feed_inventory": 100.0
        }),
    )
    .unwrap();
    sim.add_source("natu").recipe("natu1").finalize().unwrap();
    sim.add_sink("enr_u")
        .recipe("leu")
        .capacity(0.5)
        .max_inv_size(0.5)
        .finalize()
        .unwrap();
    sim.add_sink("enr_u")
        .recipe("leu")
        .capacity(0.5)
        .max_inv_size(0.5)
        .finalize()
        .unwrap();
    sim.add_sink("tails").finalize().unwrap();

    sim.run().unwrap();

    let qr = sim
        .query("Transactions", &[Cond::eq("Commodity", "tails")])
        .unwrap();
    assert_eq!(qr.rows.len(), 2, "one tails trade per enrichment operation");

    let total: f64 = qr
        .rows
        .iter()
        .map(|row| sim.material(row.int("ResourceId").unwrap()).unwrap().0)
        .sum();
    // 1.0 kg of 4% product from 0.7% feed at 0.3% tails leaves
    // (0.04 - 0.007) / (0.007 - 0.003) = 8.25 kg of tails.
    assert!((total - 8.25).abs() < 0.01, "got {total}");
}

/// An offer with no U-235 is worthless to an enricher: no trade happens
/// at all.
#[test]
fn zero_fissile_offer_is_rejected() {
    init_tracing();
    let mut sim = MockSim::new(1).unwrap();
    sim.add_recipe("natu1", c_natu1()).unwrap();
    sim.add_recipe("nou235", c_nou235()).unwrap();

    sim.add_facility(
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
    sim.add_source("natu").recipe("nou235").finalize().unwrap();

    sim.run().unwrap();

    let qr = sim.query("Transactions", &[]).unwrap();
    assert!(qr.rows.is_empty(), "no transaction should have occurred");
}
