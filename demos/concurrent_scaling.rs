// (c) Copyright 2025 Helsing GmbH. All rights reserved.
//! The example simulates three replicas of a price that is concurrently re-set and adjusted by
//! percentages, and shows that they agree on the result once every operation is delivered.
//!
//! Run with `RUST_LOG=scalereg=trace` to see every delivery.

use scalereg::{Change, DeliveryError, Identifier, Observer, Op, ScalingRegister};
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn report(name: &'static str) -> impl FnMut(&Change) {
    move |change: &Change| {
        println!(
            "{name}: {} -> {} ({} {:?})",
            change.previous,
            change.value,
            if change.is_local { "local" } else { "remote" },
            change.cause,
        )
    }
}

/// Delivers `ops` to `replica`, skipping the ones it issued itself.
fn deliver(
    replica: &mut ScalingRegister,
    ops: [&Op; 2],
    observer: &mut impl Observer,
) -> Result<(), DeliveryError> {
    for op in ops {
        if op.timestamp.actor() != replica.id() {
            replica.apply(op, observer)?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Every replica starts out from the same price.
    let mut hq = ScalingRegister::new(Identifier::new(0, 0), 100.0);
    let mut shop = ScalingRegister::new(Identifier::new(1, 0), 100.0);
    let mut web = ScalingRegister::new(Identifier::new(2, 0), 100.0);

    let mut hq_log = report("hq");
    let mut shop_log = report("shop");
    let mut web_log = report("web");

    // --- Round 1: a price increase everyone learns about ---
    let increase = hq
        .multiply(1.25, &mut hq_log)
        .ok_or("a factor other than 1 always yields an operation")?;
    shop.apply(&increase, &mut shop_log)?;
    web.apply(&increase, &mut web_log)?;

    // --- Round 2: concurrent edits ---
    // The shop sets a new price, knowing about the increase.
    let reprice = shop.set(120.0, &mut shop_log);
    // Concurrently, the web store applies a 10% discount.
    let discount = web
        .multiply(0.9, &mut web_log)
        .ok_or("a factor other than 1 always yields an operation")?;

    // --- Synchronization ---
    // The transport delivers both operations everywhere, in different orders.
    deliver(&mut hq, [&discount, &reprice], &mut hq_log)?;
    deliver(&mut shop, [&discount, &reprice], &mut shop_log)?;
    deliver(&mut web, [&reprice, &discount], &mut web_log)?;

    // The discount was concurrent with the new price, so it applies to it. The increase was
    // observed by the shop before it set the price, so it does not.
    for replica in [&hq, &shop, &web] {
        println!("{:?} settled on {}", replica.id(), replica.value());
        assert!((replica.value() - 108.0).abs() < 1e-9);
    }

    Ok(())
}
