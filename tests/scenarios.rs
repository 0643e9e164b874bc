use anyhow::Context;
use referral_commissions::{
    CommissionStatus, EngineConfig, Level, Money, PurchaseDraft, Rate, RateTable,
    ReferralError, ReferralService, Registration,
};
use sled::open;
use std::sync::Arc;

use tempfile::{TempDir, tempdir}; // Use for test db cleanup.

// Sled uses file-based locking, so every test gets its own database under a
// temp dir which is removed when the guard drops.
fn service_with(name: &str, config: EngineConfig) -> anyhow::Result<(TempDir, Arc<sled::Db>, ReferralService)> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join(name))?);
    let service = ReferralService::with_config(db.clone(), config)?;
    Ok((temp_dir, db, service))
}

fn service(name: &str) -> anyhow::Result<(TempDir, Arc<sled::Db>, ReferralService)> {
    service_with(name, EngineConfig::default())
}

fn purchase(purchaser: &str, amount: &str) -> anyhow::Result<PurchaseDraft> {
    Ok(PurchaseDraft::new()
        .set_purchaser(purchaser)
        .set_product("course-101", "Referral Marketing 101")
        .set_amount(Money::parse(amount)?))
}

#[test]
fn three_level_chain_pays_every_ancestor() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("three_level_chain.db")?;

    service.register(&Registration::new("A").set_email("a@example.com"))?;
    service.register(&Registration::new("B").set_sponsor("A"))?;
    service.register(&Registration::new("C").set_sponsor("B"))?;
    service.register(&Registration::new("D").set_sponsor("C"))?;

    let receipt = service
        .record_purchase(&purchase("D", "100.00")?)
        .context("Purchase failed: ")?;

    let got: Vec<_> = receipt
        .commissions
        .iter()
        .map(|c| (c.beneficiary.as_str(), c.level.number(), c.amount))
        .collect();
    assert_eq!(
        got,
        vec![
            ("C", 1, Money::parse("10.00")?),
            ("B", 2, Money::parse("5.00")?),
            ("A", 3, Money::parse("2.00")?),
        ]
    );
    assert_eq!(service.participant("A")?.direct_referral_count, 1);

    Ok(())
}

#[test]
fn sixth_direct_referral_is_rejected() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("fanout_limit.db")?;

    service.register(&Registration::new("A"))?;
    for i in 0..5 {
        service.register(&Registration::new(&format!("child_{i}")).set_sponsor("A"))?;
    }

    let sixth = service.register(&Registration::new("child_5").set_sponsor("A"));

    assert!(matches!(
        sixth,
        Err(ReferralError::FanoutLimitExceeded { ref sponsor, limit: 5 }) if sponsor == "A"
    ));
    assert!(service.graph().find_participant("child_5")?.is_none());
    assert_eq!(service.participant("A")?.direct_referral_count, 5);
    assert_eq!(service.descendants_of("A", Level::One)?.len(), 5);

    Ok(())
}

#[test]
fn root_purchase_produces_no_commissions() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("root_purchase.db")?;

    service.register(&Registration::new("root"))?;
    let receipt = service.record_purchase(&purchase("root", "250.00")?)?;

    assert!(receipt.commissions.is_empty());
    assert!(service.commissions_for_purchase(&receipt.purchase.id)?.is_empty());

    Ok(())
}

#[test]
fn deep_chains_stop_at_level_three() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("deep_chain.db")?;

    let ids = ["l0", "l1", "l2", "l3", "l4", "l5", "l6"];
    service.register(&Registration::new(ids[0]))?;
    for pair in ids.windows(2) {
        service.register(&Registration::new(pair[1]).set_sponsor(pair[0]))?;
    }

    let receipt = service.record_purchase(&purchase("l6", "10.00")?)?;

    assert_eq!(receipt.commissions.len(), 3);
    assert_eq!(
        receipt.commissions.iter().map(|c| c.beneficiary.as_str()).collect::<Vec<_>>(),
        vec!["l5", "l4", "l3"]
    );
    assert!(service.summarize("l2")?.total_commissions == 0);

    Ok(())
}

#[test]
fn custom_rates_round_to_currency_precision() -> anyhow::Result<()> {
    let rates = RateTable::new(Rate::parse("0.20")?, Rate::parse("0.10")?, Rate::parse("0.05")?);
    let (_dir, _db, service) =
        service_with("custom_rates.db", EngineConfig::new().with_rates(rates))?;

    service.register(&Registration::new("a"))?;
    service.register(&Registration::new("b").set_sponsor("a"))?;
    service.register(&Registration::new("c").set_sponsor("b"))?;
    service.register(&Registration::new("d").set_sponsor("c"))?;

    let receipt = service.record_purchase(&purchase("d", "33.33")?)?;
    let amounts: Vec<_> = receipt.commissions.iter().map(|c| c.amount).collect();

    // 6.666 / 3.333 / 1.6665
    assert_eq!(
        amounts,
        vec![Money::parse("6.67")?, Money::parse("3.33")?, Money::parse("1.67")?]
    );

    Ok(())
}

#[test]
fn rate_changes_never_rewrite_stored_commissions() -> anyhow::Result<()> {
    let (_dir, db, service) = service("rate_change.db")?;

    service.register(&Registration::new("a"))?;
    service.register(&Registration::new("b").set_sponsor("a"))?;
    let before = service.record_purchase(&purchase("b", "100")?)?;

    let doubled = RateTable::new(Rate::parse("0.20")?, Rate::parse("0.10")?, Rate::parse("0.04")?);
    let repriced = ReferralService::with_config(db, EngineConfig::new().with_rates(doubled))?;
    let after = repriced.record_purchase(&purchase("b", "100")?)?;

    let stored = repriced.commissions_for_purchase(&before.purchase.id)?;
    assert_eq!(stored, before.commissions);
    assert_eq!(stored[0].rate, Rate::parse("0.10")?);
    assert_eq!(after.commissions[0].amount, Money::parse("20.00")?);

    let summary = repriced.summarize("a")?;
    assert_eq!(summary.total_earnings, Money::parse("30.00")?);
    assert_eq!(summary.level(Level::One).rate, Rate::parse("0.20")?);

    Ok(())
}

#[test]
fn settlement_updates_the_summary() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("settlement.db")?;

    service.register(&Registration::new("a"))?;
    service.register(&Registration::new("b").set_sponsor("a"))?;
    let first = service.record_purchase(&purchase("b", "100")?)?;
    let second = service.record_purchase(&purchase("b", "50")?)?;

    service.set_commission_status(&first.purchase.id, Level::One, CommissionStatus::Paid)?;
    service.set_commission_status(&second.purchase.id, Level::One, CommissionStatus::Void)?;

    let summary = service.summarize("a")?;
    assert_eq!(summary.total_commissions, 2);
    assert_eq!(summary.status(CommissionStatus::Paid).amount, Money::parse("10.00")?);
    assert_eq!(summary.status(CommissionStatus::Void).amount, Money::parse("5.00")?);
    assert_eq!(summary.status(CommissionStatus::Pending).count, 0);
    assert_eq!(summary.total_earnings, Money::parse("15.00")?);

    // reads are stable absent writes
    assert_eq!(summary, service.summarize("a")?);
    assert_eq!(service.ancestors_of("b")?, service.ancestors_of("b")?);

    Ok(())
}

#[test]
fn network_view_groups_descendants_by_level() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("network.db")?;

    service.register(&Registration::new("top").set_names("Tess", "Top"))?;
    service.register(&Registration::new("mid_1").set_sponsor("top"))?;
    service.register(&Registration::new("mid_2").set_sponsor("top"))?;
    service.register(&Registration::new("low").set_sponsor("mid_2"))?;
    service.register(&Registration::new("bottom").set_sponsor("low"))?;
    service.register(&Registration::new("below_cap").set_sponsor("bottom"))?;

    let network = service.network("top")?;

    assert_eq!(network.participant.first_name.as_deref(), Some("Tess"));
    assert_eq!(network.count(Level::One), 2);
    assert_eq!(network.count(Level::Two), 1);
    assert_eq!(network.count(Level::Three), 1);
    // four hops down is outside the network
    assert_eq!(network.total(), 4);
    assert_eq!(service.participants()?.len(), 6);

    Ok(())
}

#[test]
fn concurrent_registrations_respect_fanout() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("fanout_race.db")?;
    let service = Arc::new(service);
    service.register(&Registration::new("hub"))?;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service.register(&Registration::new(&format!("spoke_{i}")).set_sponsor("hub"))
            })
        })
        .collect();

    let mut accepted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.join().expect("registration thread panicked") {
            Ok(_) => accepted += 1,
            Err(ReferralError::FanoutLimitExceeded { .. }) => rejected += 1,
            Err(other) => anyhow::bail!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted, 5);
    assert_eq!(rejected, 11);
    assert_eq!(service.participant("hub")?.direct_referral_count, 5);
    assert_eq!(service.descendants_of("hub", Level::One)?.len(), 5);
    assert_eq!(service.participants()?.len(), 6);

    Ok(())
}

#[test]
fn concurrent_duplicate_ids_have_one_winner() -> anyhow::Result<()> {
    let (_dir, _db, service) = service("duplicate_race.db")?;
    let service = Arc::new(service);
    service.register(&Registration::new("sponsor"))?;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                service.register(&Registration::new("contested").set_sponsor("sponsor"))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("registration thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ReferralError::DuplicateIdentifier(id) if id == "contested"))
    );
    // losers never touched the sponsor counter
    assert_eq!(service.participant("sponsor")?.direct_referral_count, 1);

    Ok(())
}
