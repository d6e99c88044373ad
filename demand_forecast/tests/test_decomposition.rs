use chrono::{Duration, NaiveDate};
use demand_forecast::config::{DecompositionConfig, UnlaunchedPolicy};
use demand_forecast::data::PromotionSchedule;
use demand_forecast::decomposition::{DecompositionEngine, ShareStream, StreamKey, StreamState};
use demand_forecast::{Catalog, CategoryProfile, CategoryWeek, DemandError, Seed, SkuRecord};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;

fn monday(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::weeks(offset)
}

fn series(category: &str, qty: &[u64]) -> Vec<CategoryWeek> {
    qty.iter()
        .enumerate()
        .map(|(i, q)| CategoryWeek {
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
            category_id: category.to_string(),
            week: monday(i as i64),
            demand_qty: *q,
        })
        .collect()
}

/// Share dynamics switched off: every week allocates the base shares
fn frozen_config() -> DecompositionConfig {
    let mut config = DecompositionConfig {
        rho: 1.0,
        rw_sigma: 0.0,
        noise_scale: 0.0,
        tilt_strength: 0.0,
        ..DecompositionConfig::default()
    };
    config.promotion.rate = 0.0;
    config
}

fn qty_of(rows: &[demand_forecast::SkuWeekRow], sku: &str) -> Vec<u64> {
    rows.iter()
        .filter(|r| r.sku_id == sku)
        .map(|r| r.sku_qty)
        .collect()
}

#[test]
fn frozen_shares_split_seventy_thirty() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.7),
        SkuRecord::new("TV-B", "TV", 0.3),
    ])
    .unwrap();
    let config = frozen_config();
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&series("TV", &[100, 100, 100, 100]), Seed::new(7))
        .unwrap();

    assert_eq!(qty_of(&out.rows, "TV-A"), vec![70, 70, 70, 70]);
    assert_eq!(qty_of(&out.rows, "TV-B"), vec![30, 30, 30, 30]);
    assert_eq!(out.report.streams, 1);
    assert_eq!(out.report.rows, 8);
}

#[test]
fn sku_launched_in_week_five_sells_nothing_before() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.5),
        SkuRecord::new("TV-B", "TV", 0.5).with_launch_date(monday(4)),
    ])
    .unwrap();
    let config = frozen_config();
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&series("TV", &[50; 10]), Seed::new(1))
        .unwrap();

    let launched = qty_of(&out.rows, "TV-B");
    assert_eq!(&launched[..4], &[0, 0, 0, 0]);
    assert!(launched[4..].iter().all(|q| *q > 0), "{:?}", launched);
    assert_eq!(&qty_of(&out.rows, "TV-A")[..4], &[50, 50, 50, 50]);
}

#[test]
fn end_of_life_week_is_zero() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.5),
        SkuRecord::new("TV-B", "TV", 0.5).with_eol_date(monday(2)),
    ])
    .unwrap();
    let config = frozen_config();
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&series("TV", &[40; 4]), Seed::new(1))
        .unwrap();

    assert_eq!(qty_of(&out.rows, "TV-B"), vec![20, 20, 0, 0]);
    assert_eq!(qty_of(&out.rows, "TV-A"), vec![20, 20, 40, 40]);
}

#[test]
fn allocation_conserves_category_demand() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.4).with_price_tier("premium").with_size(65.0),
        SkuRecord::new("TV-B", "TV", 0.35).with_price_tier("budget"),
        SkuRecord::new("TV-C", "TV", 0.25).with_launch_date(monday(10)),
    ])
    .unwrap();
    let config = DecompositionConfig::default();
    let mut profiles = BTreeMap::new();
    profiles.insert("TV".to_string(), CategoryProfile::television());
    let qty: Vec<u64> = (0..60).map(|i| 80 + (i * 7) % 45).collect();

    let out = DecompositionEngine::new(&config, &catalog)
        .with_profiles(&profiles)
        .run(&series("TV", &qty), Seed::new(99))
        .unwrap();

    for (i, expected) in qty.iter().enumerate() {
        let week = monday(i as i64);
        let rows: Vec<_> = out.rows.iter().filter(|r| r.week == week).collect();
        let total: u64 = rows.iter().map(|r| r.sku_qty).sum();
        let share: f64 = rows.iter().map(|r| r.share_norm).sum();
        assert_eq!(total, *expected, "week {}", week);
        assert!((share - 1.0).abs() < 1e-9, "week {} shares sum to {}", week, share);
    }
}

#[test]
fn same_seed_reproduces_rows() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.6),
        SkuRecord::new("TV-B", "TV", 0.4),
    ])
    .unwrap();
    let config = DecompositionConfig::default();
    let input = series("TV", &[120; 30]);
    let engine = DecompositionEngine::new(&config, &catalog);

    let first = engine.run(&input, Seed::new(5)).unwrap();
    let second = engine.run(&input, Seed::new(5)).unwrap();
    let other = engine.run(&input, Seed::new(6)).unwrap();
    assert_eq!(first.rows, second.rows);
    assert_ne!(first.rows, other.rows);
}

#[test]
fn no_live_sku_allocates_zero_and_reports_unmet() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 1.0).with_launch_date(monday(2)),
    ])
    .unwrap();
    let config = frozen_config();
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&series("TV", &[10, 10, 10]), Seed::new(1))
        .unwrap();
    assert_eq!(qty_of(&out.rows, "TV-A"), vec![0, 0, 10]);
    assert_eq!(out.report.zero_allocated_weeks, 2);
    assert_eq!(out.report.unmet_qty, 20);
}

#[test]
fn base_share_fallback_allocates_before_launch() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 1.0).with_launch_date(monday(2)),
    ])
    .unwrap();
    let config = DecompositionConfig {
        unlaunched: UnlaunchedPolicy::BaseShareFallback,
        ..frozen_config()
    };
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&series("TV", &[10, 10, 10]), Seed::new(1))
        .unwrap();
    assert_eq!(qty_of(&out.rows, "TV-A"), vec![10, 10, 10]);
    assert_eq!(out.report.zero_allocated_weeks, 0);
}

#[test]
fn scheduled_promotion_lifts_its_sku() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.5),
        SkuRecord::new("TV-B", "TV", 0.5),
    ])
    .unwrap();
    let config = frozen_config();
    let mut promotions = PromotionSchedule::new();
    promotions.insert("TV-A", monday(1), Some(1.0));
    let out = DecompositionEngine::new(&config, &catalog)
        .with_promotions(&promotions)
        .run(&series("TV", &[90, 90, 90]), Seed::new(1))
        .unwrap();
    // week 2 shares are 2:1 after normalization
    assert_eq!(qty_of(&out.rows, "TV-A"), vec![45, 60, 45]);
}

fn share_of(rows: &[demand_forecast::SkuWeekRow], sku: &str, week: NaiveDate) -> f64 {
    rows.iter()
        .find(|r| r.sku_id == sku && r.week == week)
        .map(|r| r.share_norm)
        .unwrap()
}

#[test]
fn seasonal_tilt_favours_premium_skus_at_peak() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.5).with_price_tier("premium").with_size(65.0),
        SkuRecord::new("TV-B", "TV", 0.5).with_price_tier("budget"),
    ])
    .unwrap();
    let config = DecompositionConfig {
        tilt_strength: 0.35,
        ..frozen_config()
    };
    let mut profiles = BTreeMap::new();
    profiles.insert("TV".to_string(), CategoryProfile::television());
    let out = DecompositionEngine::new(&config, &catalog)
        .with_profiles(&profiles)
        .run(&series("TV", &[100; 52]), Seed::new(4))
        .unwrap();

    // monday(49) is ISO week 50, monday(29) is ISO week 30
    let peak = share_of(&out.rows, "TV-A", monday(49));
    let off_peak = share_of(&out.rows, "TV-A", monday(29));
    assert!(peak > off_peak, "peak {} off-peak {}", peak, off_peak);
    assert!(share_of(&out.rows, "TV-B", monday(49)) < share_of(&out.rows, "TV-B", monday(29)));

    // premium + 65" gives p = 0.6, budget gives p = -0.2
    let s = CategoryProfile::television().tilt.index_at(50);
    let a = 1.0 + 0.35 * s * 0.6;
    let b = 1.0 - 0.35 * s * 0.2;
    assert!((peak - a / (a + b)).abs() < 1e-9, "peak share {}", peak);
}

#[test]
fn random_promotions_lift_shares_before_renormalizing() {
    let catalog = Catalog::new(vec![
        SkuRecord::new("TV-A", "TV", 0.5),
        SkuRecord::new("TV-B", "TV", 0.5),
    ])
    .unwrap();
    let input = series("TV", &[90; 40]);
    let run = |rate: f64, strength: f64| {
        let mut config = frozen_config();
        config.promotion.rate = rate;
        config.promotion.strength = strength;
        DecompositionEngine::new(&config, &catalog)
            .run(&input, Seed::new(8))
            .unwrap()
            .rows
    };

    // every SKU promoted every week: the uplift cancels out
    assert_eq!(qty_of(&run(1.0, 1.0), "TV-A"), vec![45; 40]);

    // half the SKU-weeks doubled: shares are 1/3, 1/2 or 2/3
    let rows = run(0.5, 1.0);
    let mut lifted = 0;
    for week in (0..40).map(monday) {
        let share = share_of(&rows, "TV-A", week);
        let expected = [1.0 / 3.0, 0.5, 2.0 / 3.0];
        assert!(
            expected.iter().any(|e| (share - e).abs() < 1e-9),
            "week {} share {}",
            week,
            share
        );
        if (share - 0.5).abs() > 1e-9 {
            lifted += 1;
        }
    }
    assert!(lifted > 0);
    assert!(qty_of(&rows, "TV-A").iter().all(|q| [30, 45, 60].contains(q)));
}

#[test]
fn excluded_categories_are_dropped() {
    let catalog = Catalog::new(vec![SkuRecord::new("TV-A", "TV", 1.0)]).unwrap();
    let config = frozen_config();
    let mut input = series("TV", &[10, 10]);
    input.extend(series("misc", &[5, 5]));
    let out = DecompositionEngine::new(&config, &catalog)
        .run(&input, Seed::new(1))
        .unwrap();
    assert!(out.rows.iter().all(|r| r.category_id == "TV"));
}

#[test]
fn uncovered_category_is_an_error() {
    let catalog = Catalog::new(vec![SkuRecord::new("TV-A", "TV", 1.0)]).unwrap();
    let config = frozen_config();
    let err = DecompositionEngine::new(&config, &catalog)
        .run(&series("Fridge", &[10]), Seed::new(1))
        .unwrap_err();
    match err {
        DemandError::MissingCatalogCategory(missing) => assert_eq!(missing, vec!["Fridge"]),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn duplicate_category_week_is_an_error() {
    let catalog = Catalog::new(vec![SkuRecord::new("TV-A", "TV", 1.0)]).unwrap();
    let config = frozen_config();
    let mut input = series("TV", &[10]);
    input.push(input[0].clone());
    let err = DecompositionEngine::new(&config, &catalog)
        .run(&input, Seed::new(1))
        .unwrap_err();
    assert!(matches!(err, DemandError::ValidationError(_)));
}

#[test]
fn stream_rejects_out_of_order_weeks_and_reuse() {
    let catalog = Catalog::new(vec![SkuRecord::new("TV-A", "TV", 1.0)]).unwrap();
    let config = frozen_config();
    let profile = CategoryProfile::default();
    let row = &series("TV", &[1])[0];
    let mut stream = ShareStream::new(
        StreamKey::of(row),
        "TV",
        catalog.category("TV").unwrap(),
        &profile,
        &config,
        None,
        Seed::new(3),
    )
    .unwrap();

    assert_eq!(stream.state(), StreamState::Uninitialized);
    stream.step(monday(1), 5).unwrap();
    assert_eq!(stream.state(), StreamState::Running(monday(1)));
    assert!(matches!(
        stream.step(monday(1), 5),
        Err(DemandError::StreamError(_))
    ));

    let summary = stream.finish().unwrap();
    assert_eq!(summary.weeks, 1);
    assert_eq!(stream.state(), StreamState::Done);
    assert!(stream.step(monday(2), 5).is_err());
    assert!(stream.finish().is_err());
}
