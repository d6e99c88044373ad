use chrono::{Duration, NaiveDate};
use demand_forecast::config::FeatureConfig;
use demand_forecast::data::ExogenousTable;
use demand_forecast::features::{FeatureBuilder, Split};
use demand_forecast::SkuWeekRow;
use rstest::rstest;

fn monday(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + Duration::weeks(offset)
}

fn rows(sku: &str, qty: &[u64]) -> Vec<SkuWeekRow> {
    qty.iter()
        .enumerate()
        .map(|(i, q)| SkuWeekRow {
            warehouse_id: 1,
            region: "hq".to_string(),
            store_id: 1,
            category_id: "TV".to_string(),
            sku_id: sku.to_string(),
            week: monday(i as i64),
            category_qty: 100,
            share_norm: *q as f64 / 100.0,
            sku_qty: *q,
        })
        .collect()
}

fn config(test_weeks: usize) -> FeatureConfig {
    FeatureConfig {
        test_weeks,
        min_history_weeks: 4,
        ..FeatureConfig::default()
    }
}

#[test]
fn changing_a_week_never_changes_earlier_features() {
    let qty: Vec<u64> = (0..40).map(|i| 10 + (i % 6)).collect();
    let mut perturbed = qty.clone();
    perturbed[25] += 50;

    let cfg = config(8);
    let builder = FeatureBuilder::new(&cfg);
    let base = builder.build(&rows("TV-A", &qty)).unwrap();
    let changed = builder.build(&rows("TV-A", &perturbed)).unwrap();

    for (a, b) in base.table.rows().iter().zip(changed.table.rows()).take(26) {
        assert_eq!(a.features, b.features, "week {}", a.week);
    }
    let after = &changed.table.rows()[26];
    let lag_1 = changed.table.column_index("lag_1").unwrap();
    assert_eq!(after.features[lag_1], perturbed[25] as f64);
}

#[rstest]
#[case(30, 8, 8)]
#[case(5, 8, 4)]
#[case(2, 52, 1)]
fn every_entity_keeps_train_and_test_rows(
    #[case] weeks: usize,
    #[case] test_weeks: usize,
    #[case] expected_test: usize,
) {
    let qty = vec![7; weeks];
    let mut cfg = config(test_weeks);
    cfg.min_history_weeks = 1;
    let set = FeatureBuilder::new(&cfg).build(&rows("TV-A", &qty)).unwrap();

    let test: Vec<_> = set.table.split(Split::Test).collect();
    let train: Vec<_> = set.table.split(Split::Train).collect();
    assert_eq!(test.len(), expected_test);
    assert_eq!(train.len(), weeks - expected_test);
    let last_train = train.iter().map(|r| r.week).max().unwrap();
    assert!(test.iter().all(|r| r.week > last_train));
}

#[test]
fn short_entities_are_dropped() {
    let mut input = rows("TV-A", &[5; 10]);
    input.extend(rows("TV-B", &[5; 3]));
    let cfg = config(2);
    let set = FeatureBuilder::new(&cfg).build(&input).unwrap();
    assert_eq!(set.series.len(), 1);
    assert!(set.table.rows().iter().all(|r| r.key.sku_id == "TV-A"));
}

#[test]
fn exogenous_columns_join_by_region_and_week() {
    let mut exogenous = ExogenousTable::new(vec!["cdd".to_string()]);
    exogenous.insert("hq", monday(3), vec![4.5]).unwrap();
    let cfg = config(1);
    let set = FeatureBuilder::new(&cfg)
        .with_exogenous(&exogenous)
        .build(&rows("TV-A", &[1, 2, 3, 4, 5]))
        .unwrap();

    let cdd = set.table.column_index("cdd").unwrap();
    let values: Vec<f64> = set.table.rows().iter().map(|r| r.features[cdd]).collect();
    assert_eq!(values, vec![0.0, 0.0, 0.0, 4.5, 0.0]);
}

#[test]
fn feature_csv_has_one_line_per_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run").join("features.csv");
    let cfg = config(2);
    let set = FeatureBuilder::new(&cfg).build(&rows("TV-A", &[3; 6])).unwrap();
    set.table.write_csv(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("lag_1"));
    assert!(header.contains("split"));
    assert_eq!(lines.count(), 6);
}
