mod common;

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use geo_types::polygon;

use common::{aoi, remotes, test_config, utf8_dir, FakeService, Failure};
use landwatch::checkpoint::{CheckpointStore, EmptyReason};
use landwatch::config::{BfastParams, BsSlopeParams, CcdcParams, CusumParams};
use landwatch::geometry::{BoundingBox, GridPartitioner, RegularGrid, SamplePoint};
use landwatch::landwatch_errors::LandwatchError;
use landwatch::pipeline::{scheduler, CellTask, Pipeline};
use landwatch::results::writer::ResultTable;
use landwatch::results::{AggregateOutcome, Cleanup, FieldValue};

fn cells(aoi: &BoundingBox) -> Vec<landwatch::geometry::Cell> {
    RegularGrid.partition(aoi, 1.0, 1.0).unwrap()
}

fn listing(dir: &camino::Utf8Path) -> BTreeSet<String> {
    dir.read_dir_utf8()
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string())
        .collect()
}

#[tokio::test]
async fn test_full_run_writes_outputs_and_clears_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new());
    let config = test_config(&dir, 4);
    let sig = config.signature();

    let pipeline = Pipeline::new(config, service.clone(), service.clone()).unwrap();
    let report = pipeline.run_aoi(&aoi()).await.unwrap();

    assert_eq!(report.summary.done, 4);
    assert!(report.summary.is_complete());
    assert!(report.complete);
    assert!(!report.invalidated);
    let AggregateOutcome::Written { rows, paths } = report.outcome else {
        panic!("expected written outputs");
    };
    assert_eq!(rows, 16);
    assert_eq!(service.segment_calls.load(Ordering::SeqCst), 16);
    assert!(dir.join("config.json").is_file());

    let store = CheckpointStore::open(dir.clone()).unwrap();
    assert!(store.completed_cells(&sig).unwrap().is_empty());

    let snapshot = fs::read(&paths.snapshot).unwrap();
    let table: ResultTable = serde_json::from_slice(&snapshot).unwrap();
    let ids: Vec<_> = table.rows.iter().map(|r| r.point_id).collect();
    assert_eq!(ids, (1..=16).collect::<Vec<_>>());
    assert!(table.columns.contains(&"mon_ts".to_string()));
    // point 3 loses vegetation in 2019, point 1 is stable
    let lost = &table.rows[2].fields;
    let stable = &table.rows[0].fields;
    assert!(lost["ltr_magnitude"].as_f64().unwrap() > 0.3);
    assert!(stable["ltr_magnitude"].as_f64().map_or(true, |m| m < 0.1));
    assert!(matches!(lost["ltr_yod"], FieldValue::Integer(_)));
    assert!(lost["cusum_magnitude"].as_f64().unwrap() < 0.0);

    let csv = fs::read_to_string(&paths.csv).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("LON,LAT,PLOTID,"));
    assert!(header.contains("ltr_magnitude"));
    assert!(!header.contains("mon_images"));
    assert_eq!(csv.lines().count(), 17);
}

#[tokio::test]
async fn test_polygon_aoi_runs_over_its_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new());
    let triangle = polygon![
        (x: 0.0, y: 0.0),
        (x: 2.0, y: 0.0),
        (x: 1.0, y: 2.0),
        (x: 0.0, y: 0.0),
    ];

    let pipeline = Pipeline::new(test_config(&dir, 2), service.clone(), service).unwrap();
    let report = pipeline.run_polygon(&triangle).await.unwrap();

    assert_eq!(report.summary.done, 4);
    assert!(matches!(report.outcome, AggregateOutcome::Written { rows: 16, .. }));
}

#[tokio::test]
async fn test_resume_makes_no_remote_calls() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new());
    let config = test_config(&dir, 2);
    let store = CheckpointStore::open(dir.clone()).unwrap();
    let task = Arc::new(CellTask::new(&config, store.clone(), remotes(&service)).unwrap());

    let first = scheduler::schedule(cells(&aoi()), 2, Arc::clone(&task)).await;
    assert_eq!(first.done, 4);
    let calls = service.remote_calls();
    let before = listing(&dir);

    let second = scheduler::schedule(cells(&aoi()), 2, task).await;
    assert_eq!(second.skipped, 4);
    assert_eq!(second.done, 0);
    assert_eq!(service.remote_calls(), calls);
    assert_eq!(listing(&dir), before);
}

#[tokio::test]
async fn test_grid_size_change_invalidates_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new());
    let config = test_config(&dir, 2);
    let store = CheckpointStore::open(dir.clone()).unwrap();
    store.ensure_grid_size(config.ts_params.grid_size).unwrap();
    let task = Arc::new(CellTask::new(&config, store.clone(), remotes(&service)).unwrap());
    scheduler::schedule(cells(&aoi()), 2, task).await;
    assert_eq!(store.completed_cells(&config.signature()).unwrap().len(), 4);

    let mut finer = config.clone();
    finer.ts_params.grid_size = 0.5;
    let report = Pipeline::new(finer, service.clone(), service)
        .unwrap()
        .run_cells(Vec::new())
        .await
        .unwrap();

    assert!(report.invalidated);
    assert_eq!(report.outcome, AggregateOutcome::NoData);
    assert!(store.completed_cells(&config.signature()).unwrap().is_empty());
    assert_eq!(store.recorded_grid_size().unwrap(), Some(0.5));
}

#[tokio::test]
async fn test_outputs_do_not_depend_on_worker_count() {
    let mut outputs = Vec::new();
    for workers in [1, 8] {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8_dir(&tmp);
        let service = Arc::new(FakeService::new());
        let report = Pipeline::new(test_config(&dir, workers), service.clone(), service)
            .unwrap()
            .run_aoi(&aoi())
            .await
            .unwrap();
        let AggregateOutcome::Written { paths, .. } = report.outcome else {
            panic!("expected written outputs");
        };
        outputs.push((
            fs::read(&paths.snapshot).unwrap(),
            fs::read(&paths.geojson).unwrap(),
            fs::read(&paths.csv).unwrap(),
        ));
    }
    assert!(outputs[0] == outputs[1], "outputs differ between 1 and 8 workers");
}

#[tokio::test]
async fn test_empty_cells_write_markers_and_no_rows() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new().unresolved(1));
    let config = test_config(&dir, 3);
    let sig = config.signature();
    let store = CheckpointStore::open(dir.clone()).unwrap();
    let task = Arc::new(CellTask::new(&config, store.clone(), remotes(&service)).unwrap());

    // the third column of cells (lon 2..3) holds no point
    let wide = BoundingBox::new(0.0, 0.0, 3.0, 2.0).unwrap();
    let summary = scheduler::schedule(cells(&wide), 3, task).await;
    assert_eq!(summary.done, 3);
    assert_eq!(summary.empty, 3);
    assert_eq!(service.extract_calls.load(Ordering::SeqCst), 3);

    let reasons: Vec<_> = store
        .marker_files(&sig)
        .unwrap()
        .into_iter()
        .map(|(cell, path)| (cell, CheckpointStore::read_marker(&path).unwrap()))
        .collect();
    assert_eq!(
        reasons,
        vec![
            (1, EmptyReason::UnresolvedCount),
            (4, EmptyReason::NoPoints),
            (5, EmptyReason::NoPoints),
        ]
    );

    let outcome =
        landwatch::results::aggregate(&store, &sig, &dir, Cleanup::ClearCheckpoints).unwrap();
    assert!(matches!(outcome, AggregateOutcome::Written { rows: 12, .. }));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new().fail_extract(0, Failure::Transient(2)));
    let report = Pipeline::new(test_config(&dir, 4), service.clone(), service.clone())
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap();

    assert!(report.summary.is_complete());
    assert_eq!(service.extract_calls.load(Ordering::SeqCst), 4 + 2);
    assert!(matches!(report.outcome, AggregateOutcome::Written { rows: 16, .. }));
}

#[tokio::test]
async fn test_exhausted_retries_fail_one_cell_only() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(
        FakeService::new()
            .fail_extract(1, Failure::Always)
            .fail_extract(2, Failure::Permanent),
    );
    let config = test_config(&dir, 4);
    let sig = config.signature();
    let store = CheckpointStore::open(dir.clone()).unwrap();
    let task = Arc::new(CellTask::new(&config, store.clone(), remotes(&service)).unwrap());

    let summary = scheduler::schedule(cells(&aoi()), 4, task).await;

    assert_eq!(summary.done, 2);
    let failed: Vec<_> = summary.failed.iter().map(|(c, _)| *c).collect();
    assert_eq!(failed, vec![1, 2]);
    assert!(summary.failed[0].1.contains("after 3 attempts"));
    // 3 attempts on cell 1, one on the permanent failure, one each on the healthy cells
    assert_eq!(service.extract_calls.load(Ordering::SeqCst), 3 + 1 + 2);
    assert_eq!(store.completed_cells(&sig).unwrap(), BTreeSet::from([0, 3]));
    assert!(!dir.join(format!("tmp_results_1_{sig}.json.part")).exists());
}

#[tokio::test]
async fn test_no_data_is_not_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let service = Arc::new(FakeService::new());
    let config = test_config(&dir, 2);
    let sig = config.signature();

    let far = BoundingBox::new(10.0, 10.0, 11.0, 11.0).unwrap();
    let report = Pipeline::new(config, service.clone(), service.clone())
        .unwrap()
        .run_aoi(&far)
        .await
        .unwrap();

    assert_eq!(report.outcome, AggregateOutcome::NoData);
    assert_eq!(report.summary.empty, 1);
    assert_eq!(service.extract_calls.load(Ordering::SeqCst), 0);
    let store = CheckpointStore::open(dir.clone()).unwrap();
    assert!(store.exists(0, &sig));
    assert!(report.to_string().contains("no data processed"));
}

#[tokio::test]
async fn test_duplicate_point_keeps_checkpoints() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let duplicate = SamplePoint::new(1, 1.5, 1.5);
    let service = Arc::new(FakeService::new().inject(3, duplicate));
    let config = test_config(&dir, 4);
    let sig = config.signature();

    let err = Pipeline::new(config, service.clone(), service)
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap_err();

    assert!(err.is_data_integrity());
    assert!(matches!(
        err,
        LandwatchError::DuplicatePoint {
            point_id: 1,
            first: 0,
            second: 3,
        }
    ));
    let store = CheckpointStore::open(dir.clone()).unwrap();
    assert_eq!(store.completed_cells(&sig).unwrap().len(), 4);
}

#[tokio::test]
async fn test_run_from_json_config_with_single_algorithm() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let path = dir.join("run.json");
    let json = serde_json::json!({
        "work_dir": dir.join("out"),
        "workers": 2,
        "ts_params": {
            "band": "ndfi",
            "start_date": "2012-01-01",
            "start_monitor": "2018-12-31",
            "end_date": "2021-12-31",
            "grid_size": 1.0
        },
        "cusum_params": { "run": false },
        "bfast_params": { "run": false },
        "bs_slope_params": { "run": false },
        "ts_metrics_params": { "run": true },
        "landtrendr_params": { "run": false },
        "retry": { "base_delay_ms": 0 }
    });
    fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

    let config = landwatch::RunConfig::from_json_file(&path).unwrap();
    let service = Arc::new(FakeService::new());
    let report = Pipeline::new(config, service.clone(), service.clone())
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap();

    assert_eq!(service.segment_calls.load(Ordering::SeqCst), 0);
    let AggregateOutcome::Written { paths, .. } = report.outcome else {
        panic!("expected written outputs");
    };
    let header = fs::read_to_string(&paths.csv).unwrap();
    let header = header.lines().next().unwrap().to_string();
    assert_eq!(header, "LON,LAT,PLOTID,ts_max,ts_mean,ts_median,ts_min,ts_sd");
    assert!(paths.csv.starts_with(dir.join("out")));
}

#[tokio::test]
async fn test_failed_cell_is_the_only_one_recomputed() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let config = test_config(&dir, 4);
    let sig = config.signature();

    let flaky = Arc::new(FakeService::new().fail_extract(1, Failure::Always));
    let first = Pipeline::new(config.clone(), flaky.clone(), flaky)
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap();
    assert!(!first.complete);
    assert_eq!(first.summary.failed.len(), 1);
    assert!(matches!(first.outcome, AggregateOutcome::Written { rows: 12, .. }));
    assert!(first.to_string().contains("partial"));
    let store = CheckpointStore::open(dir.clone()).unwrap();
    assert_eq!(store.completed_cells(&sig).unwrap(), BTreeSet::from([0, 2, 3]));

    let healthy = Arc::new(FakeService::new());
    let second = Pipeline::new(config, healthy.clone(), healthy.clone())
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap();
    assert!(second.complete);
    assert_eq!(second.summary.skipped, 3);
    assert_eq!(second.summary.done, 1);
    assert_eq!(healthy.extract_calls.load(Ordering::SeqCst), 1);
    assert!(matches!(second.outcome, AggregateOutcome::Written { rows: 16, .. }));
    assert!(store.completed_cells(&sig).unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_products_without_time_series() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let config = landwatch::RunConfig::builder()
        .work_dir(&dir)
        .grid_size(1.0)
        .cusum(CusumParams {
            run: false,
            ..Default::default()
        })
        .bfast(BfastParams {
            run: false,
            ..Default::default()
        })
        .bs_slope(BsSlopeParams {
            run: false,
            ..Default::default()
        })
        .ts_metrics(false)
        .ccdc(CcdcParams {
            run: true,
            ..Default::default()
        })
        .global_products(true)
        .build()
        .unwrap();
    let service = Arc::new(FakeService::new());

    let report = Pipeline::new(config, service.clone(), service.clone())
        .unwrap()
        .with_ccdc(service.clone())
        .with_global_products(service.clone())
        .run_aoi(&aoi())
        .await
        .unwrap();

    assert!(report.complete);
    assert_eq!(service.extract_calls.load(Ordering::SeqCst), 0);
    assert_eq!(service.count_calls.load(Ordering::SeqCst), 4);
    assert_eq!(service.ccdc_calls.load(Ordering::SeqCst), 4);
    assert_eq!(service.product_calls.load(Ordering::SeqCst), 4);
    let AggregateOutcome::Written { rows, paths } = report.outcome else {
        panic!("expected written outputs");
    };
    assert_eq!(rows, 16);

    let snapshot = fs::read(&paths.snapshot).unwrap();
    let table: ResultTable = serde_json::from_slice(&snapshot).unwrap();
    let stable = &table.rows[0];
    let lost = &table.rows[2];
    assert_eq!(lost.point_id, 3);
    assert_eq!(lost.geometry, Some((0.25, 1.25)));
    assert_eq!(lost.fields["ccdc_magnitude"], FieldValue::Number(-0.5));
    assert_eq!(lost.fields["gfc_loss"], FieldValue::Integer(1));
    assert_eq!(stable.fields["ccdc_change_date"], FieldValue::Null);
    assert_eq!(stable.fields["tmf_main_cl"], FieldValue::Null);
    assert!(!stable.fields.contains_key("ts"));

    let csv = fs::read_to_string(&paths.csv).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("LON,LAT,PLOTID,ccdc_change_date,ccdc_magnitude,esa_lc20"));
}

#[tokio::test]
async fn test_enabled_product_without_collaborator_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = utf8_dir(&tmp);
    let mut config = test_config(&dir, 2);
    config.global_products.run = true;
    let service = Arc::new(FakeService::new());

    let err = Pipeline::new(config, service.clone(), service.clone())
        .unwrap()
        .run_aoi(&aoi())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        LandwatchError::InvalidConfig("global_products.run requires a product sampler".into())
    );
    assert_eq!(service.remote_calls(), 0);
    assert!(!dir.join("config.json").exists());
}
