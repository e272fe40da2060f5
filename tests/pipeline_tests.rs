//! Ingest and query against the SQLite store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use home_telemetry::{
    metrics::data::names, normalize, CpuBlock, GpuBlock, IngestWriter, Labels, MetricSample,
    MetricsQuery, QueryEngine, Snapshot, SqliteStore, Store, TelemetryError,
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
}

fn rig_snapshot(at: DateTime<Utc>) -> Snapshot {
    Snapshot::new("rig-1")
        .with_timestamp(at)
        .with_cpu(CpuBlock {
            temp_c: 55.0,
            usage_pct: 12.5,
            load_avg: 0.8,
            freq_mhz: None,
            cores: None,
        })
        .with_gpu(GpuBlock {
            name: "RTX 4090".to_string(),
            temp_c: 61.0,
            usage_pct: 97.0,
            mem_used_mb: 20480.0,
            power_w: 410.0,
        })
}

async fn pipeline() -> (Arc<SqliteStore>, IngestWriter, QueryEngine) {
    let store = Arc::new(SqliteStore::in_memory().await.expect("Should open store"));
    let writer = IngestWriter::new(store.clone());
    let engine = QueryEngine::new(store.clone());
    (store, writer, engine)
}

fn sorted(mut samples: Vec<MetricSample>) -> Vec<MetricSample> {
    samples.sort_by(|a, b| {
        (a.time, &a.metric, &a.labels).cmp(&(b.time, &b.metric, &b.labels))
    });
    samples
}

#[tokio::test]
async fn test_round_trip_matches_normalize() {
    let (_store, writer, engine) = pipeline().await;
    let snapshot = rig_snapshot(t(0)).with_tag("room", "office");

    let report = assert_ok!(writer.ingest_snapshot(&snapshot, Utc::now()).await);
    assert_eq!(report.samples, 7);
    assert_eq!(report.time, t(0));

    let stored = assert_ok!(engine.query(MetricsQuery::for_node("rig-1")).await);
    assert_eq!(sorted(stored), sorted(normalize(&snapshot, t(0))));
}

#[tokio::test]
async fn test_rig_example_stores_seven_rows_and_node() {
    let (store, writer, engine) = pipeline().await;
    assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(0)), Utc::now()).await);

    let series = assert_ok!(engine.query(MetricsQuery::for_node("rig-1")).await);
    assert_eq!(series.len(), 7);
    assert!(series.iter().all(|s| s.time == t(0)));

    let power = assert_ok!(
        engine
            .query(MetricsQuery::for_node("rig-1").metric(names::GPU_POWER_W))
            .await
    );
    assert_eq!(power.len(), 1);
    assert_eq!(power[0].value, 410.0);
    assert_eq!(power[0].labels, Labels::single("gpu", "RTX 4090"));

    let nodes = assert_ok!(store.list_nodes().await);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, "rig-1");
    assert_eq!(nodes[0].name, "rig-1");
    assert_eq!(nodes[0].last_seen, t(0));
    assert!(nodes[0].meta.is_empty());
}

#[tokio::test]
async fn test_missing_timestamp_uses_ingest_time() {
    let (store, writer, _engine) = pipeline().await;
    let now = t(3600);
    let snapshot = Snapshot::new("pi").with_cpu(CpuBlock::default());

    let report = assert_ok!(writer.ingest_snapshot(&snapshot, now).await);
    assert_eq!(report.time, now);
    assert_eq!(assert_ok!(store.list_nodes().await)[0].last_seen, now);
}

#[tokio::test]
async fn test_time_range_and_ordering() {
    let (_store, writer, engine) = pipeline().await;
    // Out of order on purpose
    for at in [t(20), t(0), t(10)] {
        assert_ok!(writer.ingest_snapshot(&rig_snapshot(at), Utc::now()).await);
    }

    let since_t2 = assert_ok!(
        engine
            .query(MetricsQuery::for_node("rig-1").metric(names::CPU_USAGE_PCT).since(t(10)))
            .await
    );
    let times: Vec<_> = since_t2.iter().map(|s| s.time).collect();
    assert_eq!(times, [t(10), t(20)]);

    let window = assert_ok!(
        engine
            .query(
                MetricsQuery::for_node("rig-1")
                    .metric(names::CPU_USAGE_PCT)
                    .since(t(0))
                    .until(t(10))
            )
            .await
    );
    let times: Vec<_> = window.iter().map(|s| s.time).collect();
    assert_eq!(times, [t(0), t(10)]);

    let all = assert_ok!(engine.query(MetricsQuery::for_node("rig-1")).await);
    assert_eq!(all.len(), 21);
    assert!(all.windows(2).all(|w| w[0].time <= w[1].time));
}

#[tokio::test]
async fn test_inverted_range_is_empty() {
    let (_store, writer, engine) = pipeline().await;
    assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(5)), Utc::now()).await);

    let series = assert_ok!(
        engine
            .query(MetricsQuery::for_node("rig-1").since(t(10)).until(t(0)))
            .await
    );
    assert!(series.is_empty());
}

#[tokio::test]
async fn test_bounds_beyond_storable_range_saturate() {
    let (_store, writer, engine) = pipeline().await;
    for at in [t(0), t(10), t(20)] {
        assert_ok!(writer.ingest_snapshot(&rig_snapshot(at), Utc::now()).await);
    }
    let ancient = Utc.with_ymd_and_hms(1600, 1, 1, 0, 0, 0).unwrap();
    let far = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
    let cpu_usage = || MetricsQuery::for_node("rig-1").metric(names::CPU_USAGE_PCT);

    let open_ended = assert_ok!(engine.query(cpu_usage().until(far)).await);
    assert_eq!(open_ended.len(), 3);

    let from_ancient = assert_ok!(engine.query(cpu_usage().since(ancient)).await);
    assert_eq!(from_ancient.len(), 3);

    let both = assert_ok!(engine.query(cpu_usage().since(ancient).until(far)).await);
    assert_eq!(both.len(), 3);

    assert!(assert_ok!(engine.query(cpu_usage().since(far)).await).is_empty());
    assert!(assert_ok!(engine.query(cpu_usage().until(ancient)).await).is_empty());
}

#[tokio::test]
async fn test_snapshot_time_beyond_storable_range_is_rejected() {
    let (store, writer, _engine) = pipeline().await;
    let far = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();

    let err = assert_err!(writer.ingest_snapshot(&rig_snapshot(far), Utc::now()).await);
    assert!(matches!(err, TelemetryError::Validation(_)));
    assert!(assert_ok!(store.list_nodes().await).is_empty());
}

#[tokio::test]
async fn test_unknown_node_and_metric_are_empty() {
    let (_store, writer, engine) = pipeline().await;
    assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(0)), Utc::now()).await);

    assert!(assert_ok!(engine.query(MetricsQuery::for_node("ghost")).await).is_empty());
    assert!(assert_ok!(
        engine
            .query(MetricsQuery::for_node("rig-1").metric("disk.free"))
            .await
    )
    .is_empty());
}

#[tokio::test]
async fn test_empty_node_id_is_rejected() {
    let (store, writer, engine) = pipeline().await;

    let err = assert_err!(writer.ingest_snapshot(&Snapshot::new(""), Utc::now()).await);
    assert!(matches!(err, TelemetryError::Validation(_)));
    assert!(assert_ok!(store.list_nodes().await).is_empty());

    let err = assert_err!(engine.query(MetricsQuery::for_node("")).await);
    assert!(matches!(err, TelemetryError::Validation(_)));
}

#[tokio::test]
async fn test_limit_default_and_clamp() {
    let (_store, writer, engine) = pipeline().await;
    let samples: Vec<MetricSample> = (0..10_050)
        .map(|i| MetricSample {
            time: t(i),
            metric: "bulk.value".to_string(),
            value: i as f64,
            labels: Labels::new(),
        })
        .collect();
    assert_ok!(writer.ingest("bulk", t(10_049), &samples, None).await);

    let cases = [
        (None, 1000),
        (Some(0), 1000),
        (Some(-3), 1000),
        (Some(50_000), 10_000),
        (Some(25), 25),
    ];
    for (limit, expected) in cases {
        let mut query = MetricsQuery::for_node("bulk");
        query.limit = limit;
        let series = assert_ok!(engine.query(query).await);
        assert_eq!(series.len(), expected, "limit {limit:?}");
        assert_eq!(series[0].time, t(0));
    }
}

#[tokio::test]
async fn test_failed_insert_rolls_back_whole_batch() {
    let (store, writer, engine) = pipeline().await;
    assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(0)), Utc::now()).await);

    sqlx::query(
        r#"
        CREATE TRIGGER reject_power BEFORE INSERT ON metrics
        WHEN NEW.metric = 'gpu.power_w'
        BEGIN
            SELECT RAISE(ABORT, 'injected failure');
        END
        "#,
    )
    .execute(store.pool())
    .await
    .expect("Should create trigger");

    let err = assert_err!(
        writer
            .ingest_snapshot(&rig_snapshot(t(60)).with_tag("room", "lab"), Utc::now())
            .await
    );
    assert!(matches!(err, TelemetryError::Storage(_)));

    let series = assert_ok!(engine.query(MetricsQuery::for_node("rig-1")).await);
    assert_eq!(series.len(), 7);
    assert!(series.iter().all(|s| s.time == t(0)));

    let nodes = assert_ok!(store.list_nodes().await);
    assert_eq!(nodes[0].last_seen, t(0));
    assert!(nodes[0].meta.is_empty());
}

#[tokio::test]
async fn test_reingest_replaces_meta_and_keeps_duplicates() {
    let (store, writer, engine) = pipeline().await;
    let tagged = rig_snapshot(t(0)).with_tag("room", "office");
    assert_ok!(writer.ingest_snapshot(&tagged, Utc::now()).await);
    assert_ok!(writer.ingest_snapshot(&tagged, Utc::now()).await);

    let series = assert_ok!(
        engine
            .query(MetricsQuery::for_node("rig-1").metric(names::CPU_TEMP_C))
            .await
    );
    assert_eq!(series.len(), 2);

    assert_eq!(assert_ok!(store.list_nodes().await)[0].meta.get("room"), Some("office"));

    assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(30)), Utc::now()).await);
    let node = &assert_ok!(store.list_nodes().await)[0];
    assert_eq!(node.last_seen, t(30));
    assert!(node.meta.is_empty());
}

#[tokio::test]
async fn test_concurrent_ingests() {
    let (store, writer, engine) = pipeline().await;

    let handles: Vec<_> = ["delta", "alpha", "charlie", "bravo"]
        .into_iter()
        .map(|id| {
            let writer = writer.clone();
            tokio::spawn(async move {
                let snapshot = Snapshot::new(id)
                    .with_timestamp(t(0))
                    .with_cpu(CpuBlock::default());
                writer.ingest_snapshot(&snapshot, Utc::now()).await
            })
        })
        .collect();

    for result in futures_util::future::join_all(handles).await {
        assert_ok!(result.expect("Ingest task should not panic"));
    }

    let ids: Vec<String> = assert_ok!(store.list_nodes().await)
        .into_iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(ids, ["alpha", "bravo", "charlie", "delta"]);

    for id in ids {
        let series = assert_ok!(engine.query(MetricsQuery::for_node(id)).await);
        assert_eq!(series.len(), 3);
    }
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let path = std::env::temp_dir().join(format!("home_telemetry_{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());

    {
        let store = Arc::new(assert_ok!(SqliteStore::connect(&url).await));
        let writer = IngestWriter::new(store.clone());
        assert_ok!(writer.ingest_snapshot(&rig_snapshot(t(0)), Utc::now()).await);
        store.close().await;
    }

    let store = Arc::new(assert_ok!(SqliteStore::connect(&url).await));
    let engine = QueryEngine::new(store.clone());
    let series = assert_ok!(engine.query(MetricsQuery::for_node("rig-1")).await);
    assert_eq!(series.len(), 7);
    store.close().await;

    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}
