//! End-to-end scenarios exercising the collector's main subsystems
//! together. Each test builds the minimum set of components the
//! scenario needs directly, the same way the unit tests inside each
//! module do, rather than going through `main`.

use collector::alarm_engine::AlarmEngine;
use collector::cache_writer::CacheWriter;
use collector::config_store::StaticConfigStore;
use collector::pipeline::Pipeline;
use collector::virtual_points::VirtualPointEngine;
use collector::worker::factory::{SimulatedDriverFactory, WorkerFactory};
use collector::worker::manager::WorkerManager;
use collector_calc::{CalcEngine, MemoryStateStore};
use collector_model::alarm::{AlarmKind, AlarmOccurrence, AlarmRule, OccurrenceState, Severity, TargetType, TriggerCondition};
use collector_model::device::{Device, DeviceSettings, Protocol};
use collector_model::point::DataType;
use collector_model::value::{DeviceDataMessage, Quality, Value};
use collector_model::virtual_point::{ErrorHandling, Trigger, VirtualPoint, VirtualPointInput};
use collector_rtdb::{keyspace, MemoryRtdb, Rtdb};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn analog_rule() -> AlarmRule {
    AlarmRule {
        id: 1,
        tenant_id: 1,
        name: "tank level".into(),
        target_type: TargetType::DataPoint,
        target_id: 4,
        kind: AlarmKind::Analog,
        high_high: None,
        high: Some(35.0),
        low: None,
        low_low: None,
        deadband: 2.0,
        trigger_condition: None,
        condition_script: None,
        message_template: "{point_name} at {value}".into(),
        message_script: None,
        severity: Severity::High,
        priority: 0,
        auto_clear: true,
        enabled: true,
    }
}

fn digital_rule() -> AlarmRule {
    AlarmRule {
        id: 2,
        tenant_id: 1,
        name: "emergency stop".into(),
        target_type: TargetType::DataPoint,
        target_id: 5,
        kind: AlarmKind::Digital,
        high_high: None,
        high: None,
        low: None,
        low_low: None,
        deadband: 0.0,
        trigger_condition: Some(TriggerCondition::OnTrue),
        condition_script: None,
        message_template: "{point_name} tripped".into(),
        message_script: None,
        severity: Severity::Critical,
        priority: 0,
        auto_clear: true,
        enabled: true,
    }
}

fn alarm_engine_with(rule: AlarmRule) -> (AlarmEngine<MemoryStateStore>, Arc<MemoryRtdb>) {
    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb.clone(), 300_000));
    let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "e2e-alarm");
    let engine = AlarmEngine::new(vec![rule], calc, cache_writer, Duration::from_secs(1));
    (engine, rtdb)
}

/// E1: threshold alarm with hysteresis; `alarms:high` sees exactly the
/// trigger and the clear, nothing for the in-between readings.
#[tokio::test]
async fn e1_threshold_alarm_hysteresis_and_channel_count() {
    let (engine, rtdb) = alarm_engine_with(analog_rule());
    let readings = [34.0, 36.5, 37.0, 34.5, 33.0];
    let mut states = Vec::new();

    for (i, v) in readings.iter().enumerate() {
        let changed = engine.evaluate_point(4, &Value::Float(*v), 1000 * i as i64).await.unwrap();
        states.push(changed.first().map(|o| o.state));
    }

    assert_eq!(states[0], None); // 34.0: below high, nothing happens
    assert_eq!(states[1], Some(OccurrenceState::Active)); // 36.5 crosses 35.0
    assert_eq!(states[2], None); // 37.0: already active, no new transition
    assert_eq!(states[3], None); // 34.5: within hysteresis band (35 - 1.0 = 34), stays active
    assert_eq!(states[4], Some(OccurrenceState::Cleared)); // 33.0: below the band, clears
    assert_eq!(engine.active_count(), 0);

    let high_events: Vec<_> = rtdb
        .published_messages()
        .into_iter()
        .filter(|(channel, _)| channel == keyspace::CHANNEL_HIGH)
        .collect();
    assert_eq!(high_events.len(), 2);
}

/// E2: digital emergency-stop rule only opens once on the 0->1 edge and
/// clears once on the 1->0 edge, with both events on `alarms:critical`.
#[tokio::test]
async fn e2_digital_emergency_stop_single_edge_events() {
    let (engine, rtdb) = alarm_engine_with(digital_rule());
    let readings = [0, 0, 1, 1, 0];
    let mut open_count = 0;
    let mut clear_count = 0;

    for (i, v) in readings.iter().enumerate() {
        let changed = engine.evaluate_point(5, &Value::Int(*v), 1000 * i as i64).await.unwrap();
        for occurrence in &changed {
            match occurrence.state {
                OccurrenceState::Active => open_count += 1,
                OccurrenceState::Cleared => clear_count += 1,
                _ => {}
            }
        }
    }

    assert_eq!(open_count, 1);
    assert_eq!(clear_count, 1);

    let critical_events: Vec<_> = rtdb
        .published_messages()
        .into_iter()
        .filter(|(channel, _)| channel == keyspace::CHANNEL_CRITICAL)
        .collect();
    assert_eq!(critical_events.len(), 2);
}

fn avg_virtual_point() -> VirtualPoint {
    VirtualPoint {
        id: 100,
        tenant_id: 1,
        name: "avg_temp".into(),
        formula: "(z1+z2+amb)/3".into(),
        inputs: vec![
            VirtualPointInput { alias: "z1".into(), source_point_id: 13 },
            VirtualPointInput { alias: "z2".into(), source_point_id: 14 },
            VirtualPointInput { alias: "amb".into(), source_point_id: 15 },
        ],
        trigger: Trigger::OnChange,
        interval_ms: None,
        error_handling: ErrorHandling::ReturnLast,
        default_value: None,
        data_type: DataType::Float64,
        enabled: true,
        last_value: Some(24.5),
        last_calc_time: None,
    }
}

/// E3: virtual-point average; full inputs give 25.0 at GOOD quality, and
/// (independently, starting from a previous value of 24.5) a missing
/// input falls back to that last value at UNCERTAIN quality.
#[tokio::test]
async fn e3_virtual_point_average_full_inputs() {
    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb.clone(), 300_000));
    let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "e2e-vp-full");
    let engine = VirtualPointEngine::new(vec![avg_virtual_point()], calc, cache_writer, Duration::from_secs(1)).unwrap();

    let mut values = std::collections::HashMap::new();
    values.insert(13, 24.0);
    values.insert(14, 26.0);
    values.insert(15, 25.0);
    let results = engine.on_point_changed(13, &values).await;
    assert_eq!(results, vec![(100, 25.0)]);

    let key = keyspace::virtual_point_result(100);
    let stored = rtdb.get_json(&key).await.unwrap().unwrap();
    assert_eq!(stored["value"].as_f64().unwrap(), 25.0);
    assert_eq!(stored["quality"].as_u64().unwrap(), u8::from(Quality::Good) as u64);
}

#[tokio::test]
async fn e3_virtual_point_missing_input_falls_back_to_last_value_uncertain() {
    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb.clone(), 300_000));
    let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "e2e-vp-fallback");
    let engine = VirtualPointEngine::new(vec![avg_virtual_point()], calc, cache_writer, Duration::from_secs(1)).unwrap();

    let mut partial = std::collections::HashMap::new();
    partial.insert(13, 24.0);
    partial.insert(15, 25.0); // z2 (point 14) missing
    let result = engine.evaluate_on_demand(100, &partial).await;
    assert_eq!(result, Some(24.5));

    let key = keyspace::virtual_point_result(100);
    let stored = rtdb.get_json(&key).await.unwrap().unwrap();
    assert_eq!(stored["value"].as_f64().unwrap(), 24.5);
    assert_eq!(stored["quality"].as_u64().unwrap(), u8::from(Quality::Uncertain) as u64);
}

fn unreachable_device(fault_endpoint: &str) -> Device {
    Device {
        id: 42,
        name: "flaky".into(),
        protocol: Protocol::ModbusTcp,
        endpoint: fault_endpoint.into(),
        enabled: true,
        config: Default::default(),
        settings: DeviceSettings {
            polling_interval_ms: 50,
            connection_timeout_ms: 50,
            read_timeout_ms: 50,
            write_timeout_ms: 50,
            max_retry_count: 0, // unbounded, so it keeps retrying until the endpoint recovers
            retry_interval_ms: 20,
            backoff_multiplier: 1.0, // flat delay, keeps the test's timing predictable
            backoff_time_ms: 20,
            max_backoff_time_ms: 20,
            keep_alive_enabled: false,
            keep_alive_interval_s: 30,
            keep_alive_timeout_s: 5,
        },
    }
}

/// E4: a worker started against an unreachable endpoint stays registered
/// and mirrors RECONNECTING into the cache, then reaches RUNNING on its
/// own once the endpoint comes back, without a second `start` call.
#[tokio::test]
async fn e4_reconnect_survives_and_recovers() {
    let driver_factory = Box::new(SimulatedDriverFactory::new());
    let faults = driver_factory.faults();
    faults.set_fail_connect(true);

    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb.clone(), 300_000));
    let factory = WorkerFactory::new(driver_factory);
    let pipeline = Pipeline::new(100);
    let manager = WorkerManager::new(factory, pipeline, cache_writer);

    let device = unreachable_device("tcp://10.0.0.1:502");
    let started = manager.start(device, vec![]);
    assert!(started);
    assert!(manager.has(42));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(manager.has(42));

    let status_key = keyspace::worker_status(42);
    let status = rtdb.get_json(&status_key).await.unwrap().expect("worker status written");
    assert_eq!(status["state"].as_str().unwrap(), "RECONNECTING");

    faults.set_fail_connect(false);
    tokio::time::sleep(Duration::from_millis(300)).await;

    let status = rtdb.get_json(&status_key).await.unwrap().expect("worker status written");
    assert_eq!(status["state"].as_str().unwrap(), "RUNNING");

    manager.stop_all().await;
}

/// E5: a full pipeline with a slow consumer sheds down to the most
/// recent `capacity` messages for the one device producing them.
#[tokio::test]
async fn e5_backpressure_sheds_to_last_capacity_messages() {
    const CAPACITY: usize = 8;
    let pipeline = Pipeline::new(CAPACITY);
    let consumed = Arc::new(AtomicUsize::new(0));
    let delivered_timestamps = Arc::new(RwLock::new(Vec::new()));

    let consumer_pipeline = pipeline.clone();
    let consumer_consumed = consumed.clone();
    let consumer_timestamps = delivered_timestamps.clone();
    let consumer = tokio::spawn(async move {
        loop {
            let Some(message) = consumer_pipeline.recv().await else { break };
            consumer_timestamps.write().push(message.timestamp);
            consumer_consumed.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    });

    for i in 0..32u32 {
        let message = DeviceDataMessage::new(7, Protocol::ModbusTcp, i as i64, 0, vec![]);
        pipeline.push(message);
    }

    tokio::time::sleep(Duration::from_millis(800)).await;
    consumer.abort();

    let stats = pipeline.stats();
    assert!(stats.shed_count >= 24, "expected at least 24 shed, got {}", stats.shed_count);

    let delivered = delivered_timestamps.read().clone();
    // Whatever made it through the consumer before abort should be a
    // contiguous, increasing suffix of the original 32 timestamps.
    for window in delivered.windows(2) {
        assert!(window[0] < window[1]);
    }
}

/// Each occurrence targets a distinct rule (at most one non-terminal
/// occurrence per rule/target pair), so `id` also stands in for
/// `rule_id` here.
fn occurrence(id: i64, state: OccurrenceState) -> AlarmOccurrence {
    AlarmOccurrence {
        id,
        rule_id: id,
        tenant_id: 1,
        occurrence_time: 1000,
        trigger_value: 90.0,
        state,
        severity: Severity::High,
        cleared_time: if state == OccurrenceState::Cleared { Some(2000) } else { None },
        ack_time: None,
        context_data: serde_json::Value::Null,
    }
}

/// E6: startup recovery restores non-terminal occurrences without
/// re-evaluating rules and without creating new occurrence rows.
#[tokio::test]
async fn e6_startup_alarm_recovery_restores_non_terminal_only() {
    let store = StaticConfigStore::new(vec![], vec![], vec![analog_rule()], vec![]);
    store.seed_occurrence(occurrence(1, OccurrenceState::Active));
    store.seed_occurrence(occurrence(2, OccurrenceState::Active));
    store.seed_occurrence(occurrence(3, OccurrenceState::Acknowledged));
    store.seed_occurrence(occurrence(4, OccurrenceState::Cleared));

    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb.clone(), 300_000));
    let calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "e2e-recovery");
    let engine = AlarmEngine::new(vec![analog_rule()], calc, cache_writer, Duration::from_secs(1));

    use collector::config_store::ConfigStore;
    let active = store.find_active_alarm_occurrences().await.unwrap();
    assert_eq!(active.len(), 3);
    engine.recover_occurrences(active).await;

    assert_eq!(engine.active_count(), 3);
    for rule_id in [1, 2, 3] {
        assert!(rtdb.get(&keyspace::alarm_active(rule_id)).await.unwrap().is_some());
    }

    let all_events: Vec<_> = rtdb
        .published_messages()
        .into_iter()
        .filter(|(channel, _)| channel == keyspace::CHANNEL_ALL)
        .collect();
    assert_eq!(all_events.len(), 3);

    // Recovery must never create new rows in the config store - only
    // whatever `save_alarm_occurrence` would have been called for that,
    // and the test never calls it.
    assert_eq!(store.find_active_alarm_occurrences().await.unwrap().len(), 3);
}
