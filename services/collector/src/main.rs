//! Collector service entrypoint.
//!
//! Startup sequence: load configuration, load devices/points/rules/
//! virtual points from the `ConfigStore`, spawn one worker per enabled
//! device with per-device error isolation (one bad device must not stop
//! the others from starting), then spawn the processing pool and wait
//! for shutdown.

use collector::alarm_engine::AlarmEngine;
use collector::cache_writer::CacheWriter;
use collector::config::CollectorConfig;
use collector::config_store::{ConfigStore, StaticConfigStore};
use collector::pipeline::Pipeline;
use collector::processing::DataProcessingService;
use collector::virtual_points::VirtualPointEngine;
use collector::worker::{SimulatedDriverFactory, WorkerFactory, WorkerManager};
use collector_calc::{CalcEngine, MemoryStateStore};
use collector_rtdb::MemoryRtdb;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> collector_errors::Result<()> {
    collector_common::logging::init();
    let config = CollectorConfig::load()?;
    info!(
        pipeline_capacity = config.pipeline_capacity,
        worker_pool_size = config.worker_pool_size,
        "starting collector"
    );

    let config_store: Arc<dyn ConfigStore> = StaticConfigStore::new(vec![], vec![], vec![], vec![]);
    let rtdb = Arc::new(MemoryRtdb::new());
    let cache_writer = Arc::new(CacheWriter::new(rtdb, config.latest_ttl_secs * 1000));

    let script_deadline = Duration::from_millis(config.script_deadline_ms);
    let alarm_rules = config_store.find_alarm_rules().await?;
    let virtual_points = config_store.find_virtual_points().await?;

    let alarm_calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "alarm");
    let alarm_engine = Arc::new(AlarmEngine::new(alarm_rules, alarm_calc, cache_writer.clone(), script_deadline));
    alarm_engine
        .recover_occurrences(config_store.find_active_alarm_occurrences().await?)
        .await;

    let vp_calc = CalcEngine::new(Arc::new(MemoryStateStore::new()), "virtual-point");
    let vp_engine = Arc::new(VirtualPointEngine::new(virtual_points, vp_calc, cache_writer.clone(), script_deadline)?);

    let pipeline = Pipeline::new(config.pipeline_capacity);
    let driver_factory = Box::new(SimulatedDriverFactory::new());
    let worker_factory = WorkerFactory::new(driver_factory);
    let worker_manager = Arc::new(WorkerManager::new(worker_factory, pipeline.clone(), cache_writer.clone()));

    let devices = config_store.find_all_devices().await?;
    for device in devices.into_iter().filter(|d| d.enabled) {
        let device_id = device.id;
        if let Err(e) = device.validate() {
            warn!(device_id, error = %e, "skipping invalid device configuration");
            continue;
        }
        let points = match config_store.find_data_points_by_device_id(device_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(device_id, error = %e, "failed to load data points, skipping device");
                continue;
            }
        };
        if !worker_manager.start(device, points) {
            warn!(device_id, "worker already running, skipped duplicate start");
        }
    }

    let processing_service = Arc::new(DataProcessingService::new(
        pipeline,
        cache_writer,
        alarm_engine,
        vp_engine,
    ));
    let processing_cancel = CancellationToken::new();
    let processing_handles = processing_service.spawn_pool(config.worker_pool_size, processing_cancel.clone());

    collector_common::shutdown::wait_for_shutdown().await;
    info!("shutdown signal received, draining");

    worker_manager.stop_all().await;
    processing_cancel.cancel();
    for handle in processing_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "processing task panicked during shutdown");
        }
    }

    info!("collector stopped");
    Ok(())
}
