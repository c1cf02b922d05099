use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod controller;
mod dbus_interface;
mod gate;
mod session;

use dbus_interface::{ScannerService, BUS_NAME, OBJECT_PATH};
use session::SessionIdentity;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("emoscand starting");

    let config = config::Config::from_env();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        width = config.constraints.width,
        height = config.constraints.height,
        ready_timeout_ms = config.ready_timeout.as_millis() as u64,
        "configuration loaded"
    );

    let provider = emoscan_core::OnnxModelProvider::new(config.detection_threshold);
    let camera = emoscan_hw::V4l2Camera::new(config.camera_device.clone());
    tracing::info!(device = camera.device_path(), "using V4L2 camera");
    let controller = controller::spawn_controller(provider, camera, config.controller_config())?;

    let session = match &config.user_name {
        Some(name) => SessionIdentity::with_name(name),
        None => SessionIdentity::new(),
    };
    let service = ScannerService::new(controller.clone(), session);

    let conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "D-Bus interface registered");

    let emitter = SignalEmitter::new(&conn, OBJECT_PATH)?;
    let mut notices = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(notice) => {
                    if let Err(e) = ScannerService::notification(
                        &emitter,
                        notice.level.as_str(),
                        &notice.message,
                    )
                    .await
                    {
                        tracing::warn!(error = %e, "failed to emit notification signal");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification forwarder lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    tracing::info!("emoscand ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("emoscand shutting down");
    controller.shutdown().await;

    Ok(())
}
