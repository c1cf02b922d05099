//! Camera capability traits and the acquisition error taxonomy.

use emoscan_core::Frame;
use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("camera error: {0}")]
    Other(String),
}

impl CameraError {
    /// Notice shown to the user when a start attempt fails.
    pub fn user_message(&self) -> String {
        match self {
            CameraError::PermissionDenied => {
                "Camera permission denied. Please allow camera access.".to_string()
            }
            CameraError::DeviceNotFound(_) => "No camera found. Please connect a camera.".to_string(),
            CameraError::Other(msg) => format!("Unable to access camera: {msg}"),
        }
    }
}

/// Requested capture parameters. Devices treat them as ideals, not minimums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub width: u32,
    pub height: u32,
    /// "user" (front-facing) or "environment".
    pub facing_mode: String,
    pub frame_rate: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            facing_mode: "user".to_string(),
            frame_rate: 30,
        }
    }
}

/// A source of live video streams.
pub trait CameraDevice {
    type Stream: VideoStream + 'static;

    fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> impl Future<Output = Result<Self::Stream, CameraError>>;
}

/// Capture side of a stream's failure channel.
#[derive(Debug)]
pub struct FailureReporter {
    tx: watch::Sender<Option<CameraError>>,
}

impl FailureReporter {
    /// Record the error that stopped capture. The first report wins.
    pub fn report(&self, error: CameraError) {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(error);
            true
        });
    }
}

/// Observer side of a stream's failure channel.
#[derive(Debug, Clone)]
pub struct FailureSignal {
    rx: watch::Receiver<Option<CameraError>>,
}

impl FailureSignal {
    /// The reported failure, if capture has already stopped.
    pub fn current(&self) -> Option<CameraError> {
        self.rx.borrow().clone()
    }

    /// Resolves with the reported error. Stays pending if the reporter is
    /// dropped without reporting (a clean release).
    pub async fn failed(mut self) -> CameraError {
        let reported = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|slot| slot.clone());
        match reported {
            Ok(Some(error)) => error,
            _ => std::future::pending().await,
        }
    }
}

pub fn failure_channel() -> (FailureReporter, FailureSignal) {
    let (tx, rx) = watch::channel(None);
    (FailureReporter { tx }, FailureSignal { rx })
}

/// A live stream exclusively owned by its holder.
///
/// Implementations must release the device when dropped.
pub trait VideoStream {
    /// Resolves once the device reports a live frame, or with the capture
    /// error if capture stopped first. Never resolves if the device neither
    /// signals nor fails.
    fn ready(&mut self) -> impl Future<Output = Result<(), CameraError>>;

    /// Fires if capture stops unexpectedly after acquisition.
    fn failure_signal(&self) -> FailureSignal;

    /// Current frame size, (0, 0) until the first frame has arrived.
    fn frame_dimensions(&self) -> (u32, u32);

    /// Frames delivered since acquisition.
    fn buffered_frames(&self) -> usize;

    /// Most recent frame, if any.
    fn latest_frame(&self) -> Option<Frame>;

    /// Stop capture and free the device. Idempotent.
    fn release(&mut self);
}
