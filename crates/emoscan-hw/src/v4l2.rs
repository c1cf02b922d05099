//! V4L2 camera capture via the `v4l` crate.
//!
//! Each acquired stream owns a dedicated capture thread that opens the
//! device, negotiates a format, and keeps the most recent grayscale frame.

use crate::camera::{
    failure_channel, CameraDevice, CameraError, CaptureConstraints, FailureReporter, FailureSignal,
    VideoStream,
};
use emoscan_core::frame::{self, Frame};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_BUFFERS: u32 = 4;
/// Upper bound on how long a blocked dequeue delays a stop request.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(250);

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Motion JPEG, decoded per frame.
    Mjpg,
}

#[derive(Debug, Clone, Copy)]
struct Negotiated {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// A V4L2 video node, e.g. "/dev/video0".
#[derive(Debug, Clone)]
pub struct V4l2Camera {
    device_path: String,
    closing: Closing,
}

/// Capture threads told to stop that may still be inside a dequeue.
///
/// `release()` parks the worker here instead of joining it on the caller's
/// thread; the next `acquire()` joins them on the blocking pool so the node
/// is closed before it is reopened.
#[derive(Debug, Clone, Default)]
struct Closing {
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Closing {
    fn park(&self, worker: JoinHandle<()>) {
        match self.workers.lock() {
            Ok(mut workers) => workers.push(worker),
            // Lock poisoned: detach; the thread still exits on the stop flag.
            Err(_) => drop(worker),
        }
    }

    async fn drain(&self) {
        let workers: Vec<_> = match self.workers.lock() {
            Ok(mut workers) => workers.drain(..).collect(),
            Err(_) => return,
        };
        if workers.is_empty() {
            return;
        }

        let joined = tokio::task::spawn_blocking(move || {
            workers.into_iter().filter(|w| w.join().is_err()).count()
        })
        .await;
        match joined {
            Ok(0) => {}
            Ok(panicked) => tracing::warn!(panicked, "capture thread panicked"),
            Err(e) => tracing::warn!(error = %e, "failed to join capture threads"),
        }
    }
}

impl V4l2Camera {
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            closing: Closing::default(),
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device_path
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CameraDevice for V4l2Camera {
    type Stream = V4l2Stream;

    async fn acquire(&self, constraints: &CaptureConstraints) -> Result<V4l2Stream, CameraError> {
        self.closing.drain().await;

        let shared = Arc::new(Shared::default());
        let (open_tx, open_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = watch::channel(false);
        let (reporter, failure) = failure_channel();

        let worker = {
            let shared = Arc::clone(&shared);
            let path = self.device_path.clone();
            let constraints = constraints.clone();
            std::thread::Builder::new()
                .name("emoscan-capture".into())
                .spawn(move || {
                    capture_loop(&path, &constraints, &shared, open_tx, ready_tx, &reporter)
                })
                .map_err(|e| CameraError::Other(format!("failed to spawn capture thread: {e}")))?
        };

        match open_rx.await {
            Ok(Ok(negotiated)) => {
                tracing::info!(
                    device = %self.device_path,
                    width = negotiated.width,
                    height = negotiated.height,
                    format = ?negotiated.format,
                    "camera stream acquired"
                );
                Ok(V4l2Stream {
                    shared,
                    ready: ready_rx,
                    failure,
                    worker: Some(worker),
                    closing: self.closing.clone(),
                    device_path: self.device_path.clone(),
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CameraError::Other(
                "capture thread exited while opening the device".into(),
            )),
        }
    }
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Option<Frame>>,
    frames: AtomicUsize,
    width: AtomicU32,
    height: AtomicU32,
    stop: AtomicBool,
}

/// Live V4L2 stream. Dropping it stops capture and closes the device.
pub struct V4l2Stream {
    shared: Arc<Shared>,
    ready: watch::Receiver<bool>,
    failure: FailureSignal,
    worker: Option<JoinHandle<()>>,
    closing: Closing,
    device_path: String,
}

impl VideoStream for V4l2Stream {
    async fn ready(&mut self) -> Result<(), CameraError> {
        if self.ready.wait_for(|ready| *ready).await.is_ok() {
            return Ok(());
        }
        // Capture thread is gone without ever delivering a frame.
        Err(self
            .failure
            .current()
            .unwrap_or_else(|| CameraError::Other("capture stopped before the first frame".into())))
    }

    fn failure_signal(&self) -> FailureSignal {
        self.failure.clone()
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        (
            self.shared.width.load(Ordering::Acquire),
            self.shared.height.load(Ordering::Acquire),
        )
    }

    fn buffered_frames(&self) -> usize {
        self.shared.frames.load(Ordering::Acquire)
    }

    fn latest_frame(&self) -> Option<Frame> {
        // A dead capture thread leaves a frozen frame behind; never hand it out.
        if self.failure.current().is_some() {
            return None;
        }
        self.shared.latest.lock().ok().and_then(|slot| slot.clone())
    }

    fn release(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::Release);
        // Exits within one DEQUEUE_TIMEOUT; joined by the next acquire().
        self.closing.park(worker);
        tracing::info!(device = %self.device_path, "camera stream released");
    }
}

impl Drop for V4l2Stream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Open and configure a V4L2 device (runs on the capture thread).
fn open_device(
    device_path: &str,
    constraints: &CaptureConstraints,
) -> Result<(Device, Negotiated), CameraError> {
    if !Path::new(device_path).exists() {
        return Err(CameraError::DeviceNotFound(device_path.to_string()));
    }

    let device = Device::with_path(device_path).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied,
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        _ if e.to_string().contains("busy") => CameraError::Other("device busy".into()),
        _ => CameraError::Other(format!("{device_path}: {e}")),
    })?;

    let caps = device
        .query_caps()
        .map_err(|e| CameraError::Other(format!("failed to query capabilities: {e}")))?;

    tracing::info!(
        device = device_path,
        driver = %caps.driver,
        card = %caps.card,
        "opened camera"
    );

    if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
        return Err(CameraError::Other(format!(
            "{device_path} does not support video capture"
        )));
    }

    // facing_mode has no V4L2 equivalent; the configured node decides.
    tracing::debug!(facing_mode = %constraints.facing_mode, "facing mode ignored for V4L2");

    let mut fmt = device
        .format()
        .map_err(|e| CameraError::Other(format!("failed to get format: {e}")))?;
    fmt.fourcc = FourCC::new(b"YUYV");
    fmt.width = constraints.width;
    fmt.height = constraints.height;

    let negotiated = device
        .set_format(&fmt)
        .map_err(|e| CameraError::Other(format!("failed to set format: {e}")))?;

    let fourcc = negotiated.fourcc;
    let format = if fourcc == FourCC::new(b"YUYV") {
        PixelFormat::Yuyv
    } else if fourcc == FourCC::new(b"GREY") {
        PixelFormat::Grey
    } else if fourcc == FourCC::new(b"MJPG") {
        PixelFormat::Mjpg
    } else {
        return Err(CameraError::Other(format!(
            "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or MJPG)"
        )));
    };

    if let Err(e) = device.set_params(&Parameters::with_fps(constraints.frame_rate)) {
        tracing::warn!(error = %e, fps = constraints.frame_rate, "frame rate not applied");
    }

    tracing::info!(
        width = negotiated.width,
        height = negotiated.height,
        fourcc = ?fourcc,
        "negotiated format"
    );

    Ok((
        device,
        Negotiated {
            width: negotiated.width,
            height: negotiated.height,
            format,
        },
    ))
}

fn capture_loop(
    device_path: &str,
    constraints: &CaptureConstraints,
    shared: &Shared,
    open_tx: oneshot::Sender<Result<Negotiated, CameraError>>,
    ready_tx: watch::Sender<bool>,
    failure: &FailureReporter,
) {
    let (device, negotiated) = match open_device(device_path, constraints) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = open_tx.send(Err(e));
            return;
        }
    };

    let mut stream = match MmapStream::with_buffers(&device, BufType::VideoCapture, CAPTURE_BUFFERS) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = open_tx.send(Err(CameraError::Other(format!(
                "failed to create mmap stream: {e}"
            ))));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);

    if open_tx.send(Ok(negotiated)).is_err() {
        // Acquirer gave up before the device opened.
        return;
    }

    while !shared.stop.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(next) => next,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                tracing::warn!(device = device_path, error = %e, "failed to dequeue buffer; capture stopped");
                // Reported before ready_tx drops so ready() sees the cause.
                failure.report(CameraError::Other(format!("capture failed: {e}")));
                break;
            }
        };

        if shared.frames.load(Ordering::Acquire) == 0 {
            shared.width.store(negotiated.width, Ordering::Release);
            shared.height.store(negotiated.height, Ordering::Release);
        }

        let frame = match decode_buffer(buf, &negotiated, meta.sequence) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(seq = meta.sequence, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        if let Ok(mut slot) = shared.latest.lock() {
            *slot = Some(frame);
        }
        if shared.frames.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::debug!(device = device_path, "first frame captured");
            ready_tx.send_replace(true);
        }
    }

    tracing::debug!(device = device_path, "capture thread exiting");
}

/// Convert a raw buffer to a grayscale frame based on the negotiated format.
fn decode_buffer(buf: &[u8], negotiated: &Negotiated, sequence: u32) -> Result<Frame, CameraError> {
    let Negotiated { width, height, format } = *negotiated;
    let pixels = width as usize * height as usize;

    let (gray, width, height) = match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(CameraError::Other(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            (buf[..pixels].to_vec(), width, height)
        }
        PixelFormat::Yuyv => {
            let gray = frame::yuyv_to_grayscale(buf, width, height)
                .map_err(|e| CameraError::Other(format!("YUYV conversion failed: {e}")))?;
            (gray, width, height)
        }
        PixelFormat::Mjpg => {
            let luma = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
                .map_err(|e| CameraError::Other(format!("MJPG decode failed: {e}")))?
                .to_luma8();
            let (w, h) = luma.dimensions();
            (luma.into_raw(), w, h)
        }
    };

    Frame::new(gray, width, height, sequence).map_err(|e| CameraError::Other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiated(width: u32, height: u32, format: PixelFormat) -> Negotiated {
        Negotiated { width, height, format }
    }

    #[test]
    fn test_decode_grey() {
        let buf: Vec<u8> = (0..12).collect();
        let frame = decode_buffer(&buf, &negotiated(4, 3, PixelFormat::Grey), 5).unwrap();
        assert_eq!((frame.width, frame.height, frame.sequence), (4, 3, 5));
        assert_eq!(&frame.data[..], &buf[..]);
    }

    #[test]
    fn test_decode_grey_short_buffer() {
        let buf = vec![0u8; 5];
        assert!(decode_buffer(&buf, &negotiated(4, 3, PixelFormat::Grey), 0).is_err());
    }

    #[test]
    fn test_decode_yuyv_extracts_luma() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let buf = vec![100, 128, 200, 128];
        let frame = decode_buffer(&buf, &negotiated(2, 1, PixelFormat::Yuyv), 0).unwrap();
        assert_eq!(&frame.data[..], &[100, 200]);
    }

    #[test]
    fn test_decode_mjpg_roundtrip_dimensions() {
        let img = image::GrayImage::from_pixel(16, 8, image::Luma([90u8]));
        let mut jpeg = Vec::new();
        img.write_to(&mut io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        // Negotiated size is ignored for MJPG; the JPEG header wins.
        let frame = decode_buffer(&jpeg, &negotiated(640, 480, PixelFormat::Mjpg), 1).unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        assert!(frame.data.iter().all(|&p| p.abs_diff(90) <= 2));
    }

    #[test]
    fn test_decode_mjpg_garbage() {
        let buf = vec![0u8; 64];
        assert!(decode_buffer(&buf, &negotiated(8, 8, PixelFormat::Mjpg), 0).is_err());
    }

    #[tokio::test]
    async fn test_release_parks_worker_until_next_acquire() {
        let closing = Closing::default();
        let finished = Arc::new(AtomicBool::new(false));
        let worker = {
            let finished = Arc::clone(&finished);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(150));
                finished.store(true, Ordering::Release);
            })
        };

        let started = std::time::Instant::now();
        closing.park(worker);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!finished.load(Ordering::Acquire));

        closing.drain().await;
        assert!(finished.load(Ordering::Acquire));
        assert!(closing.workers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_missing_device() {
        let camera = V4l2Camera::new("/dev/emoscan-missing-video");
        let err = camera
            .acquire(&CaptureConstraints::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
