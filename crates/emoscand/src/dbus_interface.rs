use crate::controller::{ControllerError, ControllerHandle, Snapshot};
use crate::session::SessionIdentity;
use emoscan_core::display::greeting;
use emoscan_core::ScanResult;
use std::sync::{Arc, Mutex, MutexGuard};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.emoscan.Scanner1";
pub const OBJECT_PATH: &str = "/org/emoscan/Scanner1";

/// D-Bus interface for the Emoscan daemon.
///
/// Bus name: org.emoscan.Scanner1
/// Object path: /org/emoscan/Scanner1
pub struct ScannerService {
    controller: ControllerHandle,
    session: Arc<Mutex<SessionIdentity>>,
}

impl ScannerService {
    pub fn new(controller: ControllerHandle, session: SessionIdentity) -> Self {
        Self {
            controller,
            session: Arc::new(Mutex::new(session)),
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionIdentity> {
        // Nothing panics while holding the lock; recover the guard anyway.
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[interface(name = "org.emoscan.Scanner1")]
impl ScannerService {
    /// Start the camera. Returns "started", "already_starting" or "already_on".
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        let outcome = self.controller.start().await.map_err(to_fdo)?;
        Ok(json_string(&outcome))
    }

    /// Stop the camera. Returns "stopped" or "not_running".
    async fn stop(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop requested");
        let outcome = self.controller.stop().await.map_err(to_fdo)?;
        Ok(json_string(&outcome))
    }

    /// Scan the current frame and return the result as JSON.
    async fn scan(&self) -> zbus::fdo::Result<String> {
        tracing::info!("scan requested");
        let result = self.controller.scan().await.map_err(to_fdo)?;
        let name = self.session().name().to_string();
        Ok(scan_json(&result, &name).to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.controller.snapshot();
        let session = self.session();
        Ok(status_json(&snapshot, &session).to_string())
    }

    /// Choose the name used in greetings. Allowed once per daemon run.
    async fn choose_name(&self, name: &str) -> zbus::fdo::Result<String> {
        let mut session = self.session();
        let chosen = session
            .choose(name)
            .map(str::to_string)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()));
        chosen
    }

    /// The current session name.
    async fn name(&self) -> String {
        self.session().name().to_string()
    }

    #[zbus(signal)]
    pub async fn notification(
        emitter: &SignalEmitter<'_>,
        level: &str,
        message: &str,
    ) -> zbus::Result<()>;
}

fn to_fdo(err: ControllerError) -> zbus::fdo::Error {
    tracing::debug!(error = %err, "request failed");
    zbus::fdo::Error::Failed(err.user_message())
}

/// Serialize a unit enum to its bare name ("started", not "\"started\"").
fn json_string<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

fn scan_json(result: &ScanResult, name: &str) -> serde_json::Value {
    serde_json::json!({
        "result": result,
        "confidence_percent": result.confidence_percent(),
        "face_size": result.face_size_label(),
        "greeting": greeting(result.emotion, name),
        "report": result.render(name),
    })
}

fn status_json(snapshot: &Snapshot, session: &SessionIdentity) -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "state": snapshot.state,
        "scan_count": snapshot.scan_count,
        "scan_result": snapshot.scan_result,
        "user": session.name(),
        "name_chosen": session.is_chosen(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{LifecycleState, StartOutcome, StopOutcome};
    use chrono::TimeZone;
    use emoscan_core::{Emotion, EmotionScores, QualityTier};

    fn result() -> ScanResult {
        ScanResult {
            emotion: Emotion::Surprised,
            confidence: 0.61,
            scores: EmotionScores {
                surprised: 0.61,
                happy: 0.2,
                neutral: 0.19,
                ..EmotionScores::default()
            },
            timestamp: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            face_width: 320.0,
            face_height: 360.0,
            quality: QualityTier::Excellent,
        }
    }

    #[test]
    fn test_outcomes_are_bare_names() {
        assert_eq!(json_string(&StartOutcome::AlreadyStarting), "already_starting");
        assert_eq!(json_string(&StopOutcome::NotRunning), "not_running");
    }

    #[test]
    fn test_status_json_fields() {
        let snapshot = Snapshot {
            state: LifecycleState::CameraOn,
            scan_result: Some(result()),
            scan_count: 3,
        };
        let status = status_json(&snapshot, &SessionIdentity::with_name("Ada"));
        assert_eq!(status["state"], "camera_on");
        assert_eq!(status["scan_count"], 3);
        assert_eq!(status["user"], "Ada");
        assert_eq!(status["name_chosen"], true);
        assert_eq!(status["scan_result"]["emotion"], "surprised");
        assert_eq!(status["scan_result"]["quality"], "excellent");
    }

    #[test]
    fn test_status_json_without_result() {
        let status = status_json(&Snapshot::default(), &SessionIdentity::new());
        assert_eq!(status["state"], "idle");
        assert_eq!(status["user"], "User");
        assert_eq!(status["name_chosen"], false);
        assert!(status["scan_result"].is_null());
    }

    #[test]
    fn test_scan_json_has_greeting_and_percent() {
        let scan = scan_json(&result(), "Ada");
        assert_eq!(scan["confidence_percent"], 61);
        assert_eq!(scan["face_size"], "320x360px");
        assert!(scan["greeting"].as_str().unwrap().contains("Ada"));
        assert!(scan["report"].as_str().unwrap().contains("Ada"));
    }

    #[test]
    fn test_errors_carry_user_message() {
        let err = to_fdo(ControllerError::CameraNotReady);
        assert!(matches!(
            err,
            zbus::fdo::Error::Failed(ref msg) if msg == "Camera is not ready yet. Please wait a moment."
        ));
    }
}
