use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "emoscan", about = "Emoscan facial expression scanner CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the camera
    Start,
    /// Stop the camera and clear the current result
    Stop,
    /// Scan your expression from the live camera
    Scan {
        /// Print the raw JSON result instead of the report
        #[arg(long)]
        json: bool,
    },
    /// Show daemon status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show the session name, or choose it (once per daemon run)
    Name {
        /// Pass "" to use the default "User"
        name: Option<String>,
    },
    /// List V4L2 capture devices (does not need the daemon)
    Devices,
}

#[zbus::proxy(
    interface = "org.emoscan.Scanner1",
    default_service = "org.emoscan.Scanner1",
    default_path = "/org/emoscan/Scanner1"
)]
trait Scanner {
    fn start(&self) -> zbus::Result<String>;
    fn stop(&self) -> zbus::Result<String>;
    fn scan(&self) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
    fn choose_name(&self, name: &str) -> zbus::Result<String>;
    fn name(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let proxy = connect().await?;
            println!("Starting camera...");
            let outcome = proxy.start().await.map_err(daemon_error)?;
            println!("{}", start_message(&outcome));
        }
        Commands::Stop => {
            let outcome = connect().await?.stop().await.map_err(daemon_error)?;
            println!("{}", stop_message(&outcome));
        }
        Commands::Scan { json } => {
            let proxy = connect().await?;
            println!("Analyzing your expression...");
            let raw = proxy.scan().await.map_err(daemon_error)?;
            if json {
                println!("{raw}");
            } else {
                let value: Value = serde_json::from_str(&raw).context("malformed scan reply")?;
                print!("{}", value["report"].as_str().unwrap_or(&raw));
            }
        }
        Commands::Status { json } => {
            let raw = connect().await?.status().await.map_err(daemon_error)?;
            if json {
                println!("{raw}");
            } else {
                let value: Value = serde_json::from_str(&raw).context("malformed status reply")?;
                print!("{}", format_status(&value));
            }
        }
        Commands::Name { name: Some(name) } => {
            let chosen = connect().await?.choose_name(&name).await.map_err(daemon_error)?;
            println!("Hello, {chosen}!");
        }
        Commands::Name { name: None } => {
            let name = connect().await?.name().await.map_err(daemon_error)?;
            println!("{name}");
        }
        Commands::Devices => list_devices(),
    }

    Ok(())
}

async fn connect() -> Result<ScannerProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    ScannerProxy::new(&conn)
        .await
        .context("emoscand is not reachable; is the daemon running?")
}

fn list_devices() {
    let devices = emoscan_hw::V4l2Camera::list_devices();
    if devices.is_empty() {
        println!("No capture devices found.");
        return;
    }
    for device in devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
}

/// Surface the daemon's user-facing message instead of the raw D-Bus error.
fn daemon_error(err: zbus::Error) -> anyhow::Error {
    match err {
        zbus::Error::MethodError(_, Some(detail), _) => anyhow::anyhow!(detail),
        other => anyhow::Error::new(other).context("emoscand request failed"),
    }
}

fn start_message(outcome: &str) -> &'static str {
    match outcome {
        "started" => "Camera ready. Position your face and run `emoscan scan`.",
        "already_starting" => "Camera is already starting.",
        "already_on" => "Camera is already on.",
        _ => "Camera start requested.",
    }
}

fn stop_message(outcome: &str) -> &'static str {
    match outcome {
        "stopped" => "Camera stopped.",
        _ => "Camera was not running.",
    }
}

fn format_status(status: &Value) -> String {
    let mut out = format!(
        "emoscand {}\n  state:      {}\n  user:       {}\n  scan count: {}\n",
        status["version"].as_str().unwrap_or("?"),
        status["state"].as_str().unwrap_or("unknown"),
        status["user"].as_str().unwrap_or("User"),
        status["scan_count"].as_u64().unwrap_or(0),
    );
    match status.get("scan_result").filter(|r| !r.is_null()) {
        Some(result) => {
            let confidence = result["confidence"].as_f64().unwrap_or(0.0);
            out.push_str(&format!(
                "  last scan:  {} ({:.0}%, {} quality)\n",
                result["emotion"].as_str().unwrap_or("?"),
                confidence * 100.0,
                result["quality"].as_str().unwrap_or("?"),
            ));
        }
        None => out.push_str("  last scan:  none\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_messages() {
        assert_eq!(start_message("already_on"), "Camera is already on.");
        assert!(start_message("started").starts_with("Camera ready"));
    }

    #[test]
    fn test_format_status_with_result() {
        let status = serde_json::json!({
            "version": "0.1.0",
            "state": "camera_on",
            "user": "Ada",
            "scan_count": 2,
            "scan_result": { "emotion": "happy", "confidence": 0.82, "quality": "poor" },
        });
        let text = format_status(&status);
        assert!(text.contains("state:      camera_on"));
        assert!(text.contains("scan count: 2"));
        assert!(text.contains("happy (82%, poor quality)"));
    }

    #[test]
    fn test_format_status_without_result() {
        let status = serde_json::json!({
            "version": "0.1.0",
            "state": "models_loading",
            "user": "User",
            "scan_count": 0,
            "scan_result": null,
        });
        assert!(format_status(&status).contains("last scan:  none"));
    }

    #[test]
    fn test_cli_parses_name() {
        let cli = Cli::try_parse_from(["emoscan", "name"]).unwrap();
        assert!(matches!(cli.command, Commands::Name { name: None }));

        let cli = Cli::try_parse_from(["emoscan", "name", "Ada"]).unwrap();
        assert!(matches!(cli.command, Commands::Name { name: Some(ref n) } if n == "Ada"));
    }
}
