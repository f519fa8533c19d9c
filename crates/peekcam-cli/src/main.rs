use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use peekcam_core::config::{Config, LoggingConfig};
use peekcam_core::types::{DeviceKind, TrackConstraint};
use peekcam_media::{
    DetectorOptions, MediaStreamManager, PreviewSession, PreviewStatus, VirtualBackend,
};

#[derive(Parser)]
#[command(
    name = "peekcam",
    about = "Camera and microphone preview with a speaking indicator",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices
    Devices,

    /// Run a preview and print status changes
    Preview {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,

        /// Camera device id
        #[arg(long)]
        camera: Option<String>,

        /// Microphone device id
        #[arg(long)]
        microphone: Option<String>,

        /// Start with the camera off
        #[arg(long)]
        mute_camera: bool,

        /// Start with the microphone muted
        #[arg(long)]
        mute_microphone: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Devices => list_devices(&config).await?,
        Commands::Preview {
            seconds,
            camera,
            microphone,
            mute_camera,
            mute_microphone,
        } => {
            let mut initial = config.initial_constraints();
            if let Some(id) = camera {
                initial.video = TrackConstraint::device(id);
            }
            if let Some(id) = microphone {
                initial.audio = TrackConstraint::device(id);
            }

            let backend = Arc::new(VirtualBackend::new(&config.virtual_devices()));
            let mut session = PreviewSession::new(
                backend.clone(),
                backend,
                initial,
                DetectorOptions::from_config(&config),
            );
            run_preview(&mut session, seconds, mute_camera, mute_microphone).await?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

/// `RUST_LOG` wins over `--verbose`, which wins over the config.
fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let logging = logging.cloned().unwrap_or_default();
    let level = if verbose {
        "debug"
    } else {
        logging.level.as_deref().unwrap_or("info")
    };

    let mut directives = level.to_string();
    for filter in &logging.filters {
        directives.push(',');
        directives.push_str(filter);
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (logging.format == "json", logging.output == "stdout") {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

async fn list_devices(config: &Config) -> anyhow::Result<()> {
    let backend = Arc::new(VirtualBackend::new(&config.virtual_devices()));
    let manager = MediaStreamManager::new(backend, &config.initial_constraints());

    // Labels are only exposed once a stream has been granted.
    manager.acquire(&config.initial_constraints()).await?;
    manager.enumerate_devices().await?;

    for kind in [DeviceKind::VideoInput, DeviceKind::AudioInput] {
        println!("{}s:", kind.noun());
        let devices = manager.devices_of_kind(kind);
        if devices.is_empty() {
            println!("  (none)");
        }
        for device in devices {
            println!("  {}  {}", device.id, device.label);
        }
    }
    manager.close();
    Ok(())
}

async fn run_preview(
    session: &mut PreviewSession,
    seconds: Option<u64>,
    mute_camera: bool,
    mute_microphone: bool,
) -> anyhow::Result<()> {
    let mut speaking = session.speaking();
    session.start().await?;
    if mute_camera {
        session.toggle_camera().await?;
    }
    if mute_microphone {
        session.toggle_microphone().await?;
    }

    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut last = render_status(&session.status());
    println!("{last}");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            changed = speaking.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render_status(&session.status());
                if line != last {
                    println!("{line}");
                    last = line;
                }
            }
        }
    }

    session.teardown();
    Ok(())
}

fn render_status(status: &PreviewStatus) -> String {
    let video = if status.muted.camera {
        "Camera Off".to_string()
    } else {
        let indicator = if status.speaking { "speaking" } else { "quiet" };
        format!("camera on ({indicator})")
    };
    let mic = if status.muted.microphone {
        "mic muted"
    } else {
        "mic on"
    };
    format!("[{:?}] {video} | {mic}", status.phase)
}
