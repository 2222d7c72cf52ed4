use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use kbridge::device::Device;
use kbridge::driver::Driver;
use kbridge::http::{self, AppState};
use kbridge::kat500::KAT500;
use kbridge::kpa500::KPA500;
use kbridge::remote::{self, Credentials};
use kbridge::serial;
use kbridge::variant::Variant;
use tokio::net::TcpListener;

const DEFAULT_USERNAME: &str = "kpa500";
const DEFAULT_PASSWORD: &str = "elecraft";

#[derive(Parser, Debug)]
#[command(
    name = "kbridge",
    about = "Serial-to-network bridge for the Elecraft KPA500 and KAT500"
)]
struct Args {
    /// Serial port connected to the KPA500 amplifier.
    #[arg(long, env = "KBRIDGE_AMP_SERIAL")]
    amp_serial: Option<String>,

    /// Serial port connected to the KAT500 tuner.
    #[arg(long, env = "KBRIDGE_TUNER_SERIAL")]
    tuner_serial: Option<String>,

    /// TCP port of the amplifier remote protocol.
    #[arg(long, env = "KBRIDGE_AMP_TCP_PORT", default_value_t = 4626)]
    amp_tcp_port: u16,

    /// TCP port of the tuner remote protocol.
    #[arg(long, env = "KBRIDGE_TUNER_TCP_PORT", default_value_t = 4627)]
    tuner_tcp_port: u16,

    /// TCP port of the HTTP API and UI.
    #[arg(long, env = "KBRIDGE_WEB_PORT", default_value_t = 80)]
    web_port: u16,

    /// Username expected in the remote-protocol login.
    #[arg(long, env = "KBRIDGE_USERNAME")]
    username: Option<String>,

    /// Password expected in the remote-protocol login.
    #[arg(long, env = "KBRIDGE_PASSWORD")]
    password: Option<String>,

    /// Directory with the static web UI; served when given.
    #[arg(long, env = "KBRIDGE_CONTENT_DIR")]
    content_dir: Option<PathBuf>,

    /// Log filter directives.
    #[arg(long, env = "RUST_LOG", default_value = "")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    kbridge_logging::setup_global_subscriber(&args.log)?;

    if args.amp_serial.is_none() && args.tuner_serial.is_none() {
        anyhow::bail!("no devices configured; pass --amp-serial and/or --tuner-serial");
    }

    let credentials = Arc::new(credentials(&args));
    let mut web_state = AppState::default();

    if let Some(path) = &args.amp_serial {
        web_state.amplifier =
            Some(start_device(&KPA500, path, args.amp_tcp_port, credentials.clone()).await?);
    }
    if let Some(path) = &args.tuner_serial {
        web_state.tuner =
            Some(start_device(&KAT500, path, args.tuner_tcp_port, credentials.clone()).await?);
    }

    let web_listener = TcpListener::bind(("0.0.0.0", args.web_port))
        .await
        .with_context(|| format!("failed to bind web port {}", args.web_port))?;
    tracing::info!(port = args.web_port, "http api listening");

    let app = http::router(web_state, args.content_dir);
    tokio::spawn(async move {
        if let Err(error) = axum::serve(web_listener, app).await {
            tracing::error!("http server failed: {error:#}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");

    Ok(())
}

/// Opens the serial port and spawns the driver and remote-protocol tasks
/// for one device.
async fn start_device(
    variant: &'static dyn Variant,
    serial_path: &str,
    tcp_port: u16,
    credentials: Arc<Credentials>,
) -> Result<Arc<Device>> {
    let stream = serial::open(serial_path)?;
    let device = Arc::new(Device::new(variant));

    tokio::spawn(Driver::new(device.clone(), stream).run());

    let listener = TcpListener::bind(("0.0.0.0", tcp_port))
        .await
        .with_context(|| format!("failed to bind tcp port {tcp_port}"))?;
    tracing::info!(device = variant.name(), port = tcp_port, serial = serial_path, "remote protocol listening");

    let remote_device = device.clone();
    tokio::spawn(async move {
        if let Err(error) = remote::listen(listener, remote_device.clone(), credentials).await {
            tracing::error!(device = remote_device.name(), "remote listener failed: {error:#}");
        }
    });

    Ok(device)
}

fn credentials(args: &Args) -> Credentials {
    if args.username.is_none() || args.password.is_none() {
        tracing::warn!("login credentials not configured, using compiled-in defaults");
    }
    Credentials {
        username: args.username.clone().unwrap_or_else(|| DEFAULT_USERNAME.to_owned()),
        password: args.password.clone().unwrap_or_else(|| DEFAULT_PASSWORD.to_owned()),
    }
}
