use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ventcan::{DeviceError, Device, Result};

/// CAN-bus client for residential ventilation units.
#[derive(Parser, Debug)]
#[command(name = "ventcan", version)]
struct Args {
    /// Node id to use for this client
    #[arg(long, default_value_t = 55)]
    node_id: u8,

    /// SocketCAN interface name (e.g. can0)
    #[arg(long)]
    interface: Option<String>,

    /// Capture file to replay instead of listening on an interface
    #[arg(long)]
    dump_file: Option<PathBuf>,

    /// Capture all received frames for debugging
    #[arg(long)]
    capture: bool,

    /// Capture file name
    #[arg(long, default_value = "output")]
    capture_file: PathBuf,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if args.interface.is_none() && args.dump_file.is_none() {
        return Err(DeviceError::Config(
            "nothing to do, specify an interface or a dump file".to_string(),
        ));
    }

    let mut device = Device::new(args.node_id);
    if let Some(interface) = &args.interface {
        device.connect(interface).await?;
    }
    if args.capture {
        if args.dump_file.is_some() {
            warn!("cannot capture while replaying a dump file, ignoring capture request");
        } else {
            device.capture_to(&args.capture_file)?;
        }
    }

    device.start().await?;

    if let Some(path) = &args.dump_file {
        device.process_dump_file(path).await?;
    } else {
        info!("processing CAN frames, ctrl-c to quit");
        tokio::select! {
            result = device.fetch_device_info() => {
                if let Err(err) = result {
                    warn!(error = %err, "device identity fetch failed");
                }
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
            }
            _ = tokio::signal::ctrl_c() => {}
        }
    }

    device.stop();
    device.join().await;

    print!("{}", device.dump_values().await);
    Ok(())
}
