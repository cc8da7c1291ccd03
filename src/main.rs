mod core;
mod utils;
mod workers;

use crate::core::config::LOG_FILE_NAME;
use crate::utils::log_file::FileLogLayer;
use crate::utils::sos::SignalOfStop;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workers::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (args, settings) = Args::load()?;

    // Initialize the global data directory before anything resolves paths in it
    let data_dir = crate::utils::data_dir::init(args.data_dir.as_deref());

    // webrtc_ice reports late STUN responses as "unknown TransactionID"
    // warnings, which are normal.
    let filter = match args.verbose {
        0 => "warn,peerdrop=info,webrtc_ice::agent=error",
        1 => "info,webrtc_ice::agent=error",
        2 => "debug,webrtc_ice::agent=error",
        _ => "trace",
    };

    let filter_layer = EnvFilter::new(filter);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    let file_layer = FileLogLayer::new(&data_dir.join("logs").join(LOG_FILE_NAME))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    let sos = SignalOfStop::new();

    // Ctrl+C handler
    let sos_clone = sos.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sos_clone.cancel();
    });

    workers::console::run(args, settings, sos).await
}
