use chrono::Local;
use clap::Parser;
use dirshare::{
    config::{Args, ServerConfig},
    server, ServerState,
};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let _log_guard = init_tracing(args.logs);

    let state = match ServerState::shared(ServerConfig::from(&args)) {
        Ok(state) => state,
        Err(e) => {
            error!("{}. Exiting.", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let listener = match server::bind_first_free(args.bind, args.port).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind starting at port {}: {}", args.port, e);
            eprintln!("Error: failed to bind starting at port {}: {}", args.port, e);
            std::process::exit(1);
        }
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(args.port);
    let display_ip = if args.bind.is_unspecified() {
        server::local_ip()
    } else {
        args.bind
    };
    info!("Starting server at http://{}:{}", display_ip, port);
    println!("Serving at http://{}:{}", display_ip, port);

    let app = dirshare::app(state);
    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Console logging, plus a timestamped log file when `save_logs` is set.
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(save_logs: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt::layer());

    if !save_logs {
        registry.init();
        return None;
    }

    let log_filename = format!("server_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        ".",
        &log_filename,
    ));
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    info!("Logging to file: {}", log_filename);
    Some(guard)
}
