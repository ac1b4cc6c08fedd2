use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chromacast::agent::perception::LoopConfig;
use chromacast::browser::{ChromeDriver, ConnectionMode};
use chromacast::pages::PageRegistry;
use chromacast::recording::RecordingEngine;
use chromacast::server::{self, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP control port
    #[arg(long, default_value_t = 9222)]
    port: u16,

    /// Chrome remote debugging port
    #[arg(long, default_value_t = 9223)]
    cdp_port: u16,

    /// Directory for videos, key frames, and perception audit trails
    #[arg(long, default_value = "./recordings")]
    recordings_dir: PathBuf,

    /// Path to a Chrome binary (auto-detected or downloaded otherwise)
    #[arg(long)]
    chrome_path: Option<String>,

    /// Attach to an already-running Chrome on the CDP port instead of launching
    #[arg(long, default_value_t = false)]
    attach: bool,

    /// Pass --no-sandbox to Chrome (Linux container workaround)
    #[arg(long, default_value_t = false)]
    no_sandbox: bool,

    /// Run Chrome headless
    #[arg(long, default_value_t = false)]
    headless: bool,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.port == 0 || args.cdp_port == 0 {
        eprintln!("Error: ports must be in the range 1-65535.");
        std::process::exit(1);
    }
    if args.port == args.cdp_port {
        eprintln!("Error: HTTP port and CDP port must be distinct.");
        std::process::exit(1);
    }

    log::info!("Starting chromacast studio on port {}", args.port);

    let mode = if args.attach {
        ConnectionMode::DebugPort(args.cdp_port)
    } else {
        ConnectionMode::Launch {
            chrome_path: args.chrome_path,
            cdp_port: args.cdp_port,
            no_sandbox: args.no_sandbox,
            headless: args.headless,
        }
    };

    let driver = match ChromeDriver::new(mode).await {
        Ok(driver) => driver,
        Err(e) => {
            log::error!("Failed to start browser: {}", e);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    log::info!("Browser ready at {}", driver.ws_endpoint());

    let loop_config = LoopConfig {
        audit_dir: args.recordings_dir.clone(),
        ..LoopConfig::default()
    };

    let state = Arc::new(AppState {
        driver: tokio::sync::Mutex::new(Some(driver)),
        registry: PageRegistry::new(),
        engine: RecordingEngine::new(args.recordings_dir),
        loop_config,
    });

    let routes = server::routes(Arc::clone(&state));
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));

    let shutdown_state = Arc::clone(&state);
    let (bound, serving) =
        match warp::serve(routes).try_bind_with_graceful_shutdown(addr, async move {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received");
            shutdown(shutdown_state).await;
        }) {
            Ok(bound) => bound,
            Err(e) => {
                log::error!("Failed to bind to port {}: {}", args.port, e);
                eprintln!("Error: Port {} is already in use or unavailable.", args.port);
                std::process::exit(1);
            }
        };

    log::info!("Listening on http://{}", bound);
    serving.await;
    log::info!("chromacast studio stopped");
}

/// Stop active screencasts, tear down every page, then close the browser.
async fn shutdown(state: Arc<AppState>) {
    state.registry.shutdown().await;
    let driver = state.driver.lock().await.take();
    if let Some(driver) = driver {
        if let Err(e) = driver.close().await {
            log::warn!("browser close failed: {}", e);
        }
    }
}
