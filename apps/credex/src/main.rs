//! # Credex - Cred Ledger Server
//!
//! The main binary for the Credex cred ledger.
//!
//! This application provides:
//! - HTTP REST API in front of the negate/restake/slash/doubt engines
//! - CLI interface for the nightly analytics jobs
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    apps/credex (THE BINARY)                 │
//! │                                                             │
//! │      ┌─────────────┐              ┌─────────────┐           │
//! │      │   CLI       │              │   HTTP API  │           │
//! │      │  (clap)     │              │   (axum)    │           │
//! │      └──────┬──────┘              └──────┬──────┘           │
//! │             └──────────────┬─────────────┘                  │
//! │                            ▼                                │
//! │                    ┌───────────────┐                        │
//! │                    │  credex-core  │                        │
//! │                    │  (THE LOGIC)  │                        │
//! │                    └───────────────┘                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! credex --config credex.toml server --host 0.0.0.0 --port 8080
//!
//! # Nightly analytics
//! credex pipeline --day 2024-01-02
//! credex pipeline --from 2024-01-01 --to 2024-01-07
//! credex delta -a 1 -b 2 --day 2024-01-02 cluster --root 5
//! ```

use clap::Parser;
use credex::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // CREDEX_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CREDEX_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "credex=info,credex_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Credex startup banner.
fn print_banner() {
    println!(
        r#"
   ██████╗██████╗ ███████╗██████╗ ███████╗██╗  ██╗
  ██╔════╝██╔══██╗██╔════╝██╔══██╗██╔════╝╚██╗██╔╝
  ██║     ██████╔╝█████╗  ██║  ██║█████╗   ╚███╔╝
  ██║     ██╔══██╗██╔══╝  ██║  ██║██╔══╝   ██╔██╗
  ╚██████╗██║  ██║███████╗██████╔╝███████╗██╔╝ ██╗
   ╚═════╝╚═╝  ╚═╝╚══════╝╚═════╝ ╚══════╝╚═╝  ╚═╝

  Cred Ledger v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
