//! Host process that polls the Spaarnelanden map and reports container fill levels.

mod app;
mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use reqwest::Client;
use spaarnelanden_provider_web::WebPagePort;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = args.tracker_config()?;

    // HTTP setup; the client-level timeout backs up the per-request one
    let client = Client::builder()
        .user_agent("spaarnelanden/0.1")
        .timeout(args.request_timeout())
        .build()?;
    let mut port = WebPagePort::new(client).with_timeout(args.request_timeout());
    if let Some(url) = &args.url {
        port = port.with_url(url.as_str());
    }

    info!(
        containers = config.containers().len(),
        url = port.url(),
        "tracking containers"
    );

    let app = App::new(Arc::new(port), &config);
    app.start().await;

    if args.once {
        print_readings(&app)?;
        return Ok(());
    }

    app.run(async {
        if let Err(err) = signal::ctrl_c().await {
            error!(%err, "cannot listen for ctrl-c, stopping");
        }
    })
    .await;

    Ok(())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_err| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[expect(clippy::print_stdout, reason = "--once output is meant for stdout")]
fn print_readings(app: &App) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&app.readings())?);
    Ok(())
}
