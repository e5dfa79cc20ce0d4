use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use authgate::cli::{Cli, Commands};
use authgate::config::Config;
use authgate::{api, jobs, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let port = match cli.command {
        Some(Commands::Serve { port }) => port,
        None => None,
    };
    let result = run_server(port).await;

    if let Err(ref e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}

async fn run_server(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = port_override {
        config.port = port;
    }

    let state = AppState::build(config.clone()).await?;
    jobs::sweep::spawn(state.clone());

    let app = api::app_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
