use anyhow::{Context, Result};
use clap::Parser;
use sieve_server::build_app;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "server", about = "Serve searches over a merged index")]
struct Args {
    /// Index root written by `indexer build --merge`. The server binds to the
    /// generation named in merged/CURRENT; POST /index/reload picks up newer ones.
    #[arg(long, default_value = "./index")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let app = build_app(args.index.clone())
        .with_context(|| format!("opening published index under {}", args.index))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, index = %args.index, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
