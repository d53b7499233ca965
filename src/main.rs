use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::info;
use pageshot::cdp::CdpPageSource;
use pageshot::server::HttpServer;
use pageshot::{BodyEncoding, EngineConfig, QueueConfig, RenderQueue, ServerConfig, Viewport};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Encoding {
    Base64,
    Binary,
}

impl From<Encoding> for BodyEncoding {
    fn from(e: Encoding) -> Self {
        match e {
            Encoding::Base64 => BodyEncoding::Base64,
            Encoding::Binary => BodyEncoding::Binary,
        }
    }
}

/// Render web pages to PNG over HTTP
#[derive(Parser, Debug)]
#[command(name = "pageshot", version, about)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port to listen on
    #[arg(long, short, env = "PORT", default_value_t = pageshot::config::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of pages loading at the same time
    #[arg(long, short, env = "WORKERS_LIMIT", default_value_t = pageshot::config::DEFAULT_MAX_WORKERS)]
    workers: usize,

    /// Pause between open attempts for the same URL, in milliseconds
    #[arg(long, env = "RETRY_DELAY_MS", default_value_t = 0)]
    retry_delay_ms: u64,

    /// Page load timeout in milliseconds
    #[arg(long, env = "LOAD_TIMEOUT_MS", default_value_t = 30000)]
    timeout_ms: u64,

    /// Viewport width of freshly opened pages
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Viewport height of freshly opened pages
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Override the browser user agent
    #[arg(long, env = "USER_AGENT")]
    user_agent: Option<String>,

    /// Extra request header sent with every page load, as `Name: value`
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Let pages run JavaScript (disabled by default)
    #[arg(long)]
    enable_javascript: bool,

    /// Encoding of successful response bodies
    #[arg(long, value_enum, default_value_t = Encoding::Base64)]
    body_encoding: Encoding,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{}`", raw))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut engine = EngineConfig {
        viewport: Viewport {
            width: cli.width,
            height: cli.height,
        },
        timeout_ms: cli.timeout_ms,
        headers: cli.headers.into_iter().collect::<HashMap<_, _>>(),
        enable_javascript: cli.enable_javascript,
        ..Default::default()
    };
    if let Some(user_agent) = cli.user_agent {
        engine.user_agent = user_agent;
    }

    let queue_config = QueueConfig {
        max_workers: cli.workers,
        retry_delay: Duration::from_millis(cli.retry_delay_ms),
    };
    let server_config = ServerConfig {
        addr: SocketAddr::new(cli.host, cli.port),
        body_encoding: cli.body_encoding.into(),
    };

    let source = CdpPageSource::launch(engine).context("starting headless Chrome")?;
    let queue = RenderQueue::start(source, queue_config).context("starting render queue")?;
    let server = HttpServer::start(server_config, queue.clone(), tokio::runtime::Handle::current())
        .context("starting HTTP server")?;

    info!("App launched on http://{}/", server.addr());

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("Shutting down");

    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .context("stopping HTTP server")?;
    queue.shutdown().await;
    Ok(())
}
