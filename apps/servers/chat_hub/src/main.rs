use anyhow::Result;
use chat_hub::{app, AppState, Config};
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{filter::EnvFilter, fmt::format::JsonFields, util::SubscriberInitExt, Layer};
use ws_hub::Hub;

#[tokio::main]
async fn main() -> Result<()> {
	dotenv::dotenv().ok();
	let config = Config::parse();

	init_tracing(&config)?;

	let hub = Hub::new(config.hub_config())?;
	let shutdown_token = CancellationToken::new();
	let config = Arc::new(config);
	let state = AppState::build(config.clone(), hub.clone(), shutdown_token.clone())?;

	let listener = TcpListener::bind(config.bind_addr()).await?;
	tracing::info!(
		addr = %listener.local_addr()?,
		ws_path = %config.ws_path,
		default_topics = ?config.default_topics,
		"Chat hub listening"
	);

	// Spawn signal handler task with proper shutdown coordination
	let signal_shutdown_token = shutdown_token.clone();
	tokio::spawn(async move {
		tokio::signal::ctrl_c().await.ok();
		tracing::info!("Received Ctrl+C, initiating shutdown...");
		signal_shutdown_token.cancel();
	});

	let server_token = shutdown_token.clone();
	axum::serve(listener, app(state).into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(async move {
			server_token.cancelled().await;
		})
		.await?;
	tracing::info!("Server stopped");

	// Bound the cleanup so a wedged peer cannot hang the process
	match tokio::time::timeout(config.shutdown_timeout(), hub.shutdown()).await {
		Ok(()) => tracing::info!("Graceful shutdown completed"),
		Err(_) => tracing::error!("Shutdown timeout - forcing exit"),
	}

	Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
	use tracing_subscriber::layer::SubscriberExt;

	let filter = EnvFilter::try_new(config.rust_log.as_deref().unwrap_or("info,chat_hub=debug,ws_hub=debug"))?;

	tracing_subscriber::registry()
		.with(if config.log_json {
			Box::new(
				tracing_subscriber::fmt::layer()
					.fmt_fields(JsonFields::default())
					.event_format(tracing_subscriber::fmt::format().json().flatten_event(true).with_span_list(false))
					.with_filter(filter),
			) as Box<dyn Layer<_> + Send + Sync>
		} else {
			Box::new(tracing_subscriber::fmt::layer().with_filter(filter))
		})
		.try_init()?;
	Ok(())
}
