use anyhow::Context;
use clap::Parser as _;
use kindred::config::Config;
use kindred::{AppState, build_metrics_layer_and_handle, build_metrics_router, build_router};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse()
        .validate()
        .context("Invalid configuration")?;
    info!("Starting Kindred with config: {:?}", config);

    let app_state = AppState::from_config(&config)?;
    let resolver = app_state.resolver.clone();

    let mut router = build_router(app_state);

    if config.metrics {
        let (prometheus_layer, handle) =
            build_metrics_layer_and_handle(config.metrics_prefix.clone());
        router = router.layer(prometheus_layer);

        let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener to {metrics_addr}"))?;
        info!("Metrics endpoint listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, build_metrics_router(handle)).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!("Kindred backend listening on {}", bind_addr);

    // Health checks are answered while the model is being resolved; word requests get
    // "Server not ready" until then.
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    match resolver.resolve().await {
        Ok(model) => info!(model = %model, "Server ready"),
        Err(failure) => {
            error!(
                "Could not find a working model: {}. Check your API key at https://aistudio.google.com/app/apikey",
                failure.message
            );
            server.abort();
            return Err(failure).context("Model resolution failed at startup");
        }
    }

    server.await.context("Server task failed")??;

    Ok(())
}
