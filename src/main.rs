use market_analytics_engine::cache::CachePublisher;
use market_analytics_engine::config::Config;
use market_analytics_engine::consumer::Consumer;
use market_analytics_engine::engine::Engine;
use market_analytics_engine::instrumentation;
use market_analytics_engine::registry::Registry;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting market analytics engine...");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    instrumentation::describe();

    let cache = match CachePublisher::connect(
        &config.cache_url,
        config.cache_password.as_ref().map(|s| s.expose_secret()),
        config.cache_ttl,
    )
    .await
    {
        Ok(mut cache) => {
            if let Err(e) = cache.ping().await {
                tracing::error!("Cache unreachable at startup: {e}");
                std::process::exit(2);
            }
            cache
        }
        Err(e) => {
            tracing::error!("Failed to connect to cache: {e}");
            std::process::exit(2);
        }
    };

    let mut consumer = match Consumer::connect(
        &config.cache_url,
        config.cache_password.as_ref().map(|s| s.expose_secret()),
        config.stream_key.clone(),
        config.consumer_group.clone(),
        config.consumer_name.clone(),
    )
    .await
    {
        Ok(consumer) => consumer,
        Err(e) => {
            tracing::error!("Failed to connect to event stream: {e}");
            std::process::exit(2);
        }
    };

    let engine = Engine::new(Registry::new(), cache, config);
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, stopping");
            signal_cancel.cancel();
        }
    });

    let term_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
                tracing::info!("received SIGTERM, stopping");
                term_cancel.cancel();
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    });

    let ticker_engine = engine.clone();
    let ticker_cancel = cancel.clone();
    let ticker_handle = tokio::spawn(async move { ticker_engine.run_health_ticker(ticker_cancel).await });

    consumer
        .run(cancel.clone(), |envelope| async { engine.process(envelope).await })
        .await;

    cancel.cancel();
    let _ = ticker_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
