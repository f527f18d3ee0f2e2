//! MockCodes -- screenshot-to-code orchestration server.
//!
//! Startup wires the configured record store, object store, generation
//! and analysis clients, and identity resolver into the workflows, then
//! serves the HTTP surface until SIGTERM/SIGINT.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use mockcodes::analysis::HttpPromptAnalyzer;
use mockcodes::config::Config;
use mockcodes::generation::HttpGenerationClient;
use mockcodes::metadata::store::RecordStore;
use mockcodes::storage::backend::ObjectStore;
use mockcodes::storage::signing::UrlSigner;
use mockcodes::webhook::WebhookVerifier;
use mockcodes::workflow::{WorkflowSettings, Workflows};

/// Command-line arguments for the MockCodes server.
#[derive(Parser, Debug)]
#[command(
    name = "mockcodes",
    version,
    about = "Screenshot-to-code orchestration server"
)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "mockcodes.example.yaml")]
    config: String,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = mockcodes::config::load_config(&cli.config)?;
    init_tracing(&config);
    info!("Loaded configuration from {}", cli.config);
    for key in config.default_secrets_in_use() {
        tracing::warn!(
            key,
            "built-in secret in use; set a private value before exposing this server"
        );
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        mockcodes::metrics::init_metrics();
        mockcodes::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let records = build_record_store(&config)?;
    let signer = UrlSigner::new(
        config.storage.public_base_url.clone(),
        config.storage.signing_secret.as_bytes(),
    );
    let objects = build_object_store(&config, signer.clone())?;

    let generator = Arc::new(HttpGenerationClient::new(
        &config.generation.endpoint,
        config.generation.timeout(),
    )?);
    info!(
        "Generation service at {} (timeout {}s)",
        config.generation.endpoint, config.generation.timeout_secs
    );

    let analyzer = Arc::new(HttpPromptAnalyzer::new(&config.analysis)?);
    info!(
        "Analysis service at {} (model {})",
        config.analysis.endpoint, config.analysis.model
    );

    let identity = mockcodes::identity::resolver_from_config(&config.auth)?;
    info!("Identity resolver: {}", config.auth.mode);

    let webhook = config
        .webhook
        .secret
        .as_deref()
        .map(|secret| WebhookVerifier::new(secret, config.webhook.tolerance()))
        .transpose()?;
    if webhook.is_some() {
        info!("Identity webhook enabled at /webhooks/identity");
    }

    let workflows = Workflows::new(
        records,
        objects.clone(),
        generator,
        analyzer,
        WorkflowSettings::from_config(&config),
    );

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(mockcodes::AppState {
        config,
        objects,
        signer,
        identity,
        webhook,
        workflows,
    });

    let app = mockcodes::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("MockCodes listening on {}", bind_addr);

    // In-flight requests get `shutdown_timeout` to finish once a signal
    // arrives; anything still running after that is abandoned.
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!("Graceful shutdown timed out after {:?}", shutdown_timeout);
        }
    }

    info!("MockCodes shut down");

    Ok(())
}

/// Install the global subscriber.  `RUST_LOG` wins over `logging.level`.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_record_store(config: &Config) -> anyhow::Result<Arc<dyn RecordStore>> {
    match config.metadata.engine.as_str() {
        "memory" => {
            info!("In-memory record store initialized (not persistent)");
            Ok(Arc::new(mockcodes::metadata::memory::MemoryRecordStore::new()))
        }
        "sqlite" => {
            let path = &config.metadata.sqlite.path;
            let store = mockcodes::metadata::sqlite::SqliteRecordStore::new(path)?;
            info!("SQLite record store initialized at {}", path);
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("Unknown metadata.engine: {other}"),
    }
}

fn build_object_store(config: &Config, signer: UrlSigner) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.storage.backend.as_str() {
        "memory" => {
            info!("In-memory object store initialized (not persistent)");
            Ok(Arc::new(mockcodes::storage::memory::MemoryBackend::new(
                signer,
            )))
        }
        "local" => {
            let root = &config.storage.local.root_dir;
            let backend = mockcodes::storage::local::LocalBackend::new(root, signer)?;
            info!("Local object store initialized at {}", root);
            Ok(Arc::new(backend))
        }
        other => anyhow::bail!("Unknown storage.backend: {other}"),
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
