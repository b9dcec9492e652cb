use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use conclave_domain::config::{Config, ObservabilityConfig};
use conclave_domain::conversation::{Conversation, ConversationMode};
use conclave_gateway::runtime::agent_registry::AgentRegistry;
use conclave_gateway::state::AppState;
use conclave_providers::registry::ProviderRegistry;

#[derive(Parser)]
#[command(name = "conclave", version, about = "Multi-agent conversation orchestrator")]
struct Cli {
    /// Path to a TOML config file. Defaults to conclave.toml in the cwd.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single turn against stdin and print the resulting JSON.
    Turn {
        /// The message to send.
        message: String,
        #[arg(long, default_value = "default")]
        conversation_id: String,
        #[arg(long, default_value = "local")]
        user_id: String,
    },
    /// Validate the loaded configuration and exit.
    Validate,
    Version,
}

/// Build the OTLP span exporter for `observability.otlp_endpoint`, if set.
/// Returns the tracer provider so the caller can flush it on shutdown; on
/// export setup failure, falls back to the plain JSON subscriber with a
/// warning rather than aborting startup.
fn build_otel_layer(
    observability: &ObservabilityConfig,
) -> anyhow::Result<Option<(opentelemetry_sdk::trace::SdkTracerProvider, tracing_opentelemetry::OpenTelemetryLayer<tracing_subscriber::Registry, opentelemetry_sdk::trace::Tracer>)>> {
    let Some(endpoint) = &observability.otlp_endpoint else {
        return Ok(None);
    };

    use opentelemetry::trace::TracerProvider as _;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(observability.service_name.clone())
        .build();

    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(observability.service_name.clone());
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);
    Ok(Some((provider, layer)))
}

fn init_tracing(observability: &ObservabilityConfig) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match build_otel_layer(observability) {
        Ok(Some((provider, otel_layer))) => {
            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer().json())
                .with(otel_layer)
                .init();
            Some(provider)
        }
        Ok(None) => {
            tracing_subscriber::fmt().with_env_filter(filter()).json().init();
            None
        }
        Err(err) => {
            tracing_subscriber::fmt().with_env_filter(filter()).json().init();
            tracing::warn!(error = %err, "otlp exporter setup failed, continuing without trace export");
            None
        }
    }
}

fn load_config(path: &Option<PathBuf>) -> anyhow::Result<Config> {
    let path = path
        .clone()
        .unwrap_or_else(|| PathBuf::from("conclave.toml"));
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let tracer_provider = init_tracing(&config.observability);

    let result = run(cli, config).await;

    if let Some(provider) = tracer_provider {
        let _ = provider.shutdown();
    }
    result
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Version) {
        Command::Version => {
            println!("conclave {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Validate => {
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues
                .iter()
                .any(|e| e.severity == conclave_domain::config::ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("configuration valid");
            Ok(())
        }
        Command::Turn {
            message,
            conversation_id,
            user_id,
        } => {
            let agents = AgentRegistry::load(&config.agents_dir)
                .unwrap_or_else(|_| AgentRegistry::empty());
            let providers = ProviderRegistry::new();
            let state = AppState::new(config, agents, providers);

            let mut conversation = Conversation::new(conversation_id, user_id.clone(), ConversationMode::Group);
            let result = state
                .orchestrator
                .orchestrate(&mut conversation, &user_id, &message)
                .await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
    }
}
