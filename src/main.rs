//! # Adapter Runtime CLI
//!
//! Loads the provider catalogue, builds every configured adapter and runs one
//! command against the result.

use std::path::PathBuf;
use std::sync::Arc;

use adapters::{
    adapters::{
        AdapterDefaults, AdapterFactory, Credential, ProviderLoader, TemplateRegistry,
        oauth::generate_pkce_pair, register_builtin_templates,
    },
    config::ConfigLoader,
    context::Context as CallContext,
    repositories::{Catalog, ProviderCore},
    services::{AdapterService, LoaderService},
    telemetry,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "adapters", version, about = "Run provider adapter operations")]
struct Cli {
    /// Catalogue file; defaults to ADAPTERS_CATALOG_PATH
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List catalogue providers and whether each one loaded
    Providers,
    /// Show a provider's display record
    Describe {
        provider: String,
        #[arg(long)]
        lang: Option<String>,
    },
    /// Execute an operation and print the provider response
    Execute {
        provider: String,
        operation: String,
        /// Parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Credential as JSON, e.g. {"type":"api_key","api_key":"..."}
        #[arg(long)]
        credential: Option<String>,
    },
    /// Build an OAuth authorization URL
    AuthorizeUrl {
        provider: String,
        #[arg(long)]
        redirect_uri: String,
        #[arg(long)]
        state: String,
        /// Comma-separated provider scopes
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
        /// Attach a generated PKCE challenge and print its verifier
        #[arg(long)]
        pkce: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, profile = %config.profile, "Loaded configuration");
    }

    let catalog_path = cli.catalog.unwrap_or_else(|| config.catalog_path.clone());
    let repositories = Catalog::from_path(&catalog_path)
        .with_context(|| format!("reading catalog {}", catalog_path.display()))?
        .into_repositories()
        .context("building repositories from catalog")?;

    let templates: Arc<TemplateRegistry> = Arc::clone(TemplateRegistry::global());
    register_builtin_templates(&templates, &AdapterDefaults::from(&config));

    let factory = Arc::new(AdapterFactory::new());
    let loader = Arc::new(ProviderLoader::new(templates, Arc::clone(&factory)));
    let loader_service = LoaderService::new(
        loader,
        repositories.configs.clone(),
        repositories.providers.clone(),
    );
    let adapter_service = AdapterService::new(
        factory.clone(),
        repositories.configs.clone(),
        repositories.providers.clone(),
        repositories.translations.clone(),
    );

    let ctx = CallContext::background();
    let report = loader_service
        .load_all(&ctx)
        .await
        .context("loading providers")?;
    info!(
        loaded = report.loaded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Catalog loaded"
    );

    let output = match cli.command {
        Command::Providers => {
            let mut views = Vec::new();
            for provider in repositories.providers.list_providers(&ctx).await? {
                match adapter_service
                    .get_provider_adapter_by_identifier(&ctx, &provider.identifier, None)
                    .await
                {
                    Ok(view) => views.push(serde_json::to_value(view)?),
                    Err(err) => {
                        warn!(provider = %provider.identifier, error = %err, "Skipping provider");
                    }
                }
            }
            Value::Array(views)
        }
        Command::Describe { provider, lang } => {
            let view = adapter_service
                .get_provider_adapter_by_identifier(&ctx, &provider, lang.as_deref())
                .await?;
            serde_json::to_value(view)?
        }
        Command::Execute {
            provider,
            operation,
            params,
            credential,
        } => {
            let params: Map<String, Value> =
                serde_json::from_str(&params).context("--params must be a JSON object")?;
            let credential = match credential {
                Some(raw) => serde_json::from_str(&raw).context("parsing --credential")?,
                None => Credential::None,
            };
            adapter_service
                .execute(&ctx, &provider, &operation, &params, &credential)
                .await
                .map_err(|err| anyhow!("{err}"))?
        }
        Command::AuthorizeUrl {
            provider,
            redirect_uri,
            state,
            scopes,
            pkce,
        } => {
            let adapter = factory
                .get_oauth_adapter(&provider)
                .map_err(|err| anyhow!("{err}"))?;
            let pair = pkce.then(generate_pkce_pair);
            let url = adapter
                .generate_oauth_url(
                    &redirect_uri,
                    &state,
                    &scopes,
                    pair.as_ref().map(|p| p.challenge.as_str()),
                )
                .map_err(|err| anyhow!("{err}"))?;
            json!({
                "url": url.as_str(),
                "code_verifier": pair.map(|p| p.verifier),
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
