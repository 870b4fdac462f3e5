use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use todoforai_edge::cli::Cli;
use todoforai_edge::core::Core;
use todoforai_edge::http_client::ApiClient;
use todoforai_edge::settings::Settings;
use todoforai_edge::supervisor;
use todoforai_edge::tools::{ToolCatalog, ToolInstaller};

struct NoopResolver;
impl todoforai_edge::tools::UrlResolver for NoopResolver {
    fn resolve(&self, _name: &str) -> Option<(String, bool)> {
        None
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("todoforai-edge {}", env!("CARGO_PKG_VERSION"));
        return std::process::ExitCode::SUCCESS;
    }

    let settings = match Settings::resolve(cli.api_key.clone(), cli.api_url.clone(), cli.debug) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to load settings: {e}");
            return std::process::ExitCode::FAILURE;
        }
    };

    let default_directive = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .init();

    let Some(api_key) = settings.api_key.clone() else {
        tracing::error!("no API key resolvable from CLI, environment, or config file");
        return std::process::ExitCode::FAILURE;
    };

    if let Err(e) = todoforai_edge::settings::save(&settings) {
        tracing::warn!(error = %e, "failed to persist settings");
    }

    let api = Arc::new(ApiClient::new(settings.api_url.clone(), api_key.clone()));

    match supervisor::authenticate(&api).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::error!("api key rejected by server");
            return std::process::ExitCode::FAILURE;
        }
        Err(e) => {
            tracing::error!(error = %e, "authentication precheck failed");
            return std::process::ExitCode::FAILURE;
        }
    }

    let installer = Arc::new(ToolInstaller::new(ToolCatalog::seeded(), Arc::new(NoopResolver)));
    let core = Core::new(installer, api, cli.add_path.clone());

    match supervisor::run(core, &settings.ws_url(), &api_key).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "edge supervisor exited");
            std::process::ExitCode::FAILURE
        }
    }
}
