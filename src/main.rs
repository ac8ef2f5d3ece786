use labtopo::context::CredentialStore;
use labtopo::history::HistoryStore;
use labtopo::registry::AdapterRegistry;
use labtopo::{diff, table, DiscoveryEngine, DiscoveryError, FileConfig, ScanConfig, ScannerContext};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), DiscoveryError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Optional config path argument; labtopo.yaml in the working directory
    // is picked up when present
    let args: Vec<String> = std::env::args().collect();
    let file_config = match args.get(1) {
        Some(path) => Some(FileConfig::load(Path::new(path))?),
        None => {
            let default_path = Path::new("labtopo.yaml");
            if default_path.exists() {
                Some(FileConfig::load(default_path)?)
            } else {
                None
            }
        }
    };
    let file_config = file_config.unwrap_or_default();

    let subnets = file_config.subnets.clone().unwrap_or_default();
    if subnets.is_empty() {
        return Err(DiscoveryError::ConfigError(
            "no subnets configured; list at least one CIDR under 'subnets'".to_string(),
        ));
    }

    let mut config = ScanConfig::default();
    file_config.apply_to(&mut config);

    let credentials = CredentialStore::from_map(file_config.credentials.clone().unwrap_or_default());
    let hints = file_config.hints.clone().unwrap_or_default();
    let leases = file_config.leases.clone().unwrap_or_default();

    let history = HistoryStore::new(config.history_dir.clone(), config.history_retention);
    let registry = AdapterRegistry::standard(&config, leases)?;
    let ctx = Arc::new(ScannerContext::new(config, credentials, hints)?);

    // Ctrl-C cancels in-flight probes; partial results still get reported
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling scan");
            cancel.cancel();
        }
    });

    let engine = DiscoveryEngine::new(subnets, registry, ctx);
    let report = engine.run().await?;

    table::print_report(&report);

    let baseline = history.load_latest()?;
    if let Some(baseline) = baseline {
        table::print_diff(&diff::diff(&baseline, &report));
    }
    history.save(&report)?;

    Ok(())
}
