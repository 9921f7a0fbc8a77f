use anyhow::Result;
use clap::Parser;

use dockroute_core::config::DockrouteConfig;
use dockroute_daemon::cli::DaemonCli;
use dockroute_daemon::logging::init_tracing;
use dockroute_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 설정 로드: 파일 -> 환경변수 -> CLI 플래그 -> 검증
    let mut config = match cli.config_path() {
        Some(path) => DockrouteConfig::from_file(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", path.display(), e))?,
        None => DockrouteConfig::default(),
    };
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration is valid");
        return Ok(());
    }

    init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "dockroute starting");

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("dockroute shut down");
    Ok(())
}
