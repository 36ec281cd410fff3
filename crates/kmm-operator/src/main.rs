//! KMM Operator - kernel module build/sign orchestration

mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::CustomResourceExt;
use tracing::info;

use kmm_common::config::{Config, DaemonConfig};
use kmm_common::crd::Module;
use kmm_common::notifier::Notifier;
use kmm_common::telemetry::{init_telemetry, TelemetryConfig, DEFAULT_SERVICE_NAME};

/// KMM - builds, signs and distributes out-of-tree kernel modules
#[derive(Parser, Debug)]
#[command(name = "kmm-operator", version, about, long_about = None)]
struct Cli {
    /// Path to the operator configuration file
    #[arg(long, default_value = "/controller_config.yaml")]
    config: PathBuf,

    /// Service name reported in logs and traces
    #[arg(long, default_value = DEFAULT_SERVICE_NAME)]
    service_name: String,

    /// Generate the Module CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Module::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig::for_service(&cli.service_name))
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    let config = Config::from_file(&cli.config)?;
    info!(
        path = %cli.config.display(),
        gc_delay = ?config.job.gc_delay,
        build_image = %config.images.build,
        sign_image = %config.images.sign,
        "loaded configuration"
    );

    let notifier = Arc::new(Notifier::new(config.daemon_config()));
    let _watcher = watch::watch_config(cli.config.clone(), Arc::clone(&notifier))?;

    run(notifier).await;
    Ok(())
}

/// Consume daemon configuration changes until shutdown
async fn run(notifier: Arc<Notifier<DaemonConfig>>) {
    let changes = notifier.channel();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                let current = notifier.get();
                info!(
                    image = %current.image,
                    node_selector = ?current.daemon.node_selector,
                    tolerations = current.daemon.tolerations.len(),
                    "daemon configuration changed"
                );
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }
}
