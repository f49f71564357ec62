use anyhow::bail;
use ferrous_gate_application::ports::{QueryPipeline, ResponseCache};
use ferrous_gate_application::use_cases::{CachedPipeline, LocalRecordsPipeline, PipelineRegistry};
use ferrous_gate_domain::Config;
use ferrous_gate_infrastructure::{Lifecycle, MemCache, ServerSupervisor, ShutdownCause};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// Entry name of the built-in static records pipeline.
pub const LOCAL_ENTRY: &str = "local";

/// Start every configured server and block until the service closes.
pub async fn run(config: Config) -> anyhow::Result<()> {
    if config.servers.is_empty() {
        bail!("no server is configured");
    }

    let cache = config.cache.enabled.then(|| {
        Arc::new(MemCache::new(
            config.cache.size,
            Duration::from_secs(config.cache.cleanup_interval_secs),
        ))
    });

    let registry = build_registry(&config, cache.clone())?;
    let lifecycle = Lifecycle::new();
    spawn_signal_listener(Arc::clone(&lifecycle))?;

    let supervisor = ServerSupervisor::new(Arc::new(registry), Arc::clone(&lifecycle));
    for (idx, server) in config.servers.iter().enumerate() {
        match supervisor.start_servers(server).await {
            Ok(bound) => {
                for listener in bound {
                    info!(
                        server = idx,
                        proto = %listener.protocol,
                        addr = ?listener.local_addr,
                        socket = ?listener.socket_path,
                        "Listener ready"
                    );
                }
            }
            Err(e) => {
                error!(server = idx, error = %e, "Failed to start server");
                lifecycle.token().cancel();
                if let Some(cache) = &cache {
                    cache.close();
                }
                return Err(e.into());
            }
        }
    }

    info!("Server ready! Press Ctrl+C to stop");

    let cause = lifecycle.wait().await;
    if let Some(cache) = &cache {
        cache.close();
    }

    match cause {
        Some(cause) if !cause.is_graceful() => Err(cause.into()),
        _ => Ok(()),
    }
}

fn build_registry(
    config: &Config,
    cache: Option<Arc<MemCache>>,
) -> anyhow::Result<PipelineRegistry> {
    let mut local: Arc<dyn QueryPipeline> =
        Arc::new(LocalRecordsPipeline::new(&config.local_records)?);

    if let Some(cache) = cache {
        local = Arc::new(CachedPipeline::new(
            local,
            cache as Arc<dyn ResponseCache>,
            config.cache.max_ttl_secs,
        ));
    }

    let mut registry = PipelineRegistry::new();
    registry.register(LOCAL_ENTRY, local);
    Ok(registry)
}

fn spawn_signal_listener(lifecycle: Arc<Lifecycle>) -> anyhow::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        let token = lifecycle.token();
        let name = tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = token.cancelled() => return,
        };
        lifecycle.send_close_signal(ShutdownCause::Signal(name));
    });
    Ok(())
}
