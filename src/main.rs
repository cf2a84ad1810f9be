use std::sync::Arc;

use anyhow::Context;
use signing_agent::agent::{CustodyClient, HmacSigner};
use signing_agent::approver::{ActionManager, AutoApprover};
use signing_agent::config::AgentConfig;
use signing_agent::dedup::{
    ActionDedupCoordinator, DistributedLock, InMemoryBackend, RedisBackend, RedisLockConfig,
    SharedCache,
};
use signing_agent::hub::{FeedHub, UpstreamSource, WebsocketDialer};
use signing_agent::server::{AppState, build_router};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Hub = FeedHub<UpstreamSource<WebsocketDialer, HmacSigner>>;
type Custody = CustodyClient<HmacSigner>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signing_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().context("loading configuration")?;
    let signer = HmacSigner::new(config.agent_id.clone(), config.secret.clone())
        .context("building signer")?;

    let source = Arc::new(UpstreamSource::new(
        WebsocketDialer,
        signer.clone(),
        config.feed_url.clone(),
        config.reconnect,
    ));
    let hub = FeedHub::new(source);
    if !hub.run().await {
        anyhow::bail!("could not connect to feed {}", config.feed_url);
    }

    let client = Arc::new(
        CustodyClient::new(config.custody_api_url.clone(), signer)
            .context("building custody client")?,
    );

    if config.load_balancing {
        let redis = RedisBackend::connect(&config.redis_url, RedisLockConfig::default())
            .await
            .with_context(|| format!("connecting to {}", config.redis_url))?;
        let dedup = Arc::new(ActionDedupCoordinator::new(
            redis.clone(),
            redis,
            config.dedup,
        ));
        info!("Load balancing enabled");
        serve(config, hub, client, Some(dedup)).await
    } else {
        serve::<InMemoryBackend, InMemoryBackend>(config, hub, client, None).await
    }
}

async fn serve<C: SharedCache, L: DistributedLock>(
    config: AgentConfig,
    hub: Hub,
    client: Arc<Custody>,
    dedup: Option<Arc<ActionDedupCoordinator<C, L>>>,
) -> anyhow::Result<()> {
    let approver = config.auto_approve.then(|| {
        let approver = AutoApprover::new(Arc::clone(&client), dedup.clone(), config.retry);
        approver.attach(&hub);
        info!("Auto-approval enabled");
        approver
    });

    let manager = ActionManager::new(client, dedup);
    let app = build_router(AppState::new(hub.clone(), manager, config.feed_client));

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    info!(addr = %config.http_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("serving HTTP")?;

    if let Some(approver) = approver {
        approver.cancellation_token().cancel();
    }
    info!("shut down");
    Ok(())
}

/// Resolves on Ctrl-C after closing the feed, which ends every websocket
/// client and the auto-approver.
async fn shutdown_signal(hub: Hub) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, stopping feed");
    hub.stop().await;
}
