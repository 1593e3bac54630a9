use chrono::{DateTime, Utc};
use partlink_protocol::PeerDirectory;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::client::{Courier, Rendezvous, SupervisorClient};
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::lifecycle::{Event, Lifecycle};
use crate::messaging::{LoopReport, MessagingLoop};
use crate::server;

/// Shared by every handler and by the messaging loop
pub struct NodeContext {
    pub config: NodeConfig,
    pub directory: PeerDirectory,
    pub lifecycle: Arc<Lifecycle>,
    pub rendezvous: Arc<dyn Rendezvous>,
    pub courier: Arc<dyn Courier>,
    pub started_at: DateTime<Utc>,
}

impl NodeContext {
    pub fn messaging_loop(&self) -> MessagingLoop {
        MessagingLoop::new(
            self.directory.clone(),
            self.config.exchange_interval,
            self.config.run_mode,
            self.courier.clone(),
            self.rendezvous.clone(),
            self.lifecycle.clone(),
        )
        .with_pattern(self.config.pattern)
    }
}

/// A payload that has bound its listening socket but not yet registered.
///
/// The socket belongs to the node and is released when the node is dropped,
/// whichever way `run` returns.
pub struct Node {
    ctx: Arc<NodeContext>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Node {
    /// Bind with the HTTP supervisor client for both rendezvous and messaging
    pub async fn bind(config: NodeConfig) -> Result<Self, NodeError> {
        let client = Arc::new(SupervisorClient::new(&config)?);
        Self::bind_with(config, client.clone(), client).await
    }

    pub async fn bind_with(
        config: NodeConfig,
        rendezvous: Arc<dyn Rendezvous>,
        courier: Arc<dyn Courier>,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let directory = config.directory();
        let lifecycle = Arc::new(Lifecycle::new());

        let listener = TcpListener::bind((config.bind_host.as_str(), 0)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            id = config.local_id(),
            addr = %local_addr,
            peers = directory.len(),
            "Payload bound"
        );
        lifecycle.apply(Event::Bound);

        let ctx = Arc::new(NodeContext {
            config,
            directory,
            lifecycle,
            rendezvous,
            courier,
            started_at: Utc::now(),
        });
        Ok(Self { ctx, listener, local_addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> Arc<Lifecycle> {
        self.ctx.lifecycle.clone()
    }

    pub fn context(&self) -> Arc<NodeContext> {
        self.ctx.clone()
    }

    /// Serve, register, wait for termination, drain, join the messaging loop.
    ///
    /// The server answers from the moment `run` starts, so calls that arrive
    /// while registration is still in flight get an immediate `NotReady`.
    /// Returns the loop's report if `Start` was ever accepted. Fails only
    /// when registration fails or the server socket errors.
    pub async fn run(self) -> Result<Option<LoopReport>, NodeError> {
        let Node { ctx, listener, local_addr } = self;
        let lifecycle = ctx.lifecycle.clone();

        let app = server::create_router(ctx.clone());
        let shutdown = lifecycle.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.termination().wait().await })
                .await
        });
        tracing::info!(addr = %local_addr, "Payload server listening");

        if let Err(e) = ctx.rendezvous.announce_ready(local_addr).await {
            tracing::error!(error = %e, "Registration failed");
            lifecycle.termination().fire();
            // the listener is dropped with the server task
            if let Err(join) = server.await {
                tracing::warn!(error = %join, "Payload server task did not complete");
            }
            lifecycle.apply(Event::RegistrationFailed);
            return Err(e);
        }
        lifecycle.apply(Event::Registered);

        let served = match server.await {
            Ok(served) => served,
            Err(join) => Err(std::io::Error::other(join)),
        };
        if let Err(e) = &served {
            tracing::error!(error = %e, "Payload server failed");
            lifecycle.terminate();
        }
        tracing::info!(addr = %local_addr, "Payload server drained");

        let report = match lifecycle.take_messaging() {
            Some(handle) => match handle.await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(error = %e, "Messaging loop task did not complete");
                    None
                }
            },
            None => None,
        };
        lifecycle.apply(Event::Drained);
        tracing::info!(id = ctx.config.local_id(), ?report, "Payload terminated");

        served?;
        Ok(report)
    }
}
