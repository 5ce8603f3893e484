//! Demo worker that joins a live task through the echo router.
//!
//! Run the router first (cargo run -p echo-router), then:
//! cargo run -p task-client

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use live_task_client::{
    AgentStatus, ConnectionStatus, LiveConfig, LiveObserver, LiveTaskClient, Message,
    OutgoingMessage,
};
use live_task_transport::WebSocketTransport;
use serde_json::json;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Logs notifications and publishes the connection status.
struct ConsoleObserver {
    status: watch::Sender<ConnectionStatus>,
}

impl LiveObserver for ConsoleObserver {
    fn on_connection_status_change(&self, status: ConnectionStatus) {
        tracing::info!(?status, "connection");
        self.status.send_replace(status);
    }

    fn on_agent_status_change(&self, status: AgentStatus) {
        tracing::info!(?status, "agent");
    }

    fn on_message_received(&self, message: &Message) {
        tracing::info!(
            from = message.sender_id.as_deref().unwrap_or("?"),
            text = %message.text,
            "message"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::var("LIVE_TASK_ROUTER_URL") {
        Ok(url) => LiveConfig::new(url),
        Err(_) => LiveConfig::default(),
    };
    let transport = Arc::new(WebSocketTransport::new(config.router_url.clone()));
    let client = LiveTaskClient::new(config, transport);

    let (status_tx, mut status_rx) = watch::channel(ConnectionStatus::NotStarted);
    client.add_observer(Arc::new(ConsoleObserver { status: status_tx }));
    client.connect("demo-agent")?;

    let status = *status_rx
        .wait_for(|status| status.is_connected() || status.is_terminal())
        .await
        .context("observer dropped")?;
    if !status.is_connected() {
        client.destroy();
        bail!("could not reach the task server ({status:?})");
    }

    let sent = client
        .send_message(OutgoingMessage::text("hello from the demo"))
        .await?;
    tracing::info!(id = %sent.id, "message sent");

    let value = client.call_async("echo", &json!({ "x": 1 })).await?;
    tracing::info!(%value, "echo call answered");

    tokio::time::sleep(Duration::from_millis(500)).await;
    for message in client.messages().snapshot() {
        println!(
            "[{}] {}",
            message.sender_id.as_deref().unwrap_or("?"),
            message.text
        );
    }

    client.destroy();
    Ok(())
}
