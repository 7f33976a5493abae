//! The system CONTROL handler (§4.3.1, §4.4.1): answers presence pings
//! with a status pong, and records presence pongs into the peer table.

// Layer 2: Third-party crate imports
use tracing::warn;

// Layer 3: Internal module imports
use super::registry::{HandlerError, HandlerFn};
use crate::agent::Agent;
use crate::message::payloads::{PingControl, PongControl};
use crate::message::{Envelope, MessageType, SerializedObject};

/// Builds the handler registered under `"CONTROL"` on every agent's
/// system registry.
pub fn control_handler() -> HandlerFn<Agent> {
    std::sync::Arc::new(|agent: &Agent, envelope: &Envelope| {
        Box::pin(async move { handle(agent, envelope).await })
    })
}

async fn handle(agent: &Agent, envelope: &Envelope) -> Result<(), HandlerError> {
    let body: SerializedObject = serde_json::from_slice(&envelope.body)?;
    match body.c_type.as_str() {
        "PingControl" => {
            let _: PingControl = body.decode()?;
            let status = agent.status();
            let pong = SerializedObject::encode(&PongControl { status })?;
            agent
                .direct_send(&envelope.app_id, MessageType::Control, &pong, envelope.correlation_id)
                .await
                .map_err(|e| HandlerError::HandlerException {
                    message_type: "CONTROL".to_string(),
                    source: Box::new(e),
                })?;
        }
        "PongControl" => {
            let pong: PongControl = body.decode()?;
            let Some(correlation_id) = envelope.correlation_id else {
                warn!(app_id = %envelope.app_id, "pong control with no correlation id; dropping");
                return Ok(());
            };
            agent.record_peer(envelope.app_id.clone(), pong.status, correlation_id);
        }
        other => {
            warn!(c_type = other, "unrecognized control message; dropping");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBrokerChannel;
    use crate::clock::SystemClock;
    use crate::config::AgentConfig;
    use std::sync::Arc;
    use std::time::Duration;

    /// The presence loop's own initial ping fans out to the agent's own
    /// queue too; this exercises the full ping -> pong -> peer-table round
    /// trip against the agent itself, with no second agent required.
    #[tokio::test]
    async fn self_ping_records_self_as_a_peer() {
        let broker = Arc::new(InMemoryBrokerChannel::new());
        let config = AgentConfig::builder("solo", "amqp://localhost")
            .with_timeout(Duration::from_millis(200))
            .with_update_peer_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let clock = Arc::new(SystemClock::new());
        let agent = Agent::new(config, broker, clock).unwrap();
        agent.start().await.unwrap();

        let mut peers = Vec::new();
        for _ in 0..20 {
            peers = agent.list_peers();
            if !peers.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].identity, "solo");
        agent.stop().await.unwrap();
    }
}
