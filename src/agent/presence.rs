//! Presence protocol (§4.3.1): a fanout [`PingControl`] broadcast
//! periodically, answered directly by every listening peer with a
//! [`PongControl`] carrying the ping's correlation id.

use tracing::warn;

use crate::agent::{Agent, AgentState};
use crate::message::payloads::PingControl;
use crate::message::{MessageType, SerializedObject};
use crate::util::CorrelationId;

impl Agent {
    /// Broadcasts a presence ping, recording its correlation id as the
    /// current ping round in the peer table.
    pub(crate) async fn send_ping(&self) -> Result<(), crate::agent::AgentError> {
        let correlation_id = CorrelationId::new();
        self.peer_table().set_current_ping(correlation_id);
        let body = SerializedObject::encode(&PingControl::default())?;
        self.fanout_send(MessageType::Control, &body, Some(correlation_id)).await
    }
}

/// Spawns the background task that sends an initial presence ping
/// immediately on start (regardless of `update_peer_interval`) and then
/// re-pings on that interval until the agent stops running.
pub(crate) fn spawn_presence_loop(agent: Agent) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = agent.send_ping().await {
            warn!(error = %e, "initial presence ping failed");
        }
        loop {
            agent.clock().sleep(agent.config().update_peer_interval).await;
            if agent.state() != AgentState::Running {
                break;
            }
            if let Err(e) = agent.send_ping().await {
                warn!(error = %e, "presence ping failed");
            }
        }
    })
}
