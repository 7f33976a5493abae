//! The system RPC handler (§4.4.2): serves the built-in request types
//! (`Ping`, `ListBehav`, `ManageBehav`, `ListTraceStore`, `Shutdown`) and
//! completes pending [`crate::agent::Agent::call`] promises on responses.

// Layer 2: Third-party crate imports
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::registry::{HandlerError, HandlerFn};
use crate::agent::{Agent, RpcReply};
use crate::message::payloads::{
    ListBehav, ListTraceStore, ManageBehav, Ping, Pong, RequestType, RpcErrorPayload, Shutdown,
};
use crate::message::{Envelope, MessageType, RpcMessage};

/// Builds the handler registered under `"RPC"` on every agent's system
/// registry.
pub fn rpc_handler() -> HandlerFn<Agent> {
    std::sync::Arc::new(|agent: &Agent, envelope: &Envelope| Box::pin(async move { handle(agent, envelope).await }))
}

async fn handle(agent: &Agent, envelope: &Envelope) -> Result<(), HandlerError> {
    let message: RpcMessage = serde_json::from_slice(&envelope.body)?;
    match message.request_type {
        RequestType::Request => serve_request(agent, envelope, &message).await,
        RequestType::Response => {
            complete_response(agent, envelope, &message);
            Ok(())
        }
    }
}

fn complete_response(agent: &Agent, envelope: &Envelope, message: &RpcMessage) {
    let Some(correlation_id) = envelope.correlation_id else {
        warn!(c_type = %message.c_type, "rpc response with no correlation id; dropping");
        return;
    };
    agent.complete_correlation(
        correlation_id,
        RpcReply {
            c_type: message.c_type.clone(),
            c_data: message.c_data.clone(),
        },
    );
}

async fn serve_request(agent: &Agent, envelope: &Envelope, message: &RpcMessage) -> Result<(), HandlerError> {
    let response = match message.c_type.as_str() {
        "Ping" => match message.decode::<Ping>() {
            Ok(_) => RpcMessage::encode(&Pong::default(), RequestType::Response),
            Err(e) => error_response(e.to_string()),
        },
        "ListBehav" => {
            let behavs = agent.list_behaviour_names();
            RpcMessage::encode(&ListBehav { behavs }, RequestType::Response)
        }
        "ManageBehav" => match message.decode::<ManageBehav>() {
            Ok(request) => {
                let result = agent.manage_behaviour(request.behav.as_deref(), request.command).await;
                RpcMessage::encode(
                    &ManageBehav {
                        behav: request.behav,
                        command: request.command,
                        result,
                    },
                    RequestType::Response,
                )
            }
            Err(e) => error_response(e.to_string()),
        },
        "ListTraceStore" => match message.decode::<ListTraceStore>() {
            Ok(request) => {
                let traces = agent.query_traces(request.limit, request.app_id.as_deref(), request.category.as_deref());
                RpcMessage::encode(
                    &ListTraceStore {
                        limit: request.limit,
                        app_id: request.app_id,
                        category: request.category,
                        traces,
                    },
                    RequestType::Response,
                )
            }
            Err(e) => error_response(e.to_string()),
        },
        "Shutdown" => {
            let reply = RpcMessage::encode(
                &Shutdown {
                    result: format!("Shutdown of {} initiated.", agent.identity()),
                },
                RequestType::Response,
            );
            send_reply(agent, envelope, reply).await?;
            agent.schedule_shutdown();
            return Ok(());
        }
        other => match agent.find_behaviour_with_exposed_method(other) {
            Some(behaviour) => {
                let kwargs: serde_json::Value = serde_json::from_str(&message.c_data).unwrap_or(serde_json::Value::Null);
                match behaviour.call_exposed_method(other, kwargs).await {
                    Ok(result) => serde_json::to_string(&result)
                        .map(|c_data| RpcMessage {
                            c_type: other.to_string(),
                            c_data,
                            request_type: RequestType::Response,
                        })
                        .map_err(crate::message::CodecError::from),
                    Err(e) => error_response(e),
                }
            }
            None => error_response(format!("unknown request type: {other}")),
        },
    };
    send_reply(agent, envelope, response).await
}

fn error_response(message: String) -> Result<RpcMessage, crate::message::CodecError> {
    RpcMessage::encode(&RpcErrorPayload { error: message }, RequestType::Response)
}

/// Sends the RPC response bounded by the agent's own configured timeout,
/// mirroring the recovered behavior that a reply send itself cannot hang
/// forever.
async fn send_reply(
    agent: &Agent,
    envelope: &Envelope,
    response: Result<RpcMessage, crate::message::CodecError>,
) -> Result<(), HandlerError> {
    let message = response?;
    let bytes = serde_json::to_vec(&message).map_err(crate::message::CodecError::from)?;
    let reply_body = crate::message::SerializedObject {
        c_type: message.c_type.clone(),
        c_data: message.c_data.clone(),
    };
    debug!(target = %envelope.app_id, c_type = %message.c_type, "replying to rpc request");
    let send = agent.direct_send(&envelope.app_id, MessageType::Rpc, &reply_body, envelope.correlation_id);
    match tokio::time::timeout(agent.config().timeout, send).await {
        Ok(result) => result.map_err(|e| HandlerError::HandlerException {
            message_type: "RPC".to_string(),
            source: Box::new(e),
        }),
        Err(_) => Err(HandlerError::HandlerException {
            message_type: "RPC".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out sending rpc response",
            )),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBrokerChannel;
    use crate::clock::SystemClock;
    use crate::config::AgentConfig;
    use std::sync::Arc;
    use std::time::Duration;

    async fn running_agent(identity: &str) -> Agent {
        let config = AgentConfig::builder(identity, "amqp://localhost")
            .with_timeout(Duration::from_millis(200))
            .with_update_peer_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let broker = Arc::new(InMemoryBrokerChannel::new());
        let clock = Arc::new(SystemClock::new());
        let agent = Agent::new(config, broker, clock).unwrap();
        agent.start().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn ping_request_to_self_returns_pong() {
        let agent = running_agent("rpc-1").await;
        let outcome = agent.call(&Ping::default(), None).await;
        match outcome {
            crate::agent::RpcOutcome::Ok(body) => {
                let pong: Pong = body.decode().unwrap();
                assert_eq!(pong, Pong::default());
            }
            crate::agent::RpcOutcome::Err(e) => panic!("expected a pong, got error: {}", e.error),
        }
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn list_behav_reports_attached_behaviours() {
        let agent = running_agent("rpc-2").await;
        agent
            .add_behaviour(crate::behaviour::BehaviourBuilder::new("EchoBehaviour"))
            .await
            .unwrap();
        let outcome = agent.call(&ListBehav::default(), None).await;
        match outcome {
            crate::agent::RpcOutcome::Ok(body) => {
                let list: ListBehav = body.decode().unwrap();
                assert_eq!(list.behavs, vec!["rpc-2.EchoBehaviour".to_string()]);
            }
            crate::agent::RpcOutcome::Err(e) => panic!("expected a behaviour list, got error: {}", e.error),
        }
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_request_replies_then_stops_the_agent() {
        let agent = running_agent("rpc-3").await;
        let outcome = agent.call(&Shutdown::default(), None).await;
        assert!(matches!(outcome, crate::agent::RpcOutcome::Ok(_)));
        for _ in 0..20 {
            if agent.state() == crate::agent::AgentState::Shutdown {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("agent did not shut down after a Shutdown rpc request");
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Double {
        n: i64,
    }
    impl crate::message::Payload for Double {
        const C_TYPE: &'static str = "double";
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct NoSuchMethod;
    impl crate::message::Payload for NoSuchMethod {
        const C_TYPE: &'static str = "NoSuchMethod";
    }

    #[tokio::test]
    async fn rpc_dispatches_to_an_exposed_behaviour_method() {
        use crate::behaviour::{BehaviourBuilder, ExposedMethod};

        let agent = running_agent("rpc-4").await;
        let double: ExposedMethod = Arc::new(|_b, kwargs| {
            Box::pin(async move {
                let n = kwargs.get("n").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok(serde_json::json!({ "n": n * 2 }))
            })
        });
        agent
            .add_behaviour(BehaviourBuilder::new("MathBehaviour").with_exposed_method("double", double))
            .await
            .unwrap();

        let outcome = agent.call(&Double { n: 10 }, None).await;
        match outcome {
            crate::agent::RpcOutcome::Ok(body) => {
                assert_eq!(body.c_type, "double");
                let result: serde_json::Value = serde_json::from_str(&body.c_data).unwrap();
                assert_eq!(result, serde_json::json!({ "n": 20 }));
            }
            crate::agent::RpcOutcome::Err(e) => panic!("expected a reply, got error: {}", e.error),
        }
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rpc_unknown_request_type_returns_error_response() {
        let agent = running_agent("rpc-5").await;
        let outcome = agent.call(&NoSuchMethod, None).await;
        match outcome {
            crate::agent::RpcOutcome::Ok(body) => panic!("expected an error response, got: {}", body.c_data),
            crate::agent::RpcOutcome::Err(e) => {
                assert_eq!(e.error, "unknown request type: NoSuchMethod");
            }
        }
        agent.stop().await.unwrap();
    }
}
