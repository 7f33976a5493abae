//! The [`Agent`]: owner of a broker connection, a set of child
//! [`crate::behaviour::Behaviour`]s, the correlation table backing
//! [`Agent::call`], the peer table, and the trace store (§3, §4.3).

pub mod error;
mod peer;
mod presence;

use std::fmt;
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

// Layer 3: Internal module imports
use crate::behaviour::Behaviour;
use crate::broker::BrokerChannel;
use crate::clock::Clock;
use crate::config::AgentConfig;
use crate::handler::HandlerRegistry;
use crate::message::payloads::{BehaviourCommand, CoreStatus, RpcErrorPayload, ServiceStatus};
use crate::message::{Envelope, MessageType, Payload, RpcMessage, SerializedObject};
use crate::message::payloads::RequestType;
use crate::supervisor::Supervisor;
use crate::trace::{TraceEvent, TraceStore};
use crate::util::{AgentId, CorrelationId};

pub use error::AgentError;
pub use peer::{PeerEntry, PeerTable};

/// The agent's lifecycle state (§3, mirrored by
/// [`crate::behaviour::BehaviourState`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Constructed but not yet started.
    Init,
    /// [`Agent::start`] is in progress.
    Starting,
    /// Fully started and processing messages.
    Running,
    /// [`Agent::stop`] is in progress.
    Stopping,
    /// Fully stopped; broker connection closed.
    Shutdown,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// The reply delivered through a pending [`Agent::call`]'s correlation
/// entry.
#[derive(Debug, Clone)]
pub struct RpcReply {
    /// The response payload's `c_type` discriminator.
    pub c_type: String,
    /// The response payload, JSON-encoded.
    pub c_data: String,
}

/// The outcome of an [`Agent::call`]: either the callee's typed response,
/// still wrapped so the caller can [`SerializedObject::decode`] it, or an
/// [`RpcErrorPayload`] — this never panics or propagates a Rust `Err`
/// across the RPC boundary, mirroring the original's "RPC never throws"
/// behavior.
#[derive(Debug, Clone)]
pub enum RpcOutcome {
    /// A successful reply, ready to be decoded as the expected payload
    /// type.
    Ok(SerializedObject),
    /// The callee (or the runtime, on timeout) reported an error.
    Err(RpcErrorPayload),
}

struct AgentInner {
    identity: AgentId,
    config: AgentConfig,
    clock: Arc<dyn Clock>,
    broker: Arc<dyn BrokerChannel>,
    state: Mutex<AgentState>,
    behaviours: Mutex<Vec<Behaviour>>,
    supervisor: Supervisor,
    correlations: DashMap<CorrelationId, oneshot::Sender<RpcReply>>,
    peers: PeerTable,
    trace: TraceStore,
    handlers: HandlerRegistry<Agent>,
    presence_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

/// An agent: the unit that owns a broker identity, a set of behaviours,
/// and the system-level CONTROL/RPC message handling (§3).
///
/// Cheap to clone — every clone shares the same underlying state, the way
/// the teacher's `Arc`-wrapped broker/actor handles do.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

/// A non-owning reference to an [`Agent`], held by its child
/// [`crate::behaviour::Behaviour`]s so the ownership graph stays acyclic
/// (§3: "a behaviour holds a non-owning reference back to its agent").
#[derive(Clone)]
pub struct AgentHandle(Weak<AgentInner>);

impl AgentHandle {
    pub(crate) fn new(agent: &Agent) -> Self {
        Self(Arc::downgrade(&agent.inner))
    }

    /// Resolves the handle to a live [`Agent`], or `None` if the agent has
    /// since been dropped.
    pub fn upgrade(&self) -> Option<Agent> {
        self.0.upgrade().map(|inner| Agent { inner })
    }
}

impl Agent {
    /// Constructs an agent from a validated configuration, a connected
    /// broker channel, and a clock.
    pub fn new(config: AgentConfig, broker: Arc<dyn BrokerChannel>, clock: Arc<dyn Clock>) -> Result<Self, AgentError> {
        config.validate().map_err(AgentError::Config)?;
        let identity = AgentId::new(&config.identity)?;

        let mut handlers = HandlerRegistry::new();
        handlers.register("CONTROL", crate::handler::control::control_handler());
        handlers.register("RPC", crate::handler::rpc::rpc_handler());

        let trace = TraceStore::new(config.trace_capacity);
        let peers = PeerTable::new(config.peer_table_capacity);

        Ok(Self {
            inner: Arc::new(AgentInner {
                identity,
                clock,
                broker,
                state: Mutex::new(AgentState::Init),
                behaviours: Mutex::new(Vec::new()),
                supervisor: Supervisor::new(),
                correlations: DashMap::new(),
                peers,
                trace,
                handlers,
                presence_task: Mutex::new(None),
                dispatch_task: Mutex::new(None),
                config,
            }),
        })
    }

    /// This agent's identity.
    pub fn identity(&self) -> &AgentId {
        &self.inner.identity
    }

    /// This agent's configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    /// This agent's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub(crate) fn broker(&self) -> &Arc<dyn BrokerChannel> {
        &self.inner.broker
    }

    pub(crate) fn peer_table(&self) -> &PeerTable {
        &self.inner.peers
    }

    /// This agent's trace store.
    pub fn trace_store(&self) -> &TraceStore {
        &self.inner.trace
    }

    /// A non-owning handle suitable for a child behaviour to hold.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle::new(self)
    }

    /// The agent's current lifecycle state.
    pub fn state(&self) -> AgentState {
        *self.inner.state.lock()
    }

    fn transition(&self, from: &[AgentState], to: AgentState) -> Result<(), AgentError> {
        let mut state = self.inner.state.lock();
        if !from.contains(&state) {
            return Err(AgentError::InvalidTransition(format!(
                "cannot move '{}' from {state} to {to}",
                self.inner.identity
            )));
        }
        *state = to;
        Ok(())
    }

    /// Attaches a new, not-yet-started behaviour, returning the handle the
    /// caller uses to manage or message it directly. If the agent is
    /// already running, the behaviour is started immediately; otherwise
    /// it starts when [`Agent::start`] runs.
    pub async fn add_behaviour(&self, builder: crate::behaviour::BehaviourBuilder) -> Result<Behaviour, AgentError> {
        let behaviour = builder.build(self)?;
        self.inner.behaviours.lock().push(behaviour.clone());
        self.inner.supervisor.add(Arc::new(behaviour.clone()));
        if self.state() == AgentState::Running {
            behaviour.start().await?;
        }
        Ok(behaviour)
    }

    /// Looks up a behaviour whose identity ends with `suffix`. Logs a
    /// warning (and returns the first match) if more than one behaviour
    /// matches.
    pub fn get_behaviour(&self, suffix: &str) -> Option<Behaviour> {
        let behaviours = self.inner.behaviours.lock();
        let matches: Vec<&Behaviour> = behaviours.iter().filter(|b| b.id().matches_suffix(suffix)).collect();
        if matches.len() > 1 {
            warn!(suffix, count = matches.len(), "suffix matched more than one behaviour; using the first");
        }
        matches.first().map(|b| (*b).clone())
    }

    /// Finds the first attached behaviour whose RPC subsystem exposes
    /// `method` (§4.2.2: exposed methods are "registered with the
    /// broker's request/response RPC pattern under its method name").
    pub(crate) fn find_behaviour_with_exposed_method(&self, method: &str) -> Option<Behaviour> {
        self.inner.behaviours.lock().iter().find(|b| b.has_exposed_method(method)).cloned()
    }

    /// Identities of every attached behaviour.
    pub fn list_behaviour_names(&self) -> Vec<String> {
        self.inner.behaviours.lock().iter().map(|b| b.id().to_string()).collect()
    }

    /// A snapshot of this agent's and every behaviour's lifecycle state.
    pub fn status(&self) -> CoreStatus {
        let behaviours = self
            .inner
            .behaviours
            .lock()
            .iter()
            .map(|b| ServiceStatus {
                name: b.id().to_string(),
                state: b.state().to_string(),
            })
            .collect();
        CoreStatus {
            name: self.inner.identity.to_string(),
            state: self.state().to_string(),
            behaviours,
        }
    }

    /// Every peer that answered the current presence ping round.
    pub fn list_peers(&self) -> Vec<PeerEntry> {
        self.inner.peers.list_current()
    }

    /// Records a peer's reported status under the given correlation id.
    pub(crate) fn record_peer(&self, identity: String, status: CoreStatus, correlation_id: CorrelationId) {
        self.inner.peers.record(identity, status, correlation_id, self.clock().utcnow());
    }

    /// Matching trace entries, JSON-encoded, newest first.
    pub fn query_traces(&self, limit: Option<usize>, app_id: Option<&str>, category: Option<&str>) -> Vec<String> {
        self.inner
            .trace
            .filter(limit, app_id, category)
            .into_iter()
            .filter_map(|e| serde_json::to_string(&e).ok())
            .collect()
    }

    async fn send_envelope(&self, target: &str, envelope: Envelope) -> Result<(), AgentError> {
        let category = envelope.correlation_id.map(|c| c.to_string());
        self.inner.trace.append(TraceEvent::from_envelope(&envelope, true, category));
        self.inner.broker.publish_direct(target, envelope).await?;
        Ok(())
    }

    async fn fanout_envelope(&self, envelope: Envelope) -> Result<(), AgentError> {
        let category = envelope.correlation_id.map(|c| c.to_string());
        self.inner.trace.append(TraceEvent::from_envelope(&envelope, true, category));
        self.inner.broker.publish_fanout(envelope).await?;
        Ok(())
    }

    async fn topic_envelope(&self, routing_key: &str, envelope: Envelope) -> Result<(), AgentError> {
        let category = envelope.correlation_id.map(|c| c.to_string());
        self.inner.trace.append(TraceEvent::from_envelope(&envelope, true, category));
        self.inner.broker.publish_topic(routing_key, envelope).await?;
        Ok(())
    }

    /// Sends `body` directly to `target`'s queue (§4.3).
    pub async fn direct_send(
        &self,
        target: &str,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(body).map_err(crate::message::CodecError::from)?;
        let envelope = Envelope::new(self.inner.identity.as_str(), message_type, bytes, self.clock().as_ref())
            .with_correlation_id_opt(correlation_id);
        self.send_envelope(target, envelope).await
    }

    /// Publishes `body` to the admin fanout exchange, reaching every
    /// connected agent's anonymous queue (§4.3).
    pub async fn fanout_send(
        &self,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(body).map_err(crate::message::CodecError::from)?;
        let envelope = Envelope::new(self.inner.identity.as_str(), message_type, bytes, self.clock().as_ref())
            .with_correlation_id_opt(correlation_id);
        self.fanout_envelope(envelope).await
    }

    /// Publishes `body` to the topic exchange under `routing_key` (§4.2.1,
    /// §4.3).
    pub async fn publish(
        &self,
        routing_key: &str,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec(body).map_err(crate::message::CodecError::from)?;
        let envelope = Envelope::new(self.inner.identity.as_str(), message_type, bytes, self.clock().as_ref())
            .with_correlation_id_opt(correlation_id)
            .with_routing_key(routing_key);
        self.topic_envelope(routing_key, envelope).await
    }

    /// Issues an RPC request to `target` (or to this agent itself, if
    /// `target` is `None`) and awaits the reply, bounded by
    /// [`AgentConfig::timeout`]. Never returns a Rust `Err` for a
    /// request-level failure — timeouts and remote errors both surface as
    /// [`RpcOutcome::Err`] (§4.3, §7).
    pub async fn call<P: Payload>(&self, request: &P, target: Option<&str>) -> RpcOutcome {
        let correlation_id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.correlations.insert(correlation_id, tx);

        let rpc = match RpcMessage::encode(request, RequestType::Request) {
            Ok(rpc) => rpc,
            Err(e) => {
                self.inner.correlations.remove(&correlation_id);
                return RpcOutcome::Err(RpcErrorPayload { error: e.to_string() });
            }
        };
        let bytes = match serde_json::to_vec(&rpc) {
            Ok(b) => b,
            Err(e) => {
                self.inner.correlations.remove(&correlation_id);
                return RpcOutcome::Err(RpcErrorPayload { error: e.to_string() });
            }
        };
        let envelope = Envelope::new(self.inner.identity.as_str(), MessageType::Rpc, bytes, self.clock().as_ref())
            .with_correlation_id(correlation_id);
        let target_queue = target.unwrap_or_else(|| self.inner.identity.as_str());
        if let Err(e) = self.send_envelope(target_queue, envelope).await {
            self.inner.correlations.remove(&correlation_id);
            return RpcOutcome::Err(RpcErrorPayload { error: e.to_string() });
        }

        let timeout = self.inner.config.timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                if reply.c_type == RpcErrorPayload::C_TYPE {
                    match serde_json::from_str::<RpcErrorPayload>(&reply.c_data) {
                        Ok(payload) => RpcOutcome::Err(payload),
                        Err(e) => RpcOutcome::Err(RpcErrorPayload { error: e.to_string() }),
                    }
                } else {
                    RpcOutcome::Ok(SerializedObject {
                        c_type: reply.c_type,
                        c_data: reply.c_data,
                    })
                }
            }
            Ok(Err(_)) => {
                self.inner.correlations.remove(&correlation_id);
                RpcOutcome::Err(RpcErrorPayload {
                    error: "RpcError: reply channel closed before a response arrived".to_string(),
                })
            }
            Err(_) => {
                self.inner.correlations.remove(&correlation_id);
                RpcOutcome::Err(RpcErrorPayload {
                    error: format!("TimeoutError: no response within {timeout:?}"),
                })
            }
        }
    }

    pub(crate) fn complete_correlation(&self, correlation_id: CorrelationId, reply: RpcReply) {
        match self.inner.correlations.remove(&correlation_id) {
            Some((_, tx)) => {
                let _ = tx.send(reply);
            }
            None => {
                debug!(%correlation_id, "dropping reply with no pending correlation entry");
            }
        }
    }

    /// Starts or stops the behaviour matched by `suffix`, per `command`
    /// (§4.4.2). Stopping a behaviour also resets it back to `init`, so a
    /// subsequent `start` begins clean.
    pub async fn manage_behaviour(&self, behav: Option<&str>, command: Option<BehaviourCommand>) -> String {
        let Some(suffix) = behav else {
            return "No behaviour specified.".to_string();
        };
        let Some(behaviour) = self.get_behaviour(suffix) else {
            return format!("No behaviour matching '{suffix}' found.");
        };
        match command {
            Some(BehaviourCommand::Start) => match behaviour.start().await {
                Ok(()) => format!("Behaviour '{}' started.", behaviour.id()),
                Err(e) => format!("Failed to start behaviour '{}': {e}", behaviour.id()),
            },
            Some(BehaviourCommand::Stop) => {
                if let Err(e) = behaviour.stop().await {
                    return format!("Failed to stop behaviour '{}': {e}", behaviour.id());
                }
                match behaviour.reset() {
                    Ok(()) => format!("Behaviour '{}' stopped and reset to init.", behaviour.id()),
                    Err(e) => format!("Behaviour '{}' stopped but failed to reset: {e}", behaviour.id()),
                }
            }
            None => "No command specified.".to_string(),
        }
    }

    /// Schedules a graceful shutdown on a separate task, so the caller
    /// (typically the RPC handler replying to a `Shutdown` request) can
    /// finish sending its response first.
    pub fn schedule_shutdown(&self) {
        let agent = self.clone();
        tokio::spawn(async move {
            if let Err(e) = agent.stop().await {
                error!(error = %e, "scheduled shutdown failed");
            }
        });
    }

    /// Connects the agent to the broker, starts every attached behaviour
    /// in the order they were added, and begins the presence protocol
    /// (§4.3).
    pub async fn start(&self) -> Result<(), AgentError> {
        self.transition(&[AgentState::Init], AgentState::Starting)?;

        self.inner.broker.declare_exchanges().await?;
        let mut rx = self.inner.broker.declare_agent_queues(&self.inner.identity).await?;

        let dispatch_agent = self.clone();
        let dispatch_task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                dispatch_agent
                    .inner
                    .trace
                    .append(TraceEvent::from_envelope(&envelope, false, Some("incoming".to_string())));

                match &envelope.message_type {
                    MessageType::Control | MessageType::Rpc => {
                        if let Err(e) = dispatch_agent.inner.handlers.dispatch(&dispatch_agent, &envelope).await {
                            error!(error = %e, message_type = %envelope.message_type, "handler failed; continuing");
                        }
                    }
                    _ => {
                        let behaviours = dispatch_agent.inner.behaviours.lock().clone();
                        for behaviour in behaviours {
                            if behaviour.enqueue(envelope.clone()) {
                                dispatch_agent
                                    .inner
                                    .trace
                                    .append(TraceEvent::from_envelope(&envelope, false, Some(behaviour.id().to_string())));
                            }
                        }
                    }
                }
            }
        });
        *self.inner.dispatch_task.lock() = Some(dispatch_task);

        self.inner.supervisor.start_all().await?;
        *self.inner.presence_task.lock() = Some(presence::spawn_presence_loop(self.clone()));

        self.transition(&[AgentState::Starting], AgentState::Running)?;
        Ok(())
    }

    /// Gracefully shuts the agent down (§4.3.2):
    /// 1. marks the agent stopped,
    /// 2. stops behaviours in reverse start order, bounded by
    ///    [`AgentConfig::timeout`],
    /// 3. cancels every outstanding RPC promise with an error reply,
    /// 4. cancels the presence loop and message dispatch task,
    /// 5. closes the broker channel.
    pub async fn stop(&self) -> Result<(), AgentError> {
        self.transition(&[AgentState::Running], AgentState::Stopping)?;

        let shutdown_timeout = self.inner.config.timeout;
        if let Err(e) = self.inner.supervisor.shutdown(shutdown_timeout).await {
            warn!(error = %e, "behaviour shutdown did not complete cleanly");
        }

        let pending: Vec<CorrelationId> = self.inner.correlations.iter().map(|e| *e.key()).collect();
        for correlation_id in pending {
            if let Some((_, tx)) = self.inner.correlations.remove(&correlation_id) {
                let _ = tx.send(RpcReply {
                    c_type: RpcErrorPayload::C_TYPE.to_string(),
                    c_data: serde_json::to_string(&RpcErrorPayload {
                        error: "RpcError: agent is shutting down".to_string(),
                    })
                    .unwrap_or_default(),
                });
            }
        }

        if let Some(task) = self.inner.presence_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.inner.dispatch_task.lock().take() {
            task.abort();
        }

        self.inner.broker.close().await?;
        self.transition(&[AgentState::Stopping], AgentState::Shutdown)?;
        Ok(())
    }

    /// Resets a fully shut-down agent back to `init`, so it can be
    /// started again.
    pub fn reset(&self) -> Result<(), AgentError> {
        self.transition(&[AgentState::Shutdown], AgentState::Init)
    }
}
