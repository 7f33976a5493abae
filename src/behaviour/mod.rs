//! A [`Behaviour`]: an agent's child unit of work, with its own FIFO
//! mailbox, optional pub-sub subscription, and message dispatch (§3,
//! §4.2).
//!
//! Mirrors the teacher's actor/mailbox split — an
//! [`crate::clock::Clock`]-driven lifecycle plus an
//! `UnboundedMailbox`-style channel — generalized from a generic `Actor<M>`
//! into a registry-dispatched unit, since this runtime's payload set is a
//! fixed, self-describing union rather than a single static message type.

// Layer 1: Standard library imports
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::error;

// Layer 3: Internal module imports
use crate::agent::{Agent, AgentError, AgentHandle};
use crate::handler::{HandlerFn, HandlerRegistry};
use crate::message::{Envelope, MessageType, SerializedObject};
use crate::supervisor::{Child, SupervisorError};
use crate::trace::TraceEvent;
use crate::util::{BehaviourId, CorrelationId};

/// A behaviour method exposed to the RPC subsystem (§4.2.2, §9
/// "exposed-method discovery"): `(behaviour, kwargs) -> result`, reached
/// by name either locally via [`Behaviour::call_exposed_method`] or
/// remotely through the owning agent's RPC dispatch
/// (`handler::rpc::rpc_handler`).
pub type ExposedMethod =
    Arc<dyn for<'a> Fn(&'a Behaviour, serde_json::Value) -> BoxFuture<'a, Result<serde_json::Value, String>> + Send + Sync>;

/// A behaviour's lifecycle state, mirroring
/// [`crate::agent::AgentState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviourState {
    /// Constructed but not yet started.
    Init,
    /// [`Behaviour::start`] is in progress.
    Starting,
    /// Running: its mailbox is being drained and dispatched.
    Running,
    /// [`Behaviour::stop`] is in progress.
    Stopping,
    /// Fully stopped.
    Shutdown,
}

impl fmt::Display for BehaviourState {
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

/// How a behaviour's run loop reacts to a handler returning an error
/// (Open Question, decided): the original silently swallowed handler
/// exceptions, which this runtime treats as too permissive a default —
/// `LogAndContinue` preserves that behavior, `Stop` is available for
/// behaviours where a bad message should halt processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BehaviourErrorPolicy {
    /// Log the failure and keep draining the mailbox (default).
    #[default]
    LogAndContinue,
    /// Stop the behaviour (transition to `shutdown`) on the first failure.
    Stop,
}

struct PubsubState {
    queue_name: String,
    routing_keys: Vec<String>,
    forward_task: Option<JoinHandle<()>>,
}

struct BehaviourInner {
    id: BehaviourId,
    agent: AgentHandle,
    state: Mutex<BehaviourState>,
    killed: AtomicBool,
    mailbox_tx: mpsc::UnboundedSender<Envelope>,
    mailbox_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    pubsub: Mutex<Option<PubsubState>>,
    error_policy: BehaviourErrorPolicy,
    registry: HandlerRegistry<Behaviour>,
    exposed_methods: HashMap<String, ExposedMethod>,
    run_task: Mutex<Option<JoinHandle<()>>>,
}

/// An agent's child unit of work: a mailbox plus a dispatch table,
/// optionally subscribed to pub-sub topics (§3, §4.2).
///
/// Cheap to clone, like [`Agent`] — every clone shares the same state.
#[derive(Clone)]
pub struct Behaviour {
    inner: Arc<BehaviourInner>,
}

impl Behaviour {
    /// This behaviour's identity (`"<agent-identity>.<class-name>"`).
    pub fn id(&self) -> &BehaviourId {
        &self.inner.id
    }

    /// This behaviour's current lifecycle state.
    pub fn state(&self) -> BehaviourState {
        *self.inner.state.lock()
    }

    /// Whether this behaviour has been permanently killed.
    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(AtomicOrdering::SeqCst)
    }

    fn transition(&self, from: &[BehaviourState], to: BehaviourState) -> Result<(), AgentError> {
        let mut state = self.inner.state.lock();
        if !from.contains(&state) {
            return Err(AgentError::InvalidTransition(format!(
                "cannot move '{}' from {state} to {to}",
                self.inner.id
            )));
        }
        *state = to;
        Ok(())
    }

    fn agent(&self) -> Result<Agent, AgentError> {
        self.inner.agent.upgrade().ok_or(AgentError::AgentGone)
    }

    /// Pushes `envelope` onto this behaviour's mailbox if it is currently
    /// running (§3 invariant 2: a behaviour may have mailbox entries only
    /// while `running`). Returns whether the message was accepted.
    pub(crate) fn enqueue(&self, envelope: Envelope) -> bool {
        self.state() == BehaviourState::Running && self.inner.mailbox_tx.send(envelope).is_ok()
    }

    /// Receives the next message, or `None` once the mailbox is closed.
    pub async fn receive(&self) -> Option<Envelope> {
        let mut guard = self.inner.mailbox_rx.lock().await;
        match guard.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Drains every message currently queued without waiting for more.
    pub async fn receive_all(&self) -> Vec<Envelope> {
        let mut guard = self.inner.mailbox_rx.lock().await;
        let Some(rx) = guard.as_mut() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            out.push(envelope);
        }
        out
    }

    /// Routes `envelope` through this behaviour's handler registry
    /// (§4.4).
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<(), crate::handler::HandlerError> {
        self.inner.registry.dispatch(self, envelope).await
    }

    /// Publishes `body` on the topic exchange, as this behaviour's owning
    /// agent.
    pub async fn publish(
        &self,
        routing_key: &str,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        self.agent()?.publish(routing_key, message_type, body, correlation_id).await
    }

    /// Sends `body` directly to `target`, as this behaviour's owning
    /// agent.
    pub async fn direct_send(
        &self,
        target: &str,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        self.agent()?.direct_send(target, message_type, body, correlation_id).await
    }

    /// Publishes `body` to the admin fanout exchange, as this behaviour's
    /// owning agent.
    pub async fn fanout_send(
        &self,
        message_type: MessageType,
        body: &SerializedObject,
        correlation_id: Option<CorrelationId>,
    ) -> Result<(), AgentError> {
        self.agent()?.fanout_send(message_type, body, correlation_id).await
    }

    /// Issues an RPC call as this behaviour's owning agent (§4.2.2).
    pub async fn rpc_call<P: crate::message::Payload>(
        &self,
        request: &P,
        target: Option<&str>,
    ) -> Result<crate::agent::RpcOutcome, AgentError> {
        Ok(self.agent()?.call(request, target).await)
    }

    /// Whether `method` is registered in this behaviour's exposed-method
    /// table (§4.2.2).
    pub(crate) fn has_exposed_method(&self, method: &str) -> bool {
        self.inner.exposed_methods.contains_key(method)
    }

    /// Invokes a registered exposed method by name (§4.2.2: "Provides
    /// `rpc_call(method, **kwargs)`; returns an error string if `method`
    /// is not registered"). Never returns a Rust `Err` the caller must
    /// match on — an unregistered method is itself the error string,
    /// mirroring the RPC boundary's own never-throws contract (§7).
    pub async fn call_exposed_method(&self, method: &str, kwargs: serde_json::Value) -> Result<serde_json::Value, String> {
        match self.inner.exposed_methods.get(method).cloned() {
            Some(handler) => handler(self, kwargs).await,
            None => Err(format!("method '{method}' is not registered")),
        }
    }

    async fn bind_pubsub(&self) -> Result<(), AgentError> {
        let routing_keys = {
            let guard = self.inner.pubsub.lock();
            guard.as_ref().map(|p| (p.queue_name.clone(), p.routing_keys.clone()))
        };
        let Some((queue_name, routing_keys)) = routing_keys else {
            return Ok(());
        };
        if routing_keys.is_empty() {
            return Ok(());
        }
        let agent = self.agent()?;
        let mut rx = agent.broker().declare_pubsub_queue(&queue_name, &routing_keys).await?;
        let mailbox_tx = self.inner.mailbox_tx.clone();
        let agent_for_trace = agent.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                agent_for_trace
                    .trace_store()
                    .append(TraceEvent::from_envelope(&envelope, false, Some("incoming".to_string())));
                if mailbox_tx.send(envelope).is_err() {
                    break;
                }
            }
        });
        if let Some(p) = self.inner.pubsub.lock().as_mut() {
            p.forward_task = Some(task);
        }
        Ok(())
    }

    async fn unbind_pubsub(&self) -> Result<(), AgentError> {
        let (queue_name, routing_keys, task) = {
            let mut guard = self.inner.pubsub.lock();
            let Some(p) = guard.as_mut() else {
                return Ok(());
            };
            (p.queue_name.clone(), p.routing_keys.clone(), p.forward_task.take())
        };
        if let Some(task) = task {
            task.abort();
        }
        if !routing_keys.is_empty() {
            let agent = self.agent()?;
            agent.broker().unbind_pubsub_queue(&queue_name, &routing_keys).await?;
            agent.broker().delete_pubsub_queue(&queue_name).await?;
        }
        Ok(())
    }

    async fn run_loop(self) {
        loop {
            let envelope = match self.receive().await {
                Some(e) => e,
                None => break,
            };
            if self.state() != BehaviourState::Running {
                break;
            }
            if let Err(e) = self.dispatch(&envelope).await {
                match self.inner.error_policy {
                    BehaviourErrorPolicy::LogAndContinue => {
                        error!(behaviour = %self.inner.id, error = %e, "handler failed; continuing");
                    }
                    BehaviourErrorPolicy::Stop => {
                        error!(behaviour = %self.inner.id, error = %e, "handler failed; stopping behaviour");
                        break;
                    }
                }
            }
        }
    }

    /// Starts the behaviour: binds its pub-sub queue (if configured) and
    /// begins draining its mailbox.
    pub async fn start(&self) -> Result<(), AgentError> {
        if self.is_killed() {
            return Err(AgentError::Killed(self.inner.id.to_string()));
        }
        self.transition(&[BehaviourState::Init], BehaviourState::Starting)?;
        self.bind_pubsub().await?;
        self.transition(&[BehaviourState::Starting], BehaviourState::Running)?;
        let task = tokio::spawn(self.clone().run_loop());
        *self.inner.run_task.lock() = Some(task);
        Ok(())
    }

    /// Stops the behaviour: unbinds its pub-sub queue and stops draining
    /// its mailbox.
    pub async fn stop(&self) -> Result<(), AgentError> {
        self.transition(&[BehaviourState::Running], BehaviourState::Stopping)?;
        if let Some(task) = self.inner.run_task.lock().take() {
            task.abort();
        }
        self.unbind_pubsub().await?;
        self.transition(&[BehaviourState::Stopping], BehaviourState::Shutdown)?;
        Ok(())
    }

    /// Resets a stopped behaviour back to `init`. Fails if the behaviour
    /// was killed.
    pub fn reset(&self) -> Result<(), AgentError> {
        if self.is_killed() {
            return Err(AgentError::Killed(self.inner.id.to_string()));
        }
        self.transition(&[BehaviourState::Shutdown], BehaviourState::Init)
    }

    /// Permanently kills the behaviour: it can no longer be started or
    /// reset.
    pub fn kill(&self) {
        self.inner.killed.store(true, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl Child for Behaviour {
    fn name(&self) -> String {
        self.inner.id.to_string()
    }

    async fn start(&self) -> Result<(), SupervisorError> {
        Behaviour::start(self).await.map_err(|e| SupervisorError::ChildStartFailed {
            name: self.inner.id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn stop(&self) -> Result<(), SupervisorError> {
        Behaviour::stop(self).await.map_err(|e| SupervisorError::ChildStopFailed {
            name: self.inner.id.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Fluent builder for [`Behaviour`], mirroring the teacher's
/// `SystemConfigBuilder` shape.
pub struct BehaviourBuilder {
    class_name: String,
    error_policy: BehaviourErrorPolicy,
    routing_keys: Vec<String>,
    registry: HandlerRegistry<Behaviour>,
    exposed_methods: HashMap<String, ExposedMethod>,
}

impl BehaviourBuilder {
    /// Starts building a behaviour named `class_name` (combined with its
    /// owning agent's identity to form the full [`BehaviourId`]).
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            error_policy: BehaviourErrorPolicy::default(),
            routing_keys: Vec::new(),
            registry: HandlerRegistry::new(),
            exposed_methods: HashMap::new(),
        }
    }

    /// Overrides the default handler-error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: BehaviourErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Subscribes the behaviour's pub-sub queue to `routing_key` (§4.2.1).
    #[must_use]
    pub fn with_pubsub_binding(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_keys.push(routing_key.into());
        self
    }

    /// Registers a handler for `message_type` in this behaviour's
    /// dispatch table (§4.4).
    #[must_use]
    pub fn with_handler(mut self, message_type: impl Into<String>, handler: HandlerFn<Behaviour>) -> Self {
        self.registry.register(message_type, handler);
        self
    }

    /// Registers `method` in this behaviour's RPC subsystem as an
    /// exposed method (§4.2.2, §9 "exposed-method discovery"), reachable
    /// by name via [`Behaviour::call_exposed_method`] and through the
    /// owning agent's RPC dispatch.
    #[must_use]
    pub fn with_exposed_method(mut self, name: impl Into<String>, method: ExposedMethod) -> Self {
        self.exposed_methods.insert(name.into(), method);
        self
    }

    /// Builds the behaviour, binding it to `agent` via a non-owning
    /// handle.
    pub fn build(self, agent: &Agent) -> Result<Behaviour, AgentError> {
        let id = agent.identity().behaviour_id(&self.class_name);
        let queue_name = format!("{id}.pubsub_queue");
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        Ok(Behaviour {
            inner: Arc::new(BehaviourInner {
                id,
                agent: agent.handle(),
                state: Mutex::new(BehaviourState::Init),
                killed: AtomicBool::new(false),
                mailbox_tx,
                mailbox_rx: AsyncMutex::new(Some(mailbox_rx)),
                pubsub: Mutex::new(Some(PubsubState {
                    queue_name,
                    routing_keys: self.routing_keys,
                    forward_task: None,
                })),
                error_policy: self.error_policy,
                registry: self.registry,
                exposed_methods: self.exposed_methods,
                run_task: Mutex::new(None),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBrokerChannel;
    use crate::clock::SystemClock;
    use crate::config::AgentConfig;
    use std::time::Duration;

    async fn test_agent(identity: &str) -> Agent {
        let config = AgentConfig::builder(identity, "amqp://localhost")
            .with_timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let broker = Arc::new(InMemoryBrokerChannel::new());
        let clock = Arc::new(SystemClock::new());
        let agent = Agent::new(config, broker, clock).unwrap();
        agent.start().await.unwrap();
        agent
    }

    #[tokio::test]
    async fn behaviour_lifecycle_round_trips_through_init() {
        let agent = test_agent("agent-behav-1").await;
        let behaviour = agent.add_behaviour(BehaviourBuilder::new("EchoBehaviour")).await.unwrap();
        assert_eq!(behaviour.state(), BehaviourState::Running);
        behaviour.stop().await.unwrap();
        assert_eq!(behaviour.state(), BehaviourState::Shutdown);
        behaviour.reset().unwrap();
        assert_eq!(behaviour.state(), BehaviourState::Init);
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn killed_behaviour_cannot_restart() {
        let agent = test_agent("agent-behav-2").await;
        let behaviour = agent.add_behaviour(BehaviourBuilder::new("EchoBehaviour")).await.unwrap();
        behaviour.stop().await.unwrap();
        behaviour.kill();
        assert!(behaviour.reset().is_err());
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn pubsub_delivery_reaches_the_run_loop() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let agent = test_agent("agent-behav-3").await;
        let seen = Arc::new(AtomicBool::new(false));
        let seen_in_handler = Arc::clone(&seen);
        let handler: HandlerFn<Behaviour> = Arc::new(move |_b: &Behaviour, _env: &Envelope| {
            let seen = Arc::clone(&seen_in_handler);
            Box::pin(async move {
                seen.store(true, Ordering::SeqCst);
                Ok(())
            })
        });
        let builder = BehaviourBuilder::new("TopicBehaviour")
            .with_pubsub_binding("demo.#")
            .with_handler("demo.one", handler);
        agent.add_behaviour(builder).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        agent
            .publish(
                "demo.one",
                MessageType::User("demo.one".to_string()),
                &SerializedObject::encode(&crate::message::payloads::Ping::default()).unwrap(),
                None,
            )
            .await
            .unwrap();

        let mut delivered = false;
        for _ in 0..20 {
            if seen.load(Ordering::SeqCst) {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(delivered, "pub-sub message never reached the behaviour's handler");
        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn exposed_method_dispatches_by_name() {
        let agent = test_agent("agent-behav-4").await;
        let double: ExposedMethod = Arc::new(|_b, kwargs| {
            Box::pin(async move {
                let n = kwargs.get("n").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok(serde_json::json!({ "n": n * 2 }))
            })
        });
        let behaviour = agent
            .add_behaviour(BehaviourBuilder::new("MathBehaviour").with_exposed_method("double", double))
            .await
            .unwrap();

        assert!(behaviour.has_exposed_method("double"));
        let result = behaviour.call_exposed_method("double", serde_json::json!({ "n": 21 })).await.unwrap();
        assert_eq!(result, serde_json::json!({ "n": 42 }));

        let err = behaviour.call_exposed_method("triple", serde_json::Value::Null).await.unwrap_err();
        assert_eq!(err, "method 'triple' is not registered");
        agent.stop().await.unwrap();
    }
}
