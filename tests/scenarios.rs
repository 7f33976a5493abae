//! End-to-end scenario tests exercising complete agents wired together over
//! the in-process [`InMemoryBrokerChannel`] test double, covering the
//! direct/fanout/topic message planes, RPC, and presence.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use agentrt::agent::{Agent, AgentState, RpcOutcome};
use agentrt::behaviour::BehaviourBuilder;
use agentrt::broker::InMemoryBrokerChannel;
use agentrt::clock::SystemClock;
use agentrt::config::AgentConfig;
use agentrt::message::payloads::{BehaviourCommand, ManageBehav, Ping, Pong};
use agentrt::message::{MessageType, SerializedObject};

async fn agent_on(broker: &Arc<InMemoryBrokerChannel>, identity: &str) -> Agent {
    let config = AgentConfig::builder(identity, "amqp://localhost")
        .with_timeout(Duration::from_millis(300))
        .with_update_peer_interval(Duration::from_secs(60))
        .build()
        .unwrap();
    let clock = Arc::new(SystemClock::new());
    let agent = Agent::new(config, broker.clone(), clock).unwrap();
    agent.start().await.unwrap();
    agent
}

async fn poll_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}

/// S1 — Direct loopback: a message an agent sends to itself lands exactly
/// once in its own "incoming" trace.
#[tokio::test]
async fn s1_direct_loopback_traces_once() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let core1 = agent_on(&broker, "core1").await;

    let body = SerializedObject::encode(&Ping::default()).unwrap();
    core1
        .direct_send("core1", MessageType::User("type".to_string()), &body, None)
        .await
        .unwrap();

    let found = poll_until(
        || {
            core1
                .trace_store()
                .filter(None, None, Some("incoming"))
                .iter()
                .any(|e| e.body.contains("\"ping\":\"ping\""))
        },
        Duration::from_millis(100),
    )
    .await;
    assert!(found, "expected one matching entry in the incoming trace");

    let matches = core1.trace_store().filter(None, None, Some("incoming"));
    let hallo_matches: Vec<_> = matches.iter().filter(|e| e.body.contains("\"ping\":\"ping\"")).collect();
    assert_eq!(hallo_matches.len(), 1);

    core1.stop().await.unwrap();
}

/// S2 — Fanout broadcast reaches every connected agent's trace.
#[tokio::test]
async fn s2_fanout_reaches_every_agent() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let ctrl = agent_on(&broker, "ctrl").await;
    let core1 = agent_on(&broker, "core1").await;
    let core2 = agent_on(&broker, "core2").await;

    let body = SerializedObject::encode(&Ping::default()).unwrap();
    ctrl.fanout_send(MessageType::User("broadcast".to_string()), &body, None)
        .await
        .unwrap();

    for agent in [&ctrl, &core1, &core2] {
        let found = poll_until(
            || {
                agent
                    .trace_store()
                    .filter(None, None, Some("incoming"))
                    .iter()
                    .any(|e| e.body.contains("\"ping\":\"ping\""))
            },
            Duration::from_millis(200),
        )
        .await;
        assert!(found, "agent '{}' never saw the fanout broadcast", agent.identity());
    }

    ctrl.stop().await.unwrap();
    core1.stop().await.unwrap();
    core2.stop().await.unwrap();
}

/// S3 — Topic pub-sub: a behaviour bound to `["x.y","x.z","a.#"]` receives
/// exactly the three matching publishes, and is never delivered `"b.y"`.
#[tokio::test]
async fn s3_topic_pubsub_filters_by_binding() {
    use agentrt::handler::HandlerFn;
    use agentrt::message::Envelope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let broker = Arc::new(InMemoryBrokerChannel::new());
    let agent = agent_on(&broker, "topic-agent").await;

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let catch_all: HandlerFn<agentrt::behaviour::Behaviour> = Arc::new(move |_b, _env: &Envelope| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    });

    let builder = BehaviourBuilder::new("TopicBehaviour")
        .with_pubsub_binding("x.y")
        .with_pubsub_binding("x.z")
        .with_pubsub_binding("a.#")
        .with_handler("x.y", Arc::clone(&catch_all))
        .with_handler("x.z", Arc::clone(&catch_all))
        .with_handler("a.x", Arc::clone(&catch_all));
    agent.add_behaviour(builder).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;

    let body = SerializedObject::encode(&Ping::default()).unwrap();
    for key in ["a.x", "x.y", "x.z", "b.y"] {
        agent
            .publish(key, MessageType::User(key.to_string()), &body, None)
            .await
            .unwrap();
    }

    let delivered = poll_until(|| received.load(Ordering::SeqCst) >= 3, Duration::from_millis(200)).await;
    assert!(delivered, "expected 3 deliveries, saw {}", received.load(Ordering::SeqCst));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(received.load(Ordering::SeqCst), 3, "'b.y' must not be delivered");

    agent.stop().await.unwrap();
}

/// S4 — RPC ping to self returns a pong within the configured timeout.
#[tokio::test]
async fn s4_rpc_ping_returns_pong() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let agent = agent_on(&broker, "rpc-ping").await;

    match agent.call(&Ping::default(), None).await {
        RpcOutcome::Ok(body) => {
            let pong: Pong = body.decode().unwrap();
            assert_eq!(pong, Pong::default());
        }
        RpcOutcome::Err(e) => panic!("expected Pong, got RpcError: {}", e.error),
    }

    agent.stop().await.unwrap();
}

/// S5 — RPC to a non-existent target times out, returning an `RpcError`
/// whose message names the timeout, and leaves no dangling correlation
/// entry.
#[tokio::test]
async fn s5_rpc_to_missing_target_times_out() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let config = AgentConfig::builder("rpc-timeout", "amqp://localhost")
        .with_timeout(Duration::from_millis(100))
        .with_update_peer_interval(Duration::from_secs(60))
        .build()
        .unwrap();
    let clock = Arc::new(SystemClock::new());
    let agent = Agent::new(config, broker, clock).unwrap();
    agent.start().await.unwrap();

    match agent.call(&Ping::default(), Some("non-existing")).await {
        RpcOutcome::Err(e) => assert!(e.error.contains("TimeoutError"), "unexpected error: {}", e.error),
        RpcOutcome::Ok(_) => panic!("expected a timeout error"),
    }

    agent.stop().await.unwrap();
}

/// S6 — `ManageBehav` stop/start round-trips a behaviour through `init`
/// back to `running`.
#[tokio::test]
async fn s6_manage_behav_stop_then_start() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let agent = agent_on(&broker, "manage-behav").await;
    let behaviour = agent
        .add_behaviour(BehaviourBuilder::new("Behaviour"))
        .await
        .unwrap();
    assert_eq!(behaviour.state(), agentrt::behaviour::BehaviourState::Running);

    let stop_request = ManageBehav {
        behav: Some("Behaviour".to_string()),
        command: Some(BehaviourCommand::Stop),
        result: String::new(),
    };
    let outcome = agent.call(&stop_request, None).await;
    let RpcOutcome::Ok(body) = outcome else {
        panic!("expected a ManageBehav reply");
    };
    let reply: ManageBehav = body.decode().unwrap();
    assert!(reply.result.contains("init"), "unexpected result: {}", reply.result);
    assert_eq!(behaviour.state(), agentrt::behaviour::BehaviourState::Init);

    let start_request = ManageBehav {
        behav: Some("Behaviour".to_string()),
        command: Some(BehaviourCommand::Start),
        result: String::new(),
    };
    let outcome = agent.call(&start_request, None).await;
    let RpcOutcome::Ok(body) = outcome else {
        panic!("expected a ManageBehav reply");
    };
    let reply: ManageBehav = body.decode().unwrap();
    assert!(reply.result.contains("started"), "unexpected result: {}", reply.result);
    assert_eq!(behaviour.state(), agentrt::behaviour::BehaviourState::Running);

    agent.stop().await.unwrap();
}

/// S7 — Presence: with a short re-ping interval, two agents started
/// together discover each other within a few rounds.
#[tokio::test]
async fn s7_presence_discovers_peers() {
    let broker = Arc::new(InMemoryBrokerChannel::new());

    let ctrl_config = AgentConfig::builder("ctrl", "amqp://localhost")
        .with_timeout(Duration::from_millis(300))
        .with_update_peer_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let core1_config = AgentConfig::builder("core1", "amqp://localhost")
        .with_timeout(Duration::from_millis(300))
        .with_update_peer_interval(Duration::from_millis(100))
        .build()
        .unwrap();

    let ctrl = Agent::new(ctrl_config, broker.clone(), Arc::new(SystemClock::new())).unwrap();
    let core1 = Agent::new(core1_config, broker.clone(), Arc::new(SystemClock::new())).unwrap();
    ctrl.start().await.unwrap();
    core1.start().await.unwrap();

    let found = poll_until(
        || {
            let mut identities: Vec<String> = ctrl.list_peers().into_iter().map(|p| p.identity).collect();
            identities.sort();
            identities == vec!["core1".to_string(), "ctrl".to_string()]
        },
        Duration::from_millis(400),
    )
    .await;
    assert!(found, "ctrl never discovered both itself and core1 as peers");

    ctrl.stop().await.unwrap();
    core1.stop().await.unwrap();
}

/// S1 variant — the trace store's `received` view only ever contains
/// entries this agent did not itself send.
#[tokio::test]
async fn loopback_trace_entry_is_marked_received() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let agent = agent_on(&broker, "received-marker").await;

    let body = SerializedObject::encode(&Ping::default()).unwrap();
    agent
        .direct_send("received-marker", MessageType::User("type".to_string()), &body, None)
        .await
        .unwrap();

    let found = poll_until(
        || {
            agent
                .trace_store()
                .received(None)
                .iter()
                .any(|e| e.body.contains("\"ping\":\"ping\""))
        },
        Duration::from_millis(100),
    )
    .await;
    assert!(found);

    agent.stop().await.unwrap();
}

/// Identity exclusivity (§3 invariant 1, §8 property 5): a second agent
/// cannot claim an identity already bound to a running agent's direct
/// queue.
#[tokio::test]
async fn identity_conflict_prevents_duplicate_start() {
    let broker = Arc::new(InMemoryBrokerChannel::new());
    let first = agent_on(&broker, "duplicate").await;

    let config = AgentConfig::builder("duplicate", "amqp://localhost").build().unwrap();
    let second = Agent::new(config, broker.clone(), Arc::new(SystemClock::new())).unwrap();
    let result = second.start().await;
    assert!(result.is_err(), "second agent with the same identity must fail to start");
    assert_eq!(second.state(), AgentState::Starting);

    first.stop().await.unwrap();
}

/// Mailbox FIFO (§8 property 4): messages sent directly to a behaviour's
/// owning agent and fanned out to its mailbox arrive in send order.
#[tokio::test]
async fn mailbox_preserves_fifo_order() {
    use agentrt::message::Envelope;

    let broker = Arc::new(InMemoryBrokerChannel::new());
    let agent = agent_on(&broker, "fifo-agent").await;

    let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let seen_in_handler = Arc::clone(&seen);
    let handler: agentrt::handler::HandlerFn<agentrt::behaviour::Behaviour> = Arc::new(move |_b, env: &Envelope| {
        let seen = Arc::clone(&seen_in_handler);
        let body: SerializedObject = serde_json::from_slice(&env.body).unwrap();
        Box::pin(async move {
            seen.lock().push(body.c_data);
            Ok(())
        })
    });

    let builder = BehaviourBuilder::new("FifoBehaviour").with_handler("sequence", handler);
    agent.add_behaviour(builder).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    for i in 0..5 {
        let body = SerializedObject {
            c_type: "Seq".to_string(),
            c_data: i.to_string(),
        };
        agent
            .direct_send("fifo-agent", MessageType::User("sequence".to_string()), &body, None)
            .await
            .unwrap();
    }

    let complete = poll_until(|| seen.lock().len() == 5, Duration::from_millis(200)).await;
    assert!(complete, "expected 5 messages, saw {}", seen.lock().len());
    assert_eq!(*seen.lock(), vec!["0", "1", "2", "3", "4"]);

    agent.stop().await.unwrap();
}
