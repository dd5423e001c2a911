//! Orchestration smoke test — debate, lifecycle, and intervention
//! layers sharing one dry-run router, observed through the event bus
//! and the dispatch ledger.

use agent_gateway::channel::{ActuationChannel, ChannelRegistry};
use agent_gateway::config::GatewayConfig;
use agent_gateway::debate::{DebateConfig, DebateEngine, DebateOutcome, DebatePhase, VoteChoice};
use agent_gateway::directory::RecipientDirectory;
use agent_gateway::events::GatewayEvent;
use agent_gateway::intervention::{
    HealthSnapshot, InterventionAction, InterventionManager, InterventionProtocol,
    TriggerCondition,
};
use agent_gateway::lifecycle::{AgentPhase, LifecycleCoordinator};
use agent_gateway::message::ChannelKind;
use agent_gateway::retry::BackoffPolicy;
use agent_gateway::router::MessageRouter;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const AGENTS: [&str; 3] = ["Agent-1", "Agent-2", "Agent-3"];

fn shared_router() -> Arc<MessageRouter> {
    let dir = tempfile::tempdir().unwrap();
    let mut entries = Vec::new();
    for (i, name) in AGENTS.iter().enumerate() {
        entries.push(format!(
            r#""{name}": {{
                "chat_input_coordinates": [{}, {}],
                "onboarding_coordinates": [5, 5],
                "window_title": "{name} Console",
                "fallback_channels": ["actuation"]
            }}"#,
            100 + i,
            200 + i,
        ));
    }
    let roster_path = dir.path().join("roster.json");
    let mut file = std::fs::File::create(&roster_path).unwrap();
    write!(file, "{{ {} }}", entries.join(", ")).unwrap();

    let directory =
        Arc::new(RecipientDirectory::load(&roster_path, ChannelKind::all()).unwrap());
    let mut registry = ChannelRegistry::new();
    registry.register(Arc::new(ActuationChannel::new(true)));
    let policy = BackoffPolicy {
        base: Duration::from_millis(1),
        factor: 2,
        cap: Duration::from_millis(4),
        max_attempts_per_channel: 5,
    };
    Arc::new(MessageRouter::with_policy(
        directory,
        Arc::new(registry),
        &GatewayConfig::default(),
        policy,
    ))
}

fn participants() -> BTreeSet<String> {
    AGENTS.iter().map(|s| s.to_string()).collect()
}

fn drain_event_types(
    receiver: &mut tokio::sync::broadcast::Receiver<GatewayEvent>,
) -> Vec<&'static str> {
    let mut types = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        types.push(event.event_type());
    }
    types
}

// ── Debate over a live router ──────────────────────────────────────

#[tokio::test]
async fn test_debate_full_round_trip() {
    let router = shared_router();
    let mut events = router.bus().subscribe();
    let engine = DebateEngine::new(Arc::clone(&router), DebateConfig::default());

    let id = engine
        .open_session("promote Agent-2 to coordinator", "Agent-1", participants())
        .await
        .unwrap();

    // Opening announced the session to all three participants.
    assert_eq!(router.ledger().summary().sent, 3);

    engine.submit_vote(&id, "Agent-1", VoteChoice::Yes).await.unwrap();
    engine.submit_vote(&id, "Agent-2", VoteChoice::Yes).await.unwrap();
    let outcome = engine
        .submit_vote(&id, "Agent-3", VoteChoice::No)
        .await
        .unwrap();
    assert_eq!(outcome, Some(DebateOutcome::Accepted));

    let session = engine.session(&id).await.unwrap();
    assert_eq!(session.phase, DebatePhase::Resolved);
    // Outcome announcement went out on top of the opening broadcast.
    assert!(router.ledger().summary().total() >= 6);

    let types = drain_event_types(&mut events);
    assert!(types.contains(&"debate_closed"));
    assert!(types.contains(&"dispatched"));
}

#[tokio::test]
async fn test_debate_deadline_abort_round_trip() {
    let router = shared_router();
    let config = DebateConfig {
        voting_window_secs: 0,
        ..DebateConfig::default()
    };
    let engine = DebateEngine::new(Arc::clone(&router), config);

    let id = engine
        .open_session("nobody cares", "Agent-1", participants())
        .await
        .unwrap();
    let closed = engine.poll_deadlines(Utc::now()).await.unwrap();
    assert_eq!(closed, vec![id.clone()]);

    let session = engine.session(&id).await.unwrap();
    assert_eq!(session.phase, DebatePhase::Aborted);
    assert_eq!(session.outcome, None);
    assert!(engine.open_sessions().await.is_empty());
}

// ── Lifecycle driving phase events ─────────────────────────────────

#[tokio::test]
async fn test_lifecycle_transitions_publish_events() {
    let router = shared_router();
    let mut events = router.bus().subscribe();
    let coord = LifecycleCoordinator::new(
        Arc::clone(&router),
        Duration::from_secs(600),
        Duration::from_secs(60),
    );

    coord.register("Agent-1").await;
    coord.transition("Agent-1", AgentPhase::Observe).await.unwrap();
    coord.transition("Agent-1", AgentPhase::Debate).await.unwrap();

    let types = drain_event_types(&mut events);
    assert_eq!(
        types.iter().filter(|t| **t == "phase_changed").count(),
        2
    );

    // An illegal move publishes nothing and changes nothing.
    assert!(coord
        .transition("Agent-1", AgentPhase::Terminated)
        .await
        .is_err());
    assert!(drain_event_types(&mut events).is_empty());
    let record = coord.record("Agent-1").await.unwrap();
    assert_eq!(record.phase, AgentPhase::Debate);
}

#[tokio::test]
async fn test_idle_nudges_flow_through_router() {
    let router = shared_router();
    let coord = LifecycleCoordinator::new(
        Arc::clone(&router),
        Duration::from_secs(0),
        Duration::from_secs(60),
    );
    for agent in AGENTS {
        coord.register(agent).await;
    }
    // Agent-2 is active; only the idle two get nudged.
    coord.transition("Agent-2", AgentPhase::Observe).await.unwrap();

    let nudges = coord.poll_idle(Utc::now()).await.unwrap();
    assert_eq!(nudges.len(), 2);
    assert!(nudges.iter().all(|n| n.is_sent()));
    assert_eq!(router.ledger().for_recipient("Agent-2").len(), 0);
}

// ── Intervention firing through the router ─────────────────────────

#[tokio::test]
async fn test_intervention_alert_reaches_whole_roster_once() {
    let router = shared_router();
    let mut events = router.bus().subscribe();
    let manager = InterventionManager::new(Arc::clone(&router), vec![]);
    manager
        .register(InterventionProtocol::new(
            "dispatch-failure-spike",
            TriggerCondition::MetricAbove {
                metric: "failed_dispatch_rate".to_string(),
                threshold: 0.25,
            },
            InterventionAction::BroadcastAlert {
                body: "Dispatch failures spiking, check channel health".to_string(),
            },
            300,
        ))
        .await;

    let mut metrics = HashMap::new();
    metrics.insert("failed_dispatch_rate".to_string(), 0.4);
    let snapshot = HealthSnapshot::new(metrics);

    let fired = manager.observe(&snapshot).await.unwrap();
    assert_eq!(fired.len(), 1);
    assert_eq!(router.ledger().summary().sent, 3);

    // Still bad one second later: cooldown holds, nothing new goes out.
    let fired = manager.observe(&snapshot).await.unwrap();
    assert!(fired.is_empty());
    assert_eq!(router.ledger().summary().total(), 3);

    let types = drain_event_types(&mut events);
    assert_eq!(
        types.iter().filter(|t| **t == "protocol_fired").count(),
        1
    );
}

// ── Layers interleaved on one router ───────────────────────────────

#[tokio::test]
async fn test_layers_share_one_ledger() {
    let router = shared_router();
    let engine = DebateEngine::new(Arc::clone(&router), DebateConfig::default());
    let coord = LifecycleCoordinator::new(
        Arc::clone(&router),
        Duration::from_secs(0),
        Duration::from_secs(60),
    );

    coord.register("Agent-3").await;
    coord.poll_idle(Utc::now()).await.unwrap();
    engine
        .open_session("interleaved traffic", "Agent-1", participants())
        .await
        .unwrap();

    // One nudge plus three debate announcements, all audited in order.
    let summary = router.ledger().summary();
    assert_eq!(summary.sent, 4);
    assert_eq!(router.ledger().for_recipient("Agent-3").len(), 2);
}
