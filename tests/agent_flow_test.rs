mod helpers;

use helpers::{start_agent, test_config};
use persona::agent::{AgentEvent, AgentMessage, AgentState};
use persona::memory::MemoryType;
use tempfile::TempDir;

#[tokio::test]
async fn message_is_remembered_and_graphed() {
    let tmp = TempDir::new().unwrap();
    let agent = start_agent(test_config(tmp.path())).await;
    let mut events = agent.subscribe();

    let response = agent
        .process_text("Had lunch with Sarah Chen to discuss the Atlas roadmap")
        .await;
    assert_eq!(response.intent(), Some("general_conversation"));
    assert!(response.confidence > 0.0);
    assert_eq!(
        events.recv().await.unwrap(),
        AgentEvent::MessageProcessed {
            message_id: response.message_id.clone(),
            intent: "general_conversation".into(),
        }
    );

    let stats = agent.get_stats().await;
    assert_eq!(stats.counters.messages_processed, 1);
    assert_eq!(stats.counters.memories_created, 1);
    assert!(stats.knowledge_graph.unwrap().total_entities >= 1);

    let answer = agent.process_text("Who is Sarah Chen?").await;
    assert_eq!(answer.intent(), Some("knowledge_query"));
    assert!(answer.content.contains("Sarah Chen"), "got: {}", answer.content);
    assert_eq!(answer.sources, vec!["graphiti_kg"]);

    agent.shutdown().await;
    assert_eq!(agent.state(), AgentState::Shutdown);
}

#[tokio::test]
async fn memories_survive_restart() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());

    let first = start_agent(config.clone()).await;
    first
        .process_text("The quarterly budget review moved to Thursday")
        .await;
    first.shutdown().await;

    let second = start_agent(config).await;
    let found = second
        .memory()
        .search_memories("budget", &[MemoryType::Episodic], 5, 0.0)
        .await;
    assert_eq!(found.len(), 1);
    assert!(found[0].content.contains("quarterly budget"));
    second.shutdown().await;
}

#[tokio::test]
async fn transient_messages_skip_memory() {
    let tmp = TempDir::new().unwrap();
    let agent = start_agent(test_config(tmp.path())).await;

    let response = agent
        .process_message(AgentMessage::user("Quick ping from Dana Scully").without_memory())
        .await;
    assert!(response.confidence > 0.0);

    let stats = agent.get_stats().await;
    assert_eq!(stats.counters.messages_processed, 1);
    assert_eq!(stats.counters.memories_created, 0);
    assert_eq!(stats.knowledge_graph.unwrap().total_entities, 0);
    agent.shutdown().await;
}

#[tokio::test]
async fn queued_messages_are_processed() {
    let tmp = TempDir::new().unwrap();
    let agent = start_agent(test_config(tmp.path())).await;
    let mut events = agent.subscribe();

    let message = AgentMessage::user("Remember that the office closes early on Friday");
    let id = message.id.clone();
    agent.enqueue(message).await.unwrap();

    loop {
        if let AgentEvent::MessageProcessed { message_id, intent } = events.recv().await.unwrap() {
            assert_eq!(message_id, id);
            assert_eq!(intent, "memory_query");
            break;
        }
    }
    assert!(agent.cached_response(&id).is_some());
    agent.shutdown().await;
}

#[tokio::test]
async fn health_reports_disabled_protocols() {
    let tmp = TempDir::new().unwrap();
    let agent = start_agent(test_config(tmp.path())).await;

    let health = agent.health_check().await;
    assert_eq!(health.status, "healthy");
    assert_eq!(health.components["a2a"], "disabled");
    assert_eq!(health.components["mcp"], "disabled");
    assert_eq!(health.components["graphiti"], "healthy");
    assert_eq!(health.components["zep"], "disconnected");
    agent.shutdown().await;
}
