//! End-to-end generations through the relay with in-process backends

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use relay_core::{
    Broker, ChatMessage, ChatProvider, ChatRequest, FragmentStream, LlmBackend, MessageRole,
    ModelRegistry, RawParams, Relay, RelayConfig, StreamEnd,
};
use tokio::sync::oneshot;

/// Replies with fixed text and remembers every request it saw
#[derive(Default)]
struct RecordingBackend {
    requests: Mutex<Vec<ChatRequest>>,
}

#[async_trait]
impl LlmBackend for RecordingBackend {
    fn name(&self) -> &str {
        "Recording"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::Anthropic
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn stream_chat(&self, request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        self.requests.lock().push(request.clone());
        let reply = format!("reply {}", self.requests.lock().len());
        Ok(Box::pin(futures::stream::iter(vec![Ok(reply)])))
    }
}

/// Emits fragments with pauses between them
struct PacedBackend {
    script: Vec<(Duration, &'static str)>,
}

#[async_trait]
impl LlmBackend for PacedBackend {
    fn name(&self) -> &str {
        "Paced"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::Ollama
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        let script = self.script.clone();
        Ok(Box::pin(async_stream::stream! {
            for (pause, fragment) in script {
                tokio::time::sleep(pause).await;
                yield Ok(fragment.to_string());
            }
        }))
    }
}

/// Emits its fragments, reports that it ran dry, then stalls forever
struct StallingBackend {
    fragments: Vec<&'static str>,
    drained: Mutex<Option<oneshot::Sender<()>>>,
}

#[async_trait]
impl LlmBackend for StallingBackend {
    fn name(&self) -> &str {
        "Stalling"
    }

    fn provider(&self) -> ChatProvider {
        ChatProvider::Ollama
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn stream_chat(&self, _request: &ChatRequest) -> anyhow::Result<FragmentStream> {
        let fragments = self.fragments.clone();
        let drained = self.drained.lock().take();
        Ok(Box::pin(async_stream::stream! {
            for fragment in fragments {
                yield Ok::<_, anyhow::Error>(fragment.to_string());
            }
            if let Some(drained) = drained {
                let _ = drained.send(());
            }
            futures::future::pending::<()>().await;
        }))
    }
}

fn turns(broker: &Broker, channel: &str) -> Vec<(MessageRole, String)> {
    let mut out: Vec<(MessageRole, String)> = broker
        .snapshot(channel, None)
        .iter()
        .map(|e| (e.message().role, e.message().body.clone()))
        .collect();
    out.reverse();
    out
}

#[tokio::test]
async fn test_history_and_system_prompt_reach_the_provider() {
    let mut config = RelayConfig::default();
    config.system_prompt = Some("Be brief.".to_string());

    let backend = Arc::new(RecordingBackend::default());
    let relay = Relay::new(
        Broker::default(),
        config.model_registry(),
        config.relay_settings(),
    )
    .with_backend(backend.clone());

    let first = relay
        .ask("chat", "first question", "claude-3-5-haiku-latest", &RawParams::default())
        .unwrap();
    assert_eq!(first.join().await.unwrap().end, StreamEnd::Completed);

    let second = relay
        .ask("chat", "second question", "claude-3-5-haiku-latest", &RawParams::default())
        .unwrap();
    second.join().await.unwrap();

    let requests = backend.requests.lock().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].system.as_deref(), Some("Be brief."));
    assert_eq!(
        requests[1].messages,
        vec![
            ChatMessage::user("first question"),
            ChatMessage::assistant("reply 1"),
            ChatMessage::user("second question"),
        ]
    );

    // Terminators and empty bodies never reach the provider
    assert!(requests[1].messages.iter().all(|m| !m.content.is_empty()));
}

#[tokio::test]
async fn test_default_model_falls_back_to_configured_provider() {
    let config = RelayConfig::default();
    let backend = Arc::new(RecordingBackend::default());
    let relay = Relay::new(
        Broker::default(),
        config.model_registry(),
        config.relay_settings(),
    )
    .with_backend(backend.clone());

    let handle = relay.ask("chat", "hi", "", &RawParams::default()).unwrap();
    assert_eq!(handle.model(), "claude-3-5-haiku-latest");
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_stream_is_cut_by_the_time_trigger() {
    let config = RelayConfig::default();
    let relay = Relay::new(
        Broker::default(),
        ModelRegistry::empty().with_ollama_models(["llama3"]),
        config.relay_settings(),
    )
    .with_backend(Arc::new(PacedBackend {
        script: vec![
            (Duration::ZERO, "a"),
            (Duration::from_secs(1), "b"),
            (Duration::from_secs(6), "c"),
        ],
    }));

    let handle = relay
        .ask("slow", "go", "llama3", &RawParams::default())
        .unwrap();
    let summary = handle.join().await.unwrap();

    assert_eq!(summary.fragments, 3);
    assert_eq!(summary.end, StreamEnd::Completed);
    assert_eq!(
        turns(relay.broker(), "slow"),
        vec![
            (MessageRole::User, "go".to_string()),
            (MessageRole::Assistant, "ab".to_string()),
            (MessageRole::Assistant, "c".to_string()),
            (MessageRole::Assistant, String::new()),
        ]
    );
}

#[tokio::test]
async fn test_count_trigger_splits_long_streams() {
    let mut config = RelayConfig::default();
    config.batch.max_fragments = 2;

    let relay = Relay::new(
        Broker::default(),
        ModelRegistry::empty().with_ollama_models(["llama3"]),
        config.relay_settings(),
    )
    .with_backend(Arc::new(PacedBackend {
        script: ["1", "2", "3", "4", "5"]
            .into_iter()
            .map(|f| (Duration::ZERO, f))
            .collect(),
    }));

    let summary = relay
        .ask("count", "go", "llama3", &RawParams::default())
        .unwrap()
        .join()
        .await
        .unwrap();
    assert_eq!(summary.batches, 3);

    let bodies: Vec<String> = turns(relay.broker(), "count")
        .into_iter()
        .skip(1)
        .map(|(_, body)| body)
        .collect();
    assert_eq!(bodies, ["12", "34", "5", ""]);
}

#[tokio::test]
async fn test_cancel_mid_stream_flushes_queued_fragments_then_terminates() {
    let (drained_tx, drained_rx) = oneshot::channel();
    let relay = Relay::new(
        Broker::default(),
        ModelRegistry::empty().with_ollama_models(["llama3"]),
        RelayConfig::default().relay_settings(),
    )
    .with_backend(Arc::new(StallingBackend {
        fragments: vec!["Hel", "lo", " there"],
        drained: Mutex::new(Some(drained_tx)),
    }));

    let handle = relay
        .ask("midway", "go", "llama3", &RawParams::default())
        .unwrap();

    // All three fragments are queued and the provider is now stalled
    tokio::time::timeout(Duration::from_secs(5), drained_rx)
        .await
        .unwrap()
        .unwrap();
    handle.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.end, StreamEnd::Cancelled);
    assert_eq!(summary.fragments, 3);
    assert_eq!(summary.batches, 1);

    let turns = turns(relay.broker(), "midway");
    assert_eq!(
        turns,
        vec![
            (MessageRole::User, "go".to_string()),
            (MessageRole::Assistant, "Hello there".to_string()),
            (MessageRole::Assistant, String::new()),
        ]
    );
    let terminators = turns.iter().filter(|(_, body)| body.is_empty()).count();
    assert_eq!(terminators, 1);
}
