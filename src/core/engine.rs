//! Conversation orchestration
//!
//! The ChatEngine is the core of the playground. Per accepted user turn it:
//! 1. Appends the user turn and a pending assistant turn
//! 2. Optionally asks for thinking steps and attaches them to the turn
//! 3. Suspends until the reveal animation signals completion
//! 4. Streams the final answer, republishing the text after every fragment
//! 5. Replaces the turn with a failure notice on any provider error
//!
//! One logical turn is in flight per panel at a time; the busy flag gates
//! `submit` and clears on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::config::prompts;
use crate::conversation::{Conversation, Speaker};
use crate::providers::{
    self, ChatSession, InferenceClient, ProviderError,
};

use super::accumulator::StreamingAccumulator;
use super::reveal::RevealAnimation;
use super::thinking::ThinkingStepGenerator;

/// Shown in place of an answer when a turn fails.
pub const ERROR_NOTICE: &str = "An error occurred.";

/// Upper bound on a submitted prompt, enforced at the service boundary.
pub const MAX_PROMPT_CHARS: usize = 200_000;

const EVENT_CAPACITY: usize = 256;

/// The two side-by-side chat panels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PanelId {
    A,
    B,
}

impl PanelId {
    pub fn label(&self) -> &'static str {
        match self {
            PanelId::A => "A",
            PanelId::B => "B",
        }
    }
}

impl std::str::FromStr for PanelId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" | "a" => Ok(PanelId::A),
            "B" | "b" => Ok(PanelId::B),
            other => Err(ChatError::UnknownPanel(other.to_string())),
        }
    }
}

/// Errors from the chat engine
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("Prompt exceeds {MAX_PROMPT_CHARS} characters")]
    PromptTooLong,

    #[error("A turn is already in flight")]
    TurnInFlight,

    #[error("Unknown panel: {0}")]
    UnknownPanel(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// State changes published to the presentation layer. Each reveal or fragment
/// event doubles as a request to scroll the hosting view to its latest
/// content.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    TurnAppended { turn: u64, speaker: Speaker },
    ThinkingAttached { turn: u64, steps: Vec<String> },
    RevealProgress { turn: u64, display: Vec<String> },
    FragmentAppended { turn: u64, text: String },
    TurnCompleted { turn: u64 },
    TurnFailed { turn: u64 },
    ConversationReset { greeting: String },
}

/// Returned by `submit` once the turn pair has been appended; the answer
/// itself arrives through events and state snapshots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubmitReceipt {
    pub user_turn: u64,
    pub assistant_turn: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PanelSnapshot {
    pub panel: PanelId,
    pub model: String,
    pub thinking_mode: bool,
    pub busy: bool,
    pub conversation: Conversation,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaygroundSnapshot {
    pub compare_mode: bool,
    pub panels: Vec<PanelSnapshot>,
}

/// One-shot resolvers keyed by turn id, used by the reveal task to signal the
/// suspended pipeline. At most one live entry per turn; `notify` removes the
/// entry as it fires, and the pipeline removes defensively after resuming.
/// Dropping a sender (panel reset) wakes the waiter with a closed-channel
/// error instead of leaking the suspended turn.
#[derive(Default)]
struct AnimationNotifiers {
    inner: Mutex<HashMap<u64, oneshot::Sender<()>>>,
}

impl AnimationNotifiers {
    fn register(&self, turn: u64) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .expect("notifier lock poisoned")
            .insert(turn, tx);
        rx
    }

    fn notify(&self, turn: u64) {
        if let Some(tx) = self.inner.lock().expect("notifier lock poisoned").remove(&turn) {
            let _ = tx.send(());
        }
    }

    fn remove(&self, turn: u64) {
        self.inner.lock().expect("notifier lock poisoned").remove(&turn);
    }

    fn clear(&self) {
        self.inner.lock().expect("notifier lock poisoned").clear();
    }
}

enum TurnOutcome {
    Completed,
    /// The panel was reset while the turn was suspended; the turn is gone.
    Cancelled,
}

/// Per-panel conversation state and in-flight bookkeeping.
struct ChatPanel {
    id: PanelId,
    conversation: Mutex<Conversation>,
    model: Mutex<String>,
    thinking_mode: AtomicBool,
    busy: AtomicBool,
    /// Persistent session for the non-thinking path; thinking turns open a
    /// fresh session carrying the revealed plan.
    session: tokio::sync::Mutex<Box<dyn ChatSession>>,
    notifiers: AnimationNotifiers,
    reveal_tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_turn_id: AtomicU64,
    events: broadcast::Sender<PanelEvent>,
}

impl ChatPanel {
    async fn bootstrap(
        id: PanelId,
        client: &Arc<dyn InferenceClient>,
    ) -> Result<Self, ProviderError> {
        let model = providers::default_model();
        let session = client
            .start_session(model, Some(prompts::BASE_SYSTEM_INSTRUCTION))
            .await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let next_turn_id = AtomicU64::new(1);
        let greeting = format!(
            "Model {} ready. Default model is {}.",
            id.label(),
            model
        );
        let conversation = Conversation::with_greeting(next_turn_id.fetch_add(1, Ordering::Relaxed), &greeting);

        Ok(Self {
            id,
            conversation: Mutex::new(conversation),
            model: Mutex::new(model.to_string()),
            thinking_mode: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            session: tokio::sync::Mutex::new(session),
            notifiers: AnimationNotifiers::default(),
            reveal_tasks: Mutex::new(HashMap::new()),
            next_turn_id,
            events,
        })
    }

    fn next_id(&self) -> u64 {
        self.next_turn_id.fetch_add(1, Ordering::Relaxed)
    }

    fn emit(&self, event: PanelEvent) {
        // Nobody listening is fine; a lagging listener misses frames rather
        // than blocking the pipeline.
        let _ = self.events.send(event);
    }

    fn conversation(&self) -> std::sync::MutexGuard<'_, Conversation> {
        self.conversation.lock().expect("conversation lock poisoned")
    }

    fn current_model(&self) -> String {
        self.model.lock().expect("model lock poisoned").clone()
    }

    /// Abort scheduled reveal ticks and drop pending resolvers. Suspended
    /// pipelines observe the closed channel and stop; in-flight remote
    /// requests are not aborted.
    fn cancel_inflight(&self) {
        for (_, handle) in self
            .reveal_tasks
            .lock()
            .expect("reveal task lock poisoned")
            .drain()
        {
            handle.abort();
        }
        self.notifiers.clear();
    }

    fn snapshot(&self) -> PanelSnapshot {
        PanelSnapshot {
            panel: self.id,
            model: self.current_model(),
            thinking_mode: self.thinking_mode.load(Ordering::Acquire),
            busy: self.busy.load(Ordering::Acquire),
            conversation: self.conversation().clone(),
        }
    }
}

/// The conversation orchestrator: two panels over one inference client.
pub struct ChatEngine {
    client: Arc<dyn InferenceClient>,
    thinking: ThinkingStepGenerator,
    panels: [Arc<ChatPanel>; 2],
    compare_mode: AtomicBool,
}

impl ChatEngine {
    pub async fn new(client: Arc<dyn InferenceClient>) -> Result<Self, ProviderError> {
        let panel_a = ChatPanel::bootstrap(PanelId::A, &client).await?;
        let panel_b = ChatPanel::bootstrap(PanelId::B, &client).await?;

        Ok(Self {
            thinking: ThinkingStepGenerator::new(Arc::clone(&client)),
            client,
            panels: [Arc::new(panel_a), Arc::new(panel_b)],
            compare_mode: AtomicBool::new(false),
        })
    }

    fn panel(&self, id: PanelId) -> &Arc<ChatPanel> {
        match id {
            PanelId::A => &self.panels[0],
            PanelId::B => &self.panels[1],
        }
    }

    /// Subscribe to a panel's state-change events.
    pub fn subscribe(&self, id: PanelId) -> broadcast::Receiver<PanelEvent> {
        self.panel(id).events.subscribe()
    }

    pub fn panel_snapshot(&self, id: PanelId) -> PanelSnapshot {
        self.panel(id).snapshot()
    }

    pub fn snapshot(&self) -> PlaygroundSnapshot {
        let compare_mode = self.compare_mode.load(Ordering::Acquire);
        let mut panels = vec![self.panel(PanelId::A).snapshot()];
        if compare_mode {
            panels.push(self.panel(PanelId::B).snapshot());
        }
        PlaygroundSnapshot {
            compare_mode,
            panels,
        }
    }

    /// Accept one user turn. Appends the user and pending assistant turns and
    /// drives the rest of the turn in the background; rejections leave the
    /// conversation untouched.
    pub async fn submit(
        self: &Arc<Self>,
        panel_id: PanelId,
        user_text: &str,
    ) -> Result<SubmitReceipt, ChatError> {
        if user_text.trim().is_empty() {
            return Err(ChatError::EmptyPrompt);
        }
        if user_text.chars().count() > MAX_PROMPT_CHARS {
            return Err(ChatError::PromptTooLong);
        }

        let panel = self.panel(panel_id);
        panel
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ChatError::TurnInFlight)?;

        let user_turn = panel.next_id();
        let assistant_turn = panel.next_id();
        {
            let mut conversation = panel.conversation();
            conversation.push_user(user_turn, user_text);
            conversation.push_pending_assistant(assistant_turn);
        }
        panel.emit(PanelEvent::TurnAppended {
            turn: user_turn,
            speaker: Speaker::User,
        });
        panel.emit(PanelEvent::TurnAppended {
            turn: assistant_turn,
            speaker: Speaker::Assistant,
        });

        let engine = Arc::clone(self);
        let text = user_text.to_string();
        tokio::spawn(async move {
            let panel = Arc::clone(engine.panel(panel_id));
            match engine.run_turn(panel_id, assistant_turn, &text).await {
                Ok(TurnOutcome::Completed) => {
                    panel.emit(PanelEvent::TurnCompleted {
                        turn: assistant_turn,
                    });
                }
                Ok(TurnOutcome::Cancelled) => {
                    tracing::debug!(panel = panel.id.label(), turn = assistant_turn, "turn cancelled by reset");
                }
                Err(err) => {
                    tracing::error!(panel = panel.id.label(), turn = assistant_turn, error = %err, "turn failed");
                    panel.conversation().fail(assistant_turn, ERROR_NOTICE);
                    panel.emit(PanelEvent::TurnFailed {
                        turn: assistant_turn,
                    });
                }
            }
            panel.busy.store(false, Ordering::Release);
        });

        Ok(SubmitReceipt {
            user_turn,
            assistant_turn,
        })
    }

    async fn run_turn(
        &self,
        panel_id: PanelId,
        turn: u64,
        user_text: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let panel = self.panel(panel_id);
        if panel.thinking_mode.load(Ordering::Acquire) {
            self.run_thinking_turn(panel, turn, user_text).await
        } else {
            self.run_plain_turn(panel, turn, user_text).await
        }
    }

    /// Stream the answer on the panel's persistent session.
    async fn run_plain_turn(
        &self,
        panel: &Arc<ChatPanel>,
        turn: u64,
        user_text: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let stream = {
            let session = panel.session.lock().await;
            session.send_streaming(user_text).await?
        };
        self.stream_answer(panel, turn, stream).await?;
        Ok(TurnOutcome::Completed)
    }

    /// Thinking phase, reveal handshake, then the final streamed answer on a
    /// fresh session carrying the revealed plan as reference-only context.
    async fn run_thinking_turn(
        &self,
        panel: &Arc<ChatPanel>,
        turn: u64,
        user_text: &str,
    ) -> Result<TurnOutcome, ChatError> {
        let steps = self.thinking.generate(user_text).await?;

        let done = panel.notifiers.register(turn);
        panel.conversation().set_thinking_steps(turn, steps.clone());
        panel.emit(PanelEvent::ThinkingAttached {
            turn,
            steps: steps.clone(),
        });

        let reveal_panel = Arc::clone(panel);
        let reveal_steps = steps.clone();
        let handle = tokio::spawn(async move {
            let mut animation = RevealAnimation::new(&reveal_steps);
            let revealed = animation
                .play(|display| {
                    reveal_panel.emit(PanelEvent::RevealProgress {
                        turn,
                        display: display.to_vec(),
                    });
                })
                .await;
            if revealed {
                reveal_panel.notifiers.notify(turn);
            }
        });
        panel
            .reveal_tasks
            .lock()
            .expect("reveal task lock poisoned")
            .insert(turn, handle);

        // Suspend until the reveal finishes. No timeout: an animator that
        // never completes keeps this turn suspended. A closed channel means
        // the panel was reset and the turn no longer exists.
        let resumed = done.await.is_ok();
        panel.notifiers.remove(turn);
        panel
            .reveal_tasks
            .lock()
            .expect("reveal task lock poisoned")
            .remove(&turn);
        if !resumed {
            return Ok(TurnOutcome::Cancelled);
        }

        let instruction = prompts::final_answer_instruction(&steps);
        let model = panel.current_model();
        let session = self.client.start_session(&model, Some(&instruction)).await?;
        let stream = session.send_streaming(user_text).await?;
        self.stream_answer(panel, turn, stream).await?;
        Ok(TurnOutcome::Completed)
    }

    /// Accumulate fragments in delivery order, republishing the running total
    /// after each one. The first fragment clears the turn's pending flag; a
    /// zero-fragment stream finalizes to empty text.
    async fn stream_answer(
        &self,
        panel: &Arc<ChatPanel>,
        turn: u64,
        mut stream: providers::FragmentStream,
    ) -> Result<(), ChatError> {
        let mut accumulator = StreamingAccumulator::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            let total = accumulator.push(&fragment).to_string();
            panel.conversation().set_text(turn, &total);
            panel.emit(PanelEvent::FragmentAppended { turn, text: total });
        }
        panel.conversation().set_text(turn, accumulator.as_str());
        Ok(())
    }

    pub fn set_thinking_mode(&self, panel_id: PanelId, enabled: bool) {
        self.panel(panel_id)
            .thinking_mode
            .store(enabled, Ordering::Release);
    }

    pub fn thinking_mode(&self, panel_id: PanelId) -> bool {
        self.panel(panel_id).thinking_mode.load(Ordering::Acquire)
    }

    /// Switch a panel's model: tear down the session, start fresh with the
    /// base instruction, and reset the conversation to a greeting naming the
    /// new model.
    pub async fn set_model(&self, panel_id: PanelId, model: &str) -> Result<(), ChatError> {
        if !providers::is_known_model(model) {
            return Err(ChatError::UnknownModel(model.to_string()));
        }
        let greeting = format!("Model {} changed to {}", panel_id.label(), model);
        self.replace_session(panel_id, Some(model), &greeting).await
    }

    /// Reset the conversation without changing the model.
    pub async fn clear(&self, panel_id: PanelId) -> Result<(), ChatError> {
        let model = self.panel(panel_id).current_model();
        let greeting = format!("Chat history cleared. Model is {}.", model);
        self.replace_session(panel_id, None, &greeting).await
    }

    async fn replace_session(
        &self,
        panel_id: PanelId,
        model: Option<&str>,
        greeting: &str,
    ) -> Result<(), ChatError> {
        let panel = self.panel(panel_id);
        let model = match model {
            Some(m) => m.to_string(),
            None => panel.current_model(),
        };

        let session = self
            .client
            .start_session(&model, Some(prompts::BASE_SYSTEM_INSTRUCTION))
            .await?;
        *panel.session.lock().await = session;
        *panel.model.lock().expect("model lock poisoned") = model;

        panel.cancel_inflight();
        let greeting_id = panel.next_id();
        panel.conversation().reset(greeting_id, greeting);
        panel.emit(PanelEvent::ConversationReset {
            greeting: greeting.to_string(),
        });
        Ok(())
    }

    /// Toggle the two-panel comparison. Enabling it brings panel B up fresh,
    /// mirroring a newly mounted panel.
    pub async fn set_compare(&self, enabled: bool) -> Result<(), ChatError> {
        if enabled {
            let panel = self.panel(PanelId::B);
            let model = providers::default_model();
            let greeting = format!(
                "Model {} ready. Default model is {}.",
                PanelId::B.label(),
                model
            );
            let session = self
                .client
                .start_session(model, Some(prompts::BASE_SYSTEM_INSTRUCTION))
                .await?;
            *panel.session.lock().await = session;
            *panel.model.lock().expect("model lock poisoned") = model.to_string();
            panel.thinking_mode.store(false, Ordering::Release);
            panel.cancel_inflight();
            let greeting_id = panel.next_id();
            panel.conversation().reset(greeting_id, &greeting);
            panel.emit(PanelEvent::ConversationReset { greeting });
        }
        self.compare_mode.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn compare_mode(&self) -> bool {
        self.compare_mode.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_stream::stream;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    const RECV_TIMEOUT: Duration = Duration::from_secs(30);

    /// Scripted stand-in for the remote API. Every session replays the same
    /// fragment script; the optional gate holds the stream back until the
    /// test releases it.
    struct FakeClient {
        fragments: Vec<Result<String, String>>,
        thinking_payload: Result<String, String>,
        gate: Option<Arc<Notify>>,
        sessions_started: AtomicUsize,
        last_instruction: Mutex<Option<String>>,
    }

    impl FakeClient {
        fn with_fragments(fragments: &[&str]) -> Self {
            Self {
                fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
                thinking_payload: Ok(r#"{"thinking": ["go left", "go right"]}"#.to_string()),
                gate: None,
                sessions_started: AtomicUsize::new(0),
                last_instruction: Mutex::new(None),
            }
        }

        fn gated(mut self, gate: Arc<Notify>) -> Self {
            self.gate = Some(gate);
            self
        }

        fn failing_stream(mut self, prefix: &[&str]) -> Self {
            self.fragments = prefix.iter().map(|f| Ok(f.to_string())).collect();
            self.fragments.push(Err("connection reset".to_string()));
            self
        }

        fn thinking_payload(mut self, payload: Result<&str, &str>) -> Self {
            self.thinking_payload = match payload {
                Ok(p) => Ok(p.to_string()),
                Err(e) => Err(e.to_string()),
            };
            self
        }
    }

    struct FakeSession {
        fragments: Vec<Result<String, String>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl ChatSession for FakeSession {
        async fn send_streaming(
            &self,
            _text: &str,
        ) -> Result<providers::FragmentStream, ProviderError> {
            let fragments = self.fragments.clone();
            let gate = self.gate.clone();
            Ok(Box::pin(stream! {
                if let Some(gate) = gate {
                    gate.notified().await;
                }
                for fragment in fragments {
                    yield fragment.map_err(ProviderError::StreamFailed);
                }
            }))
        }
    }

    #[async_trait]
    impl InferenceClient for FakeClient {
        async fn start_session(
            &self,
            _model: &str,
            system_instruction: Option<&str>,
        ) -> Result<Box<dyn ChatSession>, ProviderError> {
            self.sessions_started.fetch_add(1, Ordering::Relaxed);
            *self.last_instruction.lock().unwrap() = system_instruction.map(str::to_string);
            Ok(Box::new(FakeSession {
                fragments: self.fragments.clone(),
                gate: self.gate.clone(),
            }))
        }

        async fn generate_structured(
            &self,
            _model: &str,
            _prompt: &str,
            _system_instruction: &str,
            _schema: Value,
        ) -> Result<String, ProviderError> {
            self.thinking_payload
                .clone()
                .map_err(ProviderError::InvalidResponse)
        }
    }

    async fn engine_with(client: FakeClient) -> (Arc<ChatEngine>, Arc<FakeClient>) {
        let client = Arc::new(client);
        let engine = ChatEngine::new(client.clone() as Arc<dyn InferenceClient>)
            .await
            .unwrap();
        (Arc::new(engine), client)
    }

    /// Collect events until the turn completes or fails.
    async fn events_until_settled(
        rx: &mut broadcast::Receiver<PanelEvent>,
    ) -> Vec<PanelEvent> {
        let mut events = Vec::new();
        loop {
            let event = timeout(RECV_TIMEOUT, rx.recv())
                .await
                .expect("turn never settled")
                .expect("event channel closed");
            let settled = matches!(
                event,
                PanelEvent::TurnCompleted { .. } | PanelEvent::TurnFailed { .. }
            );
            events.push(event);
            if settled {
                return events;
            }
        }
    }

    async fn wait_not_busy(engine: &ChatEngine, panel: PanelId) {
        for _ in 0..1000 {
            if !engine.panel_snapshot(panel).busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("panel {} stayed busy", panel.label());
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_appends_user_then_assistant_and_streams() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["Hel", "lo", " world"])).await;
        let mut rx = engine.subscribe(PanelId::A);

        let receipt = engine.submit(PanelId::A, "hello there").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        assert!(matches!(events.last(), Some(PanelEvent::TurnCompleted { .. })));

        let snapshot = engine.panel_snapshot(PanelId::A);
        assert_eq!(snapshot.conversation.len(), 3);
        // The turn pair lands at the end, user first.
        assert_eq!(snapshot.conversation.turns[1].id, receipt.user_turn);
        assert_eq!(snapshot.conversation.turns[2].id, receipt.assistant_turn);
        let user = snapshot.conversation.turn(receipt.user_turn).unwrap();
        assert_eq!(user.speaker, Speaker::User);
        assert_eq!(user.text, "hello there");
        let assistant = snapshot.conversation.turn(receipt.assistant_turn).unwrap();
        assert_eq!(assistant.speaker, Speaker::Assistant);
        assert_eq!(assistant.text, "Hello world");
        assert!(!assistant.pending);
        assert!(assistant.thinking_steps.is_none());
        assert!(!snapshot.busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragments_republish_running_total_in_order() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["Hel", "lo", " world"])).await;
        let mut rx = engine.subscribe(PanelId::A);

        engine.submit(PanelId::A, "hi").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        let totals: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PanelEvent::FragmentAppended { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(totals, vec!["Hel", "Hello", "Hello world"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_whitespace_submits_change_nothing() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["x"])).await;

        assert!(matches!(
            engine.submit(PanelId::A, "").await,
            Err(ChatError::EmptyPrompt)
        ));
        assert!(matches!(
            engine.submit(PanelId::A, "  \n\t ").await,
            Err(ChatError::EmptyPrompt)
        ));
        assert_eq!(engine.panel_snapshot(PanelId::A).conversation.len(), 1);
        assert!(!engine.panel_snapshot(PanelId::A).busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlong_prompt_is_rejected() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["x"])).await;
        let long = "a".repeat(MAX_PROMPT_CHARS + 1);

        assert!(matches!(
            engine.submit(PanelId::A, &long).await,
            Err(ChatError::PromptTooLong)
        ));
        assert_eq!(engine.panel_snapshot(PanelId::A).conversation.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_submit_rejected_while_turn_in_flight() {
        let gate = Arc::new(Notify::new());
        let (engine, _) =
            engine_with(FakeClient::with_fragments(&["done"]).gated(gate.clone())).await;
        let mut rx = engine.subscribe(PanelId::A);

        engine.submit(PanelId::A, "first").await.unwrap();
        assert!(matches!(
            engine.submit(PanelId::A, "second").await,
            Err(ChatError::TurnInFlight)
        ));
        // Only the first submission's turn pair was appended.
        assert_eq!(engine.panel_snapshot(PanelId::A).conversation.len(), 3);

        gate.notify_one();
        events_until_settled(&mut rx).await;
        wait_not_busy(&engine, PanelId::A).await;
        assert!(engine.submit(PanelId::A, "third").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_steps_attach_before_any_answer_text() {
        let (engine, client) = engine_with(FakeClient::with_fragments(&["All", " done"])).await;
        engine.set_thinking_mode(PanelId::A, true);
        let mut rx = engine.subscribe(PanelId::A);

        let receipt = engine.submit(PanelId::A, "plan this").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        let attach_at = events
            .iter()
            .position(|e| matches!(e, PanelEvent::ThinkingAttached { .. }))
            .expect("thinking steps never attached");
        let first_fragment_at = events
            .iter()
            .position(|e| matches!(e, PanelEvent::FragmentAppended { .. }))
            .expect("answer never streamed");
        let last_reveal_at = events
            .iter()
            .rposition(|e| matches!(e, PanelEvent::RevealProgress { .. }))
            .expect("reveal never progressed");
        assert!(attach_at < first_fragment_at);
        assert!(last_reveal_at < first_fragment_at);

        let snapshot = engine.panel_snapshot(PanelId::A);
        let assistant = snapshot.conversation.turn(receipt.assistant_turn).unwrap();
        assert_eq!(
            assistant.thinking_steps.as_deref(),
            Some(&["go left".to_string(), "go right".to_string()][..])
        );
        assert_eq!(assistant.text, "All done");

        // The final answer went out on a fresh session carrying the plan.
        let instruction = client.last_instruction.lock().unwrap().clone().unwrap();
        assert!(instruction.contains("1. go left"));
        assert!(instruction.contains("2. go right"));
        assert!(instruction.contains("for your reference only"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_thinking_payload_degrades_to_fallback_step() {
        let (engine, _) = engine_with(
            FakeClient::with_fragments(&["ok"]).thinking_payload(Ok("not json")),
        )
        .await;
        engine.set_thinking_mode(PanelId::A, true);
        let mut rx = engine.subscribe(PanelId::A);

        let receipt = engine.submit(PanelId::A, "plan this").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        assert!(matches!(events.last(), Some(PanelEvent::TurnCompleted { .. })));
        let snapshot = engine.panel_snapshot(PanelId::A);
        let assistant = snapshot.conversation.turn(receipt.assistant_turn).unwrap();
        assert_eq!(assistant.thinking_steps.as_ref().map(Vec::len), Some(1));
        assert_eq!(assistant.text, "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_failure_replaces_turn_with_notice() {
        let (engine, _) =
            engine_with(FakeClient::with_fragments(&[]).failing_stream(&["Hel"])).await;
        let mut rx = engine.subscribe(PanelId::A);

        let receipt = engine.submit(PanelId::A, "hi").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        assert!(matches!(events.last(), Some(PanelEvent::TurnFailed { .. })));
        let snapshot = engine.panel_snapshot(PanelId::A);
        assert_eq!(snapshot.conversation.len(), 3);
        let assistant = snapshot.conversation.turn(receipt.assistant_turn).unwrap();
        assert_eq!(assistant.text, ERROR_NOTICE);
        assert!(!assistant.pending);

        wait_not_busy(&engine, PanelId::A).await;
        assert!(engine.submit(PanelId::A, "again").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_transport_failure_replaces_turn_with_notice() {
        let (engine, _) = engine_with(
            FakeClient::with_fragments(&["ok"]).thinking_payload(Err("api down")),
        )
        .await;
        engine.set_thinking_mode(PanelId::A, true);
        let mut rx = engine.subscribe(PanelId::A);

        let receipt = engine.submit(PanelId::A, "plan this").await.unwrap();
        let events = events_until_settled(&mut rx).await;

        assert!(matches!(events.last(), Some(PanelEvent::TurnFailed { .. })));
        let assistant_text = engine
            .panel_snapshot(PanelId::A)
            .conversation
            .turn(receipt.assistant_turn)
            .unwrap()
            .text
            .clone();
        assert_eq!(assistant_text, ERROR_NOTICE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_model_resets_to_greeting_naming_new_model() {
        let (engine, client) = engine_with(FakeClient::with_fragments(&["x"])).await;
        engine.submit(PanelId::A, "hello").await.unwrap();
        let mut rx = engine.subscribe(PanelId::A);
        events_until_settled(&mut rx).await;

        let before = client.sessions_started.load(Ordering::Relaxed);
        engine.set_model(PanelId::A, "gemini-2.5-pro").await.unwrap();

        let snapshot = engine.panel_snapshot(PanelId::A);
        assert_eq!(snapshot.model, "gemini-2.5-pro");
        assert_eq!(snapshot.conversation.len(), 1);
        assert_eq!(
            snapshot.conversation.turns[0].text,
            "Model A changed to gemini-2.5-pro"
        );
        assert_eq!(client.sessions_started.load(Ordering::Relaxed), before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_model_is_rejected() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["x"])).await;
        engine.submit(PanelId::A, "hello").await.unwrap();
        let mut rx = engine.subscribe(PanelId::A);
        events_until_settled(&mut rx).await;

        assert!(matches!(
            engine.set_model(PanelId::A, "gpt-4o").await,
            Err(ChatError::UnknownModel(_))
        ));
        assert_eq!(engine.panel_snapshot(PanelId::A).conversation.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_conversation_and_keeps_model() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["x"])).await;
        engine.set_model(PanelId::A, "gemini-2.5-pro").await.unwrap();
        engine.clear(PanelId::A).await.unwrap();

        let snapshot = engine.panel_snapshot(PanelId::A);
        assert_eq!(snapshot.model, "gemini-2.5-pro");
        assert_eq!(snapshot.conversation.len(), 1);
        assert_eq!(
            snapshot.conversation.turns[0].text,
            "Chat history cleared. Model is gemini-2.5-pro."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_mid_reveal_cancels_turn_and_frees_panel() {
        // A long step list keeps the reveal running while the clear lands.
        let steps: Vec<String> = (0..50).map(|i| format!("\"step number {i}\"")).collect();
        let payload = format!("{{\"thinking\": [{}]}}", steps.join(","));
        let (engine, _) = engine_with(
            FakeClient::with_fragments(&["never seen"]).thinking_payload(Ok(payload.as_str())),
        )
        .await;
        engine.set_thinking_mode(PanelId::A, true);
        let mut rx = engine.subscribe(PanelId::A);

        engine.submit(PanelId::A, "plan this").await.unwrap();

        // Wait for the reveal to actually start, then reset underneath it.
        loop {
            let event = timeout(RECV_TIMEOUT, rx.recv())
                .await
                .expect("reveal never started")
                .expect("event channel closed");
            if matches!(event, PanelEvent::RevealProgress { .. }) {
                break;
            }
        }
        engine.clear(PanelId::A).await.unwrap();

        wait_not_busy(&engine, PanelId::A).await;
        let snapshot = engine.panel_snapshot(PanelId::A);
        assert_eq!(snapshot.conversation.len(), 1);
        assert!(snapshot.conversation.turns[0]
            .text
            .starts_with("Chat history cleared."));
        assert!(engine.submit(PanelId::A, "next").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compare_toggle_brings_panel_b_up_fresh() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["x"])).await;
        assert_eq!(engine.snapshot().panels.len(), 1);

        engine.set_compare(true).await.unwrap();
        let snapshot = engine.snapshot();
        assert!(snapshot.compare_mode);
        assert_eq!(snapshot.panels.len(), 2);
        assert_eq!(
            snapshot.panels[1].conversation.turns[0].text,
            "Model B ready. Default model is gemini-2.5-flash."
        );

        engine.set_compare(false).await.unwrap();
        assert_eq!(engine.snapshot().panels.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panels_run_independent_conversations() {
        let (engine, _) = engine_with(FakeClient::with_fragments(&["pong"])).await;
        engine.set_compare(true).await.unwrap();
        let mut rx_b = engine.subscribe(PanelId::B);

        engine.submit(PanelId::B, "ping").await.unwrap();
        events_until_settled(&mut rx_b).await;

        assert_eq!(engine.panel_snapshot(PanelId::B).conversation.len(), 3);
        // Panel A still holds only its greeting.
        assert_eq!(engine.panel_snapshot(PanelId::A).conversation.len(), 1);
    }
}
