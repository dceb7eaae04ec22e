//! Streaming response engine
//!
//! `submit` records the new exchange, dispatches the request and spawns one
//! task that owns the `StreamSession`. The task selects over cancellation,
//! tool activity and content deltas (in that priority), forwards display
//! updates to the returned `StreamHandle`, finalizes the session exactly once
//! and reports the outcome through a oneshot channel.
//!
//! At most one session runs per conversation. A new submission cancels the
//! running one and waits for it to be finalized before appending its own
//! exchange.

use crate::activity::{ActivitySink, ToolActivity};
use crate::provider::ResponseMetadata;
use crate::replay::extract_think;
use crate::request::{ProviderRequest, RequestAssembler};
use crate::session::{
    CancelSignal, CancellationController, FinalizationRecorder, SegmentClassifier, SegmentUpdate,
    StreamSession, apply_chat_meta,
};
use crate::streaming::{DeltaStream, DispatchEvent, StreamDispatcher};
use crate::tools::ToolBinding;
use anyhow::{Result, anyhow};
use chatlab_common::Clock;
use chatlab_common::constants::{DEFAULT_UPDATE_BUFFER, THINK_CLOSE, THINK_OPEN};
use chatlab_core::{ConversationHistory, Message};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// A user prompt to run against an existing conversation
#[derive(Clone, Default)]
pub struct SubmitRequest {
    pub conversation_id: String,
    pub prompt: String,
    pub retrieval_filter: Option<String>,
    pub tools: Vec<Arc<dyn ToolBinding>>,
}

impl SubmitRequest {
    pub fn new(conversation_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.retrieval_filter = filter;
        self
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn ToolBinding>>) -> Self {
        self.tools = tools;
        self
    }
}

/// How a generation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Final state of a generation, sent once the session is finalized
#[derive(Debug, Clone)]
pub struct StreamReport {
    pub session_id: String,
    pub conversation_id: String,
    pub outcome: StreamOutcome,
    pub answer: String,
    pub reasoning: Option<String>,
    pub tool_activity: Option<String>,
    /// Time of the first visible answer delta
    pub response_timestamp: Option<i64>,
    /// Present on natural completion only
    pub metadata: Option<ResponseMetadata>,
    /// The finalized assistant message as stored
    pub message: Option<Message>,
}

/// Caller side of a running generation
pub struct StreamHandle {
    session_id: String,
    conversation_id: String,
    updates: mpsc::Receiver<SegmentUpdate>,
    completion: oneshot::Receiver<StreamReport>,
    controller: CancellationController,
}

impl StreamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Next display update; `None` once the session task has finished
    pub async fn next_update(&mut self) -> Option<SegmentUpdate> {
        self.updates.recv().await
    }

    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }

    /// A controller that can cancel this generation from elsewhere
    pub fn cancellation(&self) -> CancellationController {
        self.controller.clone()
    }

    /// Wait for the session to be finalized. Pending display updates are
    /// discarded.
    pub async fn wait(self) -> Result<StreamReport> {
        let Self {
            session_id,
            updates,
            completion,
            ..
        } = self;
        drop(updates);
        completion
            .await
            .map_err(|_| anyhow!("Session {} ended without a report", session_id))
    }
}

/// A session currently writing into a conversation
struct ActiveSession {
    session_id: String,
    controller: CancellationController,
    finished: watch::Receiver<bool>,
}

impl ActiveSession {
    /// Cancel the session and wait until it has been finalized
    async fn supersede(mut self) {
        info!("Session {} superseded by a new submission", self.session_id);
        self.controller.cancel();
        if self.finished.wait_for(|finished| *finished).await.is_err() {
            warn!("Session {} stopped without finishing", self.session_id);
        }
    }
}

type ActiveSessions = Arc<Mutex<HashMap<String, ActiveSession>>>;

/// Everything a prepared exchange needs before the provider is called
struct PreparedExchange {
    session: StreamSession,
    request: ProviderRequest,
    activity: mpsc::UnboundedReceiver<ToolActivity>,
    finished: watch::Sender<bool>,
}

pub struct StreamEngine {
    history: Arc<ConversationHistory>,
    dispatcher: StreamDispatcher,
    classifier: SegmentClassifier,
    recorder: FinalizationRecorder,
    update_buffer: usize,
    active: ActiveSessions,
}

impl StreamEngine {
    pub fn new(history: Arc<ConversationHistory>, dispatcher: StreamDispatcher) -> Self {
        let clock = history.clock().clone();
        Self {
            history,
            dispatcher,
            classifier: SegmentClassifier::new(clock.clone()),
            recorder: FinalizationRecorder::new(clock),
            update_buffer: DEFAULT_UPDATE_BUFFER,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_update_buffer(mut self, update_buffer: usize) -> Self {
        self.update_buffer = update_buffer.max(1);
        self
    }

    pub fn history(&self) -> &Arc<ConversationHistory> {
        &self.history
    }

    pub fn dispatcher(&self) -> &StreamDispatcher {
        &self.dispatcher
    }

    /// Start a streaming generation for `request`
    pub async fn submit(&self, request: SubmitRequest) -> Result<StreamHandle> {
        let (controller, signal) = CancellationController::new();
        let PreparedExchange {
            session,
            request: provider_request,
            activity,
            finished,
        } = self.begin(&request, &controller).await?;
        let session_id = session.session_id.clone();
        let conversation_id = session.conversation_id.clone();
        info!(
            "Submitting prompt to {} for conversation {} (session {})",
            self.dispatcher.provider_name(),
            conversation_id,
            session_id
        );

        let deltas = self.dispatcher.dispatch(&session_id, provider_request);
        let (update_sender, updates) = mpsc::channel(self.update_buffer);
        let (report_sender, completion) = oneshot::channel();

        let runner = SessionRunner {
            history: self.history.clone(),
            classifier: self.classifier.clone(),
            recorder: self.recorder.clone(),
            controller: controller.clone(),
            updates: Some(update_sender),
            active: self.active.clone(),
            finished,
        };
        tokio::spawn(async move {
            let report = runner.run(session, deltas, activity, signal).await;
            if report_sender.send(report).is_err() {
                debug!("Stream handle dropped before the report was delivered");
            }
        });

        Ok(StreamHandle {
            session_id,
            conversation_id,
            updates,
            completion,
            controller,
        })
    }

    /// Run a generation without streaming and finalize it the same way. A
    /// later submission to the same conversation cancels it.
    pub async fn call(&self, request: SubmitRequest) -> Result<StreamReport> {
        let (controller, mut signal) = CancellationController::new();
        let PreparedExchange {
            mut session,
            request: provider_request,
            mut activity,
            finished,
        } = self.begin(&request, &controller).await?;
        info!(
            "Calling {} for conversation {} (session {})",
            self.dispatcher.provider_name(),
            session.conversation_id,
            session.session_id
        );

        let result = tokio::select! {
            biased;
            _ = signal.cancelled() => None,
            result = self.dispatcher.invoke(&provider_request) => Some(result),
        };
        drop(provider_request);

        let runner = SessionRunner {
            history: self.history.clone(),
            classifier: self.classifier.clone(),
            recorder: self.recorder.clone(),
            controller,
            updates: None,
            active: self.active.clone(),
            finished,
        };
        while let Ok(event) = activity.try_recv() {
            self.classifier.on_activity(&mut session, &event);
        }
        let (outcome, metadata) = match result {
            None => {
                info!("Call for session {} cancelled", session.session_id);
                session.cancelled = true;
                (StreamOutcome::Cancelled, None)
            }
            Some(Ok((content, metadata))) => {
                runner.classify_full_content(&mut session, &content);
                (StreamOutcome::Completed, Some(metadata))
            }
            Some(Err(e)) => {
                warn!("Call failed for session {}: {:#}", session.session_id, e);
                (StreamOutcome::Failed(format!("{e:#}")), None)
            }
        };
        Ok(runner.finish(session, outcome, metadata).await)
    }

    /// Supersede any session still running on the conversation, then prepare
    /// the new exchange and register it as the active one
    async fn begin(
        &self,
        request: &SubmitRequest,
        controller: &CancellationController,
    ) -> Result<PreparedExchange> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.remove(&request.conversation_id) {
            previous.supersede().await;
        }

        let prepared = self.prepare(request).await?;
        active.insert(
            request.conversation_id.clone(),
            ActiveSession {
                session_id: prepared.session.session_id.clone(),
                controller: controller.clone(),
                finished: prepared.finished.subscribe(),
            },
        );
        Ok(prepared)
    }

    /// Append the user message and assistant placeholder and build the
    /// provider request from the history before them
    async fn prepare(&self, request: &SubmitRequest) -> Result<PreparedExchange> {
        let mut conversation = self.history.require(&request.conversation_id).await?;
        let start = self.history.clock().now_millis();

        let (sink, activity) = ActivitySink::channel();
        let provider_request = RequestAssembler::assemble(
            &conversation,
            &request.prompt,
            request.retrieval_filter.as_deref(),
            &request.tools,
            &sink,
        );

        conversation.messages.push(Message::user(request.prompt.clone()));
        conversation.messages.push(Message::assistant_placeholder());
        self.history.store().put(conversation).await?;

        Ok(PreparedExchange {
            session: StreamSession::new(request.conversation_id.clone(), start),
            request: provider_request,
            activity,
            finished: watch::channel(false).0,
        })
    }
}

struct SessionRunner {
    history: Arc<ConversationHistory>,
    classifier: SegmentClassifier,
    recorder: FinalizationRecorder,
    controller: CancellationController,
    updates: Option<mpsc::Sender<SegmentUpdate>>,
    active: ActiveSessions,
    finished: watch::Sender<bool>,
}

impl SessionRunner {
    async fn run(
        self,
        mut session: StreamSession,
        mut deltas: DeltaStream,
        mut activity: mpsc::UnboundedReceiver<ToolActivity>,
        mut signal: CancelSignal,
    ) -> StreamReport {
        let (outcome, metadata) = loop {
            tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    info!("Session {} cancelled", session.session_id);
                    session.cancelled = true;
                    break (StreamOutcome::Cancelled, None);
                }
                Some(event) = activity.recv() => {
                    let updates = self.classifier.on_activity(&mut session, &event);
                    self.forward(updates, &mut signal).await;
                }
                event = deltas.next() => match event {
                    Some(DispatchEvent::Delta(delta)) => {
                        let updates = self.classifier.on_delta(&mut session, &delta);
                        self.forward(updates, &mut signal).await;
                    }
                    Some(DispatchEvent::Completed(metadata)) => {
                        self.drain_activity(&mut session, &mut activity, &mut signal).await;
                        break (StreamOutcome::Completed, Some(metadata));
                    }
                    Some(DispatchEvent::Failed(message)) => {
                        self.drain_activity(&mut session, &mut activity, &mut signal).await;
                        break (StreamOutcome::Failed(message), None);
                    }
                    None => {
                        warn!("Delta stream for session {} ended without a terminal event", session.session_id);
                        break (StreamOutcome::Failed("stream ended unexpectedly".to_string()), None);
                    }
                },
            }
        };
        drop(deltas);

        self.finish(session, outcome, metadata).await
    }

    async fn drain_activity(
        &self,
        session: &mut StreamSession,
        activity: &mut mpsc::UnboundedReceiver<ToolActivity>,
        signal: &mut CancelSignal,
    ) {
        while let Ok(event) = activity.try_recv() {
            let updates = self.classifier.on_activity(session, &event);
            self.forward(updates, signal).await;
        }
    }

    /// Send display updates, waiting for the reader to keep up. Stops early
    /// when the session is cancelled or the handle stopped listening.
    async fn forward(&self, updates: Vec<SegmentUpdate>, signal: &mut CancelSignal) {
        let Some(sender) = &self.updates else {
            return;
        };
        for update in updates {
            tokio::select! {
                biased;
                _ = signal.cancelled() => return,
                sent = sender.send(update) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Feed a complete response through the classifier as if streamed
    fn classify_full_content(&self, session: &mut StreamSession, content: &str) {
        let (reasoning, answer) = match extract_think(content) {
            Ok(split) => split,
            Err(e) => {
                warn!("Could not split reasoning from response: {}", e);
                (None, content.to_string())
            }
        };
        if let Some(reasoning) = reasoning {
            for delta in [THINK_OPEN, reasoning.as_str(), THINK_CLOSE] {
                self.classifier.on_delta(session, delta);
            }
        }
        if !answer.is_empty() {
            self.classifier.on_delta(session, &answer);
        }
    }

    /// Finalize the session into the stored conversation and build the report
    async fn finish(
        self,
        mut session: StreamSession,
        outcome: StreamOutcome,
        metadata: Option<ResponseMetadata>,
    ) -> StreamReport {
        self.controller.mark_finished();
        let conversation_id = session.conversation_id.clone();

        let message = match self.history.get(&conversation_id).await {
            Ok(Some(mut conversation)) => {
                self.recorder.finalize(&mut session, &mut conversation);
                if let (StreamOutcome::Completed, Some(metadata)) = (&outcome, &metadata) {
                    apply_chat_meta(&mut conversation, metadata);
                }
                let message = conversation.messages.last().cloned();
                match self.history.store().put(conversation).await {
                    // A failed exchange does not title the conversation
                    Ok(()) if matches!(outcome, StreamOutcome::Failed(_)) => message,
                    Ok(()) => match self.history.complete_exchange(&conversation_id).await {
                        Ok(conversation) => conversation.messages.last().cloned(),
                        Err(e) => {
                            error!("Failed to record exchange for {}: {}", conversation_id, e);
                            None
                        }
                    },
                    Err(e) => {
                        error!("Failed to store conversation {}: {}", conversation_id, e);
                        None
                    }
                }
            }
            Ok(None) => {
                error!(
                    "Conversation {} disappeared before session {} was finalized",
                    conversation_id, session.session_id
                );
                None
            }
            Err(e) => {
                error!("Failed to load conversation {}: {}", conversation_id, e);
                None
            }
        };

        self.finished.send_replace(true);
        {
            let mut active = self.active.lock().await;
            if active
                .get(&conversation_id)
                .is_some_and(|a| a.session_id == session.session_id)
            {
                active.remove(&conversation_id);
            }
        }

        debug!(
            "Session {} finished with {:?}",
            session.session_id, outcome
        );
        StreamReport {
            session_id: session.session_id.clone(),
            conversation_id,
            outcome,
            answer: session.answer_text().to_string(),
            reasoning: session.reasoning_text().map(str::to_string),
            tool_activity: session.tool_activity_text().map(str::to_string),
            response_timestamp: session.response_timestamp,
            metadata,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatProvider, Generation, GenerationChunk, Usage};
    use crate::replay::replay_message;
    use crate::session::SegmentKind;
    use crate::testing::{
        ChannelProvider, FixedTool, GatedTool, ScriptedProvider, text, tool_call_chunk,
    };
    use chatlab_common::constants::metadata::{
        CHAT_META, THINK_PROCESS, THINK_TIMESTAMP, TIMESTAMP, TOOL_PROCESS_MESSAGES,
    };
    use chatlab_common::{ChatOptions, ManualClock};
    use chatlab_core::{ConversationPersistence, InMemoryConversationStore, Role};
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    fn history(clock: Arc<ManualClock>) -> Arc<ConversationHistory> {
        Arc::new(ConversationHistory::new(
            Arc::new(InMemoryConversationStore::new()),
            clock,
        ))
    }

    fn engine(provider: Arc<dyn ChatProvider>, history: Arc<ConversationHistory>) -> StreamEngine {
        StreamEngine::new(history, StreamDispatcher::new(provider))
    }

    async fn new_conversation(engine: &StreamEngine) -> String {
        engine
            .history()
            .create(None, ChatOptions::default())
            .await
            .unwrap()
            .conversation_id
    }

    async fn expect_updates(handle: &mut StreamHandle, count: usize) -> Vec<SegmentUpdate> {
        let mut updates = Vec::new();
        for _ in 0..count {
            updates.push(handle.next_update().await.unwrap());
        }
        updates
    }

    #[tokio::test]
    async fn test_reasoning_then_answer() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (provider, chunks) = ChannelProvider::new();
        let engine = engine(Arc::new(provider), history(clock.clone()));
        let id = new_conversation(&engine).await;

        let mut handle = engine.submit(SubmitRequest::new(&id, "hi")).await.unwrap();

        chunks.send(Ok(GenerationChunk::text("<think>"))).unwrap();
        clock.set(1_100);
        chunks.send(Ok(GenerationChunk::text("considering..."))).unwrap();
        let updates = expect_updates(&mut handle, 2).await;
        assert_eq!(
            updates[0],
            SegmentUpdate::Opened {
                kind: SegmentKind::Reasoning,
                at: 1_100
            }
        );

        clock.set(1_200);
        chunks.send(Ok(GenerationChunk::text("</think>"))).unwrap();
        expect_updates(&mut handle, 1).await;

        clock.set(1_300);
        chunks.send(Ok(GenerationChunk::text("Hello"))).unwrap();
        chunks.send(Ok(GenerationChunk::text(" world"))).unwrap();
        drop(chunks);

        let report = handle.wait().await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::Completed);
        assert_eq!(report.answer, "Hello world");
        assert_eq!(report.reasoning.as_deref(), Some("considering..."));
        assert_eq!(report.response_timestamp, Some(1_300));

        let message = report.message.unwrap();
        assert_eq!(message.text, "Hello world");
        assert_eq!(message.metadata_str(THINK_PROCESS), Some("considering..."));
        assert_eq!(message.metadata_i64(THINK_TIMESTAMP), Some(1_100));
        assert_eq!(message.metadata_i64(TIMESTAMP), Some(1_200));

        let conversation = engine.history().require(&id).await.unwrap();
        assert_eq!(conversation.title.as_deref(), Some("hi"));
        assert_eq!(conversation.messages[0].metadata_i64(TIMESTAMP), Some(1_000));
    }

    #[tokio::test]
    async fn test_tool_activity_beside_answer() {
        let clock = Arc::new(ManualClock::new(0));
        let provider = Arc::new(ScriptedProvider::streaming(vec![
            vec![
                text("The answer is "),
                tool_call_chunk("c1", "toolA", json!({"q": "life"})),
            ],
            vec![
                text("42"),
                Ok(GenerationChunk {
                    model: Some("m1".to_string()),
                    usage: Some(Usage {
                        total_tokens: Some(9),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            ],
        ]));
        let engine = engine(provider, history(clock));
        let id = new_conversation(&engine).await;
        let tools: Vec<Arc<dyn ToolBinding>> = vec![Arc::new(FixedTool::new("toolA", json!("42")))];

        let handle = engine
            .submit(SubmitRequest::new(&id, "meaning of life?").with_tools(tools))
            .await
            .unwrap();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.outcome, StreamOutcome::Completed);
        assert_eq!(report.answer, "The answer is 42");
        let transcript = report.tool_activity.unwrap();
        let echo = transcript.find("meaning of life?").unwrap();
        let call = transcript.find("\"toolCalls\"").unwrap();
        let result = transcript.find("\"responseData\"").unwrap();
        assert!(echo < call && call < result);

        let conversation = engine.history().require(&id).await.unwrap();
        let assistant = conversation.messages.last().unwrap();
        assert_eq!(assistant.metadata_str(TOOL_PROCESS_MESSAGES), Some(transcript.as_str()));
        let chat_meta = &conversation.messages[0].metadata[CHAT_META];
        assert_eq!(chat_meta["model"], json!("m1"));
        assert_eq!(chat_meta["usage"]["totalTokens"], json!(9));
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_answer() {
        let clock = Arc::new(ManualClock::new(0));
        let (provider, chunks) = ChannelProvider::new();
        let engine = engine(Arc::new(provider), history(clock));
        let id = new_conversation(&engine).await;

        let mut handle = engine.submit(SubmitRequest::new(&id, "tell me")).await.unwrap();
        chunks.send(Ok(GenerationChunk::text("Hello"))).unwrap();
        chunks.send(Ok(GenerationChunk::text(" wor"))).unwrap();
        expect_updates(&mut handle, 3).await;

        let controller = handle.cancellation();
        assert!(handle.cancel());
        assert!(!controller.cancel());
        let report = handle.wait().await.unwrap();

        assert_eq!(report.outcome, StreamOutcome::Cancelled);
        assert!(report.metadata.is_none());
        assert_eq!(report.message.unwrap().text, "Hello wor");
        assert!(controller.is_finished());
        assert!(!controller.cancel());

        let conversation = engine.history().require(&id).await.unwrap();
        assert!(!conversation.messages[0].metadata.contains_key(CHAT_META));
    }

    #[tokio::test]
    async fn test_provider_failure_finalizes_partial_content() {
        let clock = Arc::new(ManualClock::new(0));
        let provider = Arc::new(ScriptedProvider::streaming(vec![vec![
            text("partial"),
            Err("boom".to_string()),
        ]]));
        let engine = engine(provider, history(clock));
        let id = new_conversation(&engine).await;

        let report = engine
            .submit(SubmitRequest::new(&id, "q"))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        match &report.outcome {
            StreamOutcome::Failed(message) => assert!(message.contains("boom")),
            other => panic!("expected failure, got {other:?}"),
        }
        let message = report.message.unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text, "partial");

        let conversation = engine.history().require(&id).await.unwrap();
        assert!(conversation.title.is_none());
        assert!(conversation.messages[0].timestamp().is_some());
    }

    #[tokio::test]
    async fn test_new_submission_supersedes_running_session() {
        let clock = Arc::new(ManualClock::new(1_000));
        let (provider, mut streams) = ChannelProvider::with_streams(2);
        let engine = engine(Arc::new(provider), history(clock.clone()));
        let id = new_conversation(&engine).await;
        let (first_chunks, second_chunks) = (streams.remove(0), streams.remove(0));

        let mut first = engine.submit(SubmitRequest::new(&id, "first")).await.unwrap();
        first_chunks.send(Ok(GenerationChunk::text("answer A"))).unwrap();
        expect_updates(&mut first, 2).await;

        clock.set(2_000);
        let second = engine.submit(SubmitRequest::new(&id, "second")).await.unwrap();
        let first_report = first.wait().await.unwrap();
        assert_eq!(first_report.outcome, StreamOutcome::Cancelled);
        assert_eq!(first_report.answer, "answer A");

        second_chunks.send(Ok(GenerationChunk::text("answer B"))).unwrap();
        drop(second_chunks);
        drop(first_chunks);
        let second_report = second.wait().await.unwrap();
        assert_eq!(second_report.outcome, StreamOutcome::Completed);

        let conversation = engine.history().require(&id).await.unwrap();
        let texts: Vec<_> = conversation.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "answer A", "second", "answer B"]);
        assert!(conversation.messages.iter().all(|m| m.timestamp().is_some()));
        assert_eq!(conversation.messages[0].metadata_i64(TIMESTAMP), Some(1_000));
        assert_eq!(conversation.messages[2].metadata_i64(TIMESTAMP), Some(2_000));
    }

    #[tokio::test]
    async fn test_cancel_during_tool_skips_next_round() {
        let clock = Arc::new(ManualClock::new(0));
        let provider = Arc::new(ScriptedProvider::streaming(vec![
            vec![tool_call_chunk("c1", "slow", json!({}))],
            vec![text("too late")],
        ]));
        let tool = GatedTool::new("slow");
        let (started, release) = (tool.started.clone(), tool.release.clone());
        let engine = engine(provider.clone(), history(clock));
        let id = new_conversation(&engine).await;
        let tools: Vec<Arc<dyn ToolBinding>> = vec![Arc::new(tool)];

        let handle = engine
            .submit(SubmitRequest::new(&id, "wait for it").with_tools(tools))
            .await
            .unwrap();
        started.notified().await;
        assert!(handle.cancel());
        let report = handle.wait().await.unwrap();
        release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(report.outcome, StreamOutcome::Cancelled);
        assert_eq!(provider.recorded_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_reader_sees_every_update() {
        let clock = Arc::new(ManualClock::new(0));
        let pieces: Vec<String> = (0..40).map(|i| format!("w{i} ")).collect();
        let provider = Arc::new(ScriptedProvider::streaming(vec![
            pieces.iter().map(|p| text(p)).collect(),
        ]));
        let engine = engine(provider, history(clock)).with_update_buffer(1);
        let id = new_conversation(&engine).await;

        let mut handle = engine.submit(SubmitRequest::new(&id, "count")).await.unwrap();
        let mut shown = String::new();
        while let Some(update) = handle.next_update().await {
            if let SegmentUpdate::Appended { kind: SegmentKind::Answer, text } = update {
                shown.push_str(&text);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let report = handle.wait().await.unwrap();

        assert_eq!(shown, pieces.concat());
        assert_eq!(report.answer, shown);
    }

    #[tokio::test]
    async fn test_submit_unknown_conversation_fails() {
        let clock = Arc::new(ManualClock::new(0));
        let engine = engine(Arc::new(ScriptedProvider::default()), history(clock));
        assert!(engine.submit(SubmitRequest::new("Chat-missing", "q")).await.is_err());
    }

    #[tokio::test]
    async fn test_single_shot_call_splits_reasoning() {
        let clock = Arc::new(ManualClock::new(50));
        let provider = Arc::new(ScriptedProvider::single_shot(vec![Ok(Generation {
            text: "<think>plan</think>Result".to_string(),
            model: Some("m".to_string()),
            ..Default::default()
        })]));
        let engine = engine(provider, history(clock));
        let id = new_conversation(&engine).await;

        let report = engine.call(SubmitRequest::new(&id, "go")).await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::Completed);
        assert_eq!(report.answer, "Result");
        assert_eq!(report.reasoning.as_deref(), Some("plan"));
        assert_eq!(report.response_timestamp, Some(50));
        assert_eq!(report.message.unwrap().text, "Result");
    }

    #[tokio::test]
    async fn test_single_shot_failure_is_reported() {
        let clock = Arc::new(ManualClock::new(0));
        let provider = Arc::new(ScriptedProvider::single_shot(vec![Err("quota".to_string())]));
        let engine = engine(provider, history(clock));
        let id = new_conversation(&engine).await;

        let report = engine.call(SubmitRequest::new(&id, "go")).await.unwrap();
        assert!(matches!(report.outcome, StreamOutcome::Failed(_)));
        assert_eq!(report.message.unwrap().text, "");
    }

    #[tokio::test]
    async fn test_segments_survive_save_and_load() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(10));
        let persistence = Arc::new(ConversationPersistence::new(dir.path()));
        let history = Arc::new(
            ConversationHistory::new(Arc::new(InMemoryConversationStore::new()), clock.clone())
                .with_persistence(persistence.clone()),
        );
        let provider = Arc::new(ScriptedProvider::streaming(vec![vec![
            text("<think>"),
            text("  "),
            text("considering..."),
            text("</think>"),
            text("Hello"),
            text(" world"),
        ]]));
        let engine = engine(provider, history.clone());
        let id = new_conversation(&engine).await;
        engine
            .submit(SubmitRequest::new(&id, "hi"))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(history.save_all().await.unwrap(), 1);

        let reloaded = ConversationHistory::new(Arc::new(InMemoryConversationStore::new()), clock)
            .with_persistence(persistence);
        assert_eq!(reloaded.load_all().await.unwrap(), 1);
        let conversation = reloaded.require(&id).await.unwrap();
        let segments = replay_message(conversation.messages.last().unwrap()).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].kind, SegmentKind::Reasoning);
        assert_eq!(segments[0].text, "considering...");
        assert_eq!(segments[1].kind, SegmentKind::Answer);
        assert_eq!(segments[1].text, "Hello world");
    }
}
