//! Provider dispatch, streaming and single-shot
//!
//! `dispatch` spawns a task that drives the provider and pushes
//! `DispatchEvent`s into a channel; the caller reads them as a `DeltaStream`.
//! The task also runs the retrieval advisor before the first provider call
//! and the tool round trips between provider calls. Tool activity goes to
//! the request's activity sink, never into the delta sequence.

use crate::provider::{ChatProvider, ModelRequest, ResponseMetadata};
use crate::request::ProviderRequest;
use crate::retrieval::{DocumentRetriever, RetrievedDocument, augment_prompt};
use crate::tools::ToolExecutor;
use anyhow::{Context as _, Result, bail};
use chatlab_common::constants::{DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_UPDATE_BUFFER};
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Item of a dispatched stream. `Completed` or `Failed` is always last.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Delta(String),
    Completed(ResponseMetadata),
    Failed(String),
}

/// Stream of dispatch events for one generation. Dropping it aborts the
/// dispatch task, including any tool call or provider request in flight.
pub struct DeltaStream {
    receiver: ReceiverStream<DispatchEvent>,
    session_id: String,
    task: JoinHandle<()>,
}

impl DeltaStream {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Stream for DeltaStream {
    type Item = DispatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            debug!("Aborting dispatch task for session: {}", self.session_id);
            self.task.abort();
        }
    }
}

#[derive(Clone)]
pub struct StreamDispatcher {
    provider: Arc<dyn ChatProvider>,
    retriever: Option<Arc<dyn DocumentRetriever>>,
    max_tool_rounds: usize,
    buffer_size: usize,
}

impl StreamDispatcher {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self {
            provider,
            retriever: None,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            buffer_size: DEFAULT_UPDATE_BUFFER,
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Start a streaming generation
    pub fn dispatch(&self, session_id: &str, request: ProviderRequest) -> DeltaStream {
        let (sender, receiver) = mpsc::channel(self.buffer_size);
        let dispatcher = self.clone();
        let task_session_id = session_id.to_string();

        let task = tokio::spawn(async move {
            dispatcher
                .stream_task(task_session_id, request, sender)
                .await
        });

        DeltaStream {
            receiver: ReceiverStream::new(receiver),
            session_id: session_id.to_string(),
            task,
        }
    }

    /// Run a generation to completion, tool round trips included
    pub async fn invoke(&self, request: &ProviderRequest) -> Result<(String, ResponseMetadata)> {
        let (mut model_request, documents) = self.prepare(request).await?;
        let executor = ToolExecutor::new(request.tools.clone());
        let mut terminal = ResponseMetadata::default();
        let mut rounds = 0;

        loop {
            let generation = self
                .provider
                .invoke(&model_request)
                .await
                .with_context(|| format!("Provider {} call failed", self.provider.name()))?;
            terminal.add_round(generation.model, generation.usage);

            if !generation.tool_calls.is_empty() && !request.has_tools() {
                warn!(
                    "Model requested {} tool calls but no tools are bound",
                    generation.tool_calls.len()
                );
            }
            if generation.tool_calls.is_empty() || !request.has_tools() {
                terminal.retrieved_documents = documents;
                return Ok((generation.text, terminal));
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                bail!("Maximum tool rounds ({}) reached", self.max_tool_rounds);
            }
            let fragment = executor
                .execute(
                    &request.user_prompt,
                    &generation.tool_calls,
                    request.tool_context.activity_sink(),
                )
                .await;
            model_request.messages.extend(fragment);
        }
    }

    /// Query the retrieval advisor and build the provider request
    async fn prepare(&self, request: &ProviderRequest) -> Result<(ModelRequest, Vec<RetrievedDocument>)> {
        let documents = match (request.retrieval_filter(), &self.retriever) {
            (Some(filter), Some(retriever)) => retriever
                .retrieve(&request.user_prompt, filter)
                .await
                .context("Document retrieval failed")?,
            (Some(_), None) => {
                warn!("Retrieval filter given but no document retriever is configured");
                Vec::new()
            }
            (None, _) => {
                debug!("Document retrieval was skipped");
                Vec::new()
            }
        };
        let prompt = augment_prompt(&request.user_prompt, &documents);
        Ok((request.to_model_request(&prompt), documents))
    }

    async fn stream_task(
        self,
        session_id: String,
        request: ProviderRequest,
        sender: mpsc::Sender<DispatchEvent>,
    ) {
        debug!("Starting dispatch for session: {}", session_id);
        let event = match self.run_stream(&session_id, &request, &sender).await {
            Ok(Some(metadata)) => DispatchEvent::Completed(metadata),
            Ok(None) => {
                debug!("Receiver dropped for session: {}", session_id);
                return;
            }
            Err(e) => {
                warn!("Stream error for session {}: {:#}", session_id, e);
                DispatchEvent::Failed(format!("{e:#}"))
            }
        };
        if sender.send(event).await.is_err() {
            debug!("Receiver dropped before terminal event for session: {}", session_id);
        }
        info!("Dispatch task completed for session: {}", session_id);
    }

    /// Returns `Ok(None)` when the receiver went away mid-stream
    async fn run_stream(
        &self,
        session_id: &str,
        request: &ProviderRequest,
        sender: &mpsc::Sender<DispatchEvent>,
    ) -> Result<Option<ResponseMetadata>> {
        let (mut model_request, documents) = self.prepare(request).await?;
        let executor = ToolExecutor::new(request.tools.clone());
        let mut terminal = ResponseMetadata::default();
        let mut rounds = 0;

        loop {
            let mut stream = self
                .provider
                .stream(&model_request)
                .await
                .with_context(|| format!("Provider {} failed to start stream", self.provider.name()))?;

            let mut round = ResponseMetadata::default();
            let mut tool_calls = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                round.merge_chunk(&chunk);
                if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
                    if sender.send(DispatchEvent::Delta(text)).await.is_err() {
                        return Ok(None);
                    }
                }
                tool_calls.extend(chunk.tool_calls);
            }
            terminal.add_round(round.model, round.usage);

            if tool_calls.is_empty() {
                break;
            }
            if !request.has_tools() {
                warn!(
                    "Model requested {} tool calls but no tools are bound",
                    tool_calls.len()
                );
                break;
            }
            if sender.is_closed() {
                return Ok(None);
            }

            rounds += 1;
            if rounds > self.max_tool_rounds {
                bail!("Maximum tool rounds ({}) reached", self.max_tool_rounds);
            }
            debug!(
                "Session {} tool round {} with {} calls",
                session_id,
                rounds,
                tool_calls.len()
            );
            let fragment = executor
                .execute(
                    &request.user_prompt,
                    &tool_calls,
                    request.tool_context.activity_sink(),
                )
                .await;
            if sender.is_closed() {
                debug!("Session {} went away during tool round {}", session_id, rounds);
                return Ok(None);
            }
            model_request.messages.extend(fragment);
        }

        terminal.retrieved_documents = documents;
        Ok(Some(terminal))
    }
}
