//! Test doubles shared by the engine tests

use crate::provider::{ChatProvider, ChunkStream, Generation, GenerationChunk, ModelRequest, ToolCallRequest};
use crate::tools::ToolBinding;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type ScriptedRound = Vec<std::result::Result<GenerationChunk, String>>;

/// Provider that replays pre-recorded rounds, one per call
#[derive(Default)]
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<ScriptedRound>>,
    generations: Mutex<VecDeque<std::result::Result<Generation, String>>>,
    pub requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn streaming(rounds: Vec<ScriptedRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            ..Default::default()
        }
    }

    pub fn single_shot(generations: Vec<std::result::Result<Generation, String>>) -> Self {
        Self {
            generations: Mutex::new(generations.into()),
            ..Default::default()
        }
    }

    pub fn recorded_requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: &ModelRequest) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted round left"))?;
        let items: Vec<Result<GenerationChunk>> =
            round.into_iter().map(|r| r.map_err(|e| anyhow!(e))).collect();
        Ok(futures::stream::iter(items).boxed())
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<Generation> {
        self.requests.lock().unwrap().push(request.clone());
        self.generations
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted generation left"))?
            .map_err(|e| anyhow!(e))
    }
}

pub type ChunkSender = mpsc::UnboundedSender<Result<GenerationChunk>>;

/// Provider whose streams are fed by the test through channels, one stream
/// per `stream` call
pub struct ChannelProvider {
    receivers: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<GenerationChunk>>>>,
}

impl ChannelProvider {
    pub fn new() -> (Self, ChunkSender) {
        let (provider, mut senders) = Self::with_streams(1);
        (provider, senders.remove(0))
    }

    pub fn with_streams(count: usize) -> (Self, Vec<ChunkSender>) {
        let (senders, receivers): (Vec<_>, VecDeque<_>) =
            (0..count).map(|_| mpsc::unbounded_channel()).unzip();
        (
            Self {
                receivers: Mutex::new(receivers),
            },
            senders,
        )
    }
}

#[async_trait]
impl ChatProvider for ChannelProvider {
    fn name(&self) -> &str {
        "channel"
    }

    async fn stream(&self, _request: &ModelRequest) -> Result<ChunkStream> {
        let receiver = self
            .receivers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no channel stream left"))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }

    async fn invoke(&self, _request: &ModelRequest) -> Result<Generation> {
        Err(anyhow!("channel provider only streams"))
    }
}

pub fn text(s: &str) -> std::result::Result<GenerationChunk, String> {
    Ok(GenerationChunk::text(s))
}

pub fn tool_call_chunk(id: &str, name: &str, arguments: Value) -> std::result::Result<GenerationChunk, String> {
    Ok(GenerationChunk {
        tool_calls: vec![ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        ..Default::default()
    })
}

/// Tool that returns a fixed answer
pub struct FixedTool {
    pub name: String,
    pub answer: Value,
}

impl FixedTool {
    pub fn new(name: &str, answer: Value) -> Self {
        Self {
            name: name.to_string(),
            answer,
        }
    }
}

#[async_trait]
impl ToolBinding for FixedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed answer"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> Result<Value> {
        Ok(self.answer.clone())
    }
}

/// Tool that blocks until the test releases it
pub struct GatedTool {
    pub name: String,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl ToolBinding for GatedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Waits until released"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> Result<Value> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(json!("released"))
    }
}
