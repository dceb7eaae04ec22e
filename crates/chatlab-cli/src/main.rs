mod repl;
mod time_tool;

use anyhow::{Context, Result};
use chatlab_common::{PlaygroundConfig, SystemClock};
use chatlab_core::{ConversationHistory, ConversationPersistence, InMemoryConversationStore};
use chatlab_llm::{
    GenaiProvider, InMemoryDocumentRetriever, RetrievedDocument, StreamDispatcher, StreamEngine,
    ToolBinding, build_filter_expression,
};
use clap::Parser;
use colored::*;
use repl::{Repl, ReplOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time_tool::CurrentTimeTool;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the chatlab CLI
#[derive(Parser)]
#[command(
    name = "chatlab",
    about = "chatlab - conversational AI playground with live streaming responses"
)]
pub struct Args {
    /// Conversation to resume (id or list number)
    resume: Option<String>,

    /// Path to the config file
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Path to the data directory
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Model to use for new conversations
    #[clap(short, long)]
    model: Option<String>,

    /// System prompt for new conversations
    #[clap(long)]
    system_prompt: Option<String>,

    /// Directory of text documents available for retrieval (file stem = document id)
    #[clap(long)]
    docs: Option<PathBuf>,

    /// Raw retrieval filter expression
    #[clap(long, conflicts_with = "doc_id")]
    filter: Option<String>,

    /// Restrict retrieval to these document ids
    #[clap(long = "doc-id")]
    doc_id: Vec<String>,

    /// Wait for the full response instead of streaming it
    #[clap(long)]
    no_stream: bool,

    /// Offer the built-in tools to the model
    #[clap(long)]
    tools: bool,
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load every regular file of `dir` as a retrievable document
fn load_documents(dir: &Path) -> Result<Vec<RetrievedDocument>> {
    let mut documents = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Cannot read docs dir {:?}", dir))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => documents.push(RetrievedDocument::new(id, text)),
            Err(e) => warn!("Skipping document {:?}: {}", path, e),
        }
    }
    Ok(documents)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dotenvy::dotenv().ok();

    let mut config = PlaygroundConfig::load(args.config.as_deref())?;
    init_tracing(if args.debug {
        "debug"
    } else {
        config.base.log_level.as_str()
    });

    if let Some(data_dir) = &args.data_dir {
        config.base.data_dir = data_dir.to_string_lossy().to_string();
    }
    if let Some(model) = &args.model {
        config.chat.options.model = Some(model.clone());
    }
    if let Some(system_prompt) = &args.system_prompt {
        config.chat.system_prompt = Some(system_prompt.clone());
    }

    let save_dir = config.chat_save_dir();
    std::fs::create_dir_all(&save_dir)?;
    info!("Starting chatlab CLI");
    info!("Conversation directory: {:?}", save_dir);
    info!("Provider: {}", config.provider.name);

    let history = Arc::new(
        ConversationHistory::new(Arc::new(InMemoryConversationStore::new()), Arc::new(SystemClock))
            .with_persistence(Arc::new(ConversationPersistence::new(save_dir))),
    );
    let loaded = history.load_all().await?;
    info!("Loaded {} conversations", loaded);

    let provider = Arc::new(GenaiProvider::new(&config.provider)?);
    let mut dispatcher = StreamDispatcher::new(provider)
        .with_max_tool_rounds(config.engine.max_tool_rounds)
        .with_buffer_size(config.engine.update_buffer);
    if let Some(docs) = &args.docs {
        let documents = load_documents(docs)?;
        info!("Loaded {} documents for retrieval", documents.len());
        dispatcher = dispatcher.with_retriever(Arc::new(InMemoryDocumentRetriever::new(documents)));
    }
    let engine = StreamEngine::new(history.clone(), dispatcher)
        .with_update_buffer(config.engine.update_buffer);

    let tools: Vec<Arc<dyn ToolBinding>> = if args.tools {
        vec![Arc::new(CurrentTimeTool)]
    } else {
        Vec::new()
    };
    let options = ReplOptions {
        stream: !args.no_stream,
        retrieval_filter: args
            .filter
            .clone()
            .or_else(|| build_filter_expression(&args.doc_id)),
        tools,
        system_prompt: config.chat.system_prompt.clone(),
        chat_options: config.chat.options.clone(),
        idle_timeout: config.provider.timeout_seconds.map(Duration::from_secs),
    };

    let mut repl = Repl::new(engine, options);
    if let Some(reference) = &args.resume {
        if let Err(e) = repl.resume(reference).await {
            println!("{}", format!("❌ Cannot resume {}: {:#}", reference, e).red());
        }
    }
    let result = repl.run().await;

    let saved = history.save_all().await?;
    info!("Saved {} conversations", saved);
    result
}
