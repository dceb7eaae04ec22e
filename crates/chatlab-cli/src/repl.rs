//! Interactive conversation loop
//!
//! Reads prompts and slash commands from stdin, streams responses through
//! the engine and renders display updates as they arrive. Ctrl-C while a
//! response is streaming cancels that response; Ctrl-C at the prompt exits.

use anyhow::{Result, anyhow};
use chatlab_common::{ChatOptions, format_local_timestamp};
use chatlab_core::{Conversation, Role};
use chatlab_llm::{
    SegmentKind, SegmentUpdate, StreamEngine, StreamHandle, StreamOutcome, StreamReport,
    SubmitRequest, ToolBinding, replay_message,
};
use colored::*;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, warn};

/// A parsed line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Prompt(String),
    New,
    List,
    Show,
    Resume(String),
    Delete(String),
    Rename(String),
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(input: &str) -> Command {
    let input = input.trim();
    let Some(rest) = input.strip_prefix('/') else {
        return match input.to_lowercase().as_str() {
            "quit" | "exit" => Command::Quit,
            _ => Command::Prompt(input.to_string()),
        };
    };
    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    match (name.to_lowercase().as_str(), argument) {
        ("new", _) => Command::New,
        ("list" | "ls", _) => Command::List,
        ("show", _) => Command::Show,
        ("resume", id) if !id.is_empty() => Command::Resume(id.to_string()),
        ("delete" | "rm", id) if !id.is_empty() => Command::Delete(id.to_string()),
        ("rename", title) if !title.is_empty() => Command::Rename(title.to_string()),
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit", _) => Command::Quit,
        _ => Command::Unknown(input.to_string()),
    }
}

pub struct ReplOptions {
    pub stream: bool,
    pub retrieval_filter: Option<String>,
    pub tools: Vec<Arc<dyn ToolBinding>>,
    pub system_prompt: Option<String>,
    pub chat_options: ChatOptions,
    /// Cancel a streaming response after this long without updates
    pub idle_timeout: Option<Duration>,
}

pub struct Repl {
    engine: StreamEngine,
    options: ReplOptions,
    current: Option<String>,
}

impl Repl {
    pub fn new(engine: StreamEngine, options: ReplOptions) -> Self {
        Self {
            engine,
            options,
            current: None,
        }
    }

    pub async fn resume(&mut self, reference: &str) -> Result<()> {
        let conversations = self.engine.history().list().await?;
        let conversation = match reference.parse::<usize>() {
            Ok(index) if index >= 1 && index <= conversations.len() => {
                conversations[index - 1].clone()
            }
            _ => self.engine.history().require(reference).await?,
        };
        println!(
            "{} {}",
            "Resumed:".bright_yellow(),
            conversation.display_title().bright_green().bold()
        );
        self.current = Some(conversation.conversation_id.clone());
        show_conversation(&conversation);
        Ok(())
    }

    pub async fn run(&mut self) -> Result<()> {
        println!(
            "{}",
            "💬 chatlab ready. Type a prompt, /help for commands, /quit to leave.".bright_green()
        );
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            print!("{}", "You: ".bright_cyan().bold());
            io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    None
                }
            };
            let Some(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            let result = match parse_command(&line) {
                Command::Quit => break,
                Command::Prompt(prompt) => self.prompt(&prompt).await,
                Command::New => {
                    self.current = None;
                    println!("{}", "Started a new conversation.".bright_yellow());
                    Ok(())
                }
                Command::List => self.list().await,
                Command::Show => self.show().await,
                Command::Resume(reference) => self.resume(&reference).await,
                Command::Delete(reference) => self.delete(&reference).await,
                Command::Rename(title) => self.rename(&title).await,
                Command::Help => {
                    print_help();
                    Ok(())
                }
                Command::Unknown(input) => {
                    println!("{}", format!("❌ Unknown command: {}", input).red());
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!("Command failed: {:#}", e);
                println!("{}", format!("❌ {:#}", e).red());
            }
        }

        println!("{}", "👋 Goodbye!".bright_green());
        Ok(())
    }

    async fn current_conversation(&mut self) -> Result<String> {
        if let Some(id) = &self.current {
            return Ok(id.clone());
        }
        let conversation = self
            .engine
            .history()
            .create(
                self.options.system_prompt.clone(),
                self.options.chat_options.clone(),
            )
            .await?;
        debug!("Started conversation {}", conversation.conversation_id);
        self.current = Some(conversation.conversation_id.clone());
        Ok(conversation.conversation_id)
    }

    async fn prompt(&mut self, prompt: &str) -> Result<()> {
        let conversation_id = self.current_conversation().await?;
        let request = SubmitRequest::new(conversation_id, prompt)
            .with_filter(self.options.retrieval_filter.clone())
            .with_tools(self.options.tools.clone());

        let report = if self.options.stream {
            self.stream(request).await?
        } else {
            let report = self.engine.call(request).await?;
            render_report(&report);
            report
        };

        match &report.outcome {
            StreamOutcome::Completed => {}
            StreamOutcome::Cancelled => println!("{}", "[response cancelled]".yellow()),
            StreamOutcome::Failed(message) => {
                println!("{}", format!("❌ Provider error: {}", message).red())
            }
        }
        println!();
        Ok(())
    }

    async fn stream(&self, request: SubmitRequest) -> Result<StreamReport> {
        let mut handle = self.engine.submit(request).await?;
        let mut renderer = UpdateRenderer::default();

        loop {
            tokio::select! {
                update = next_update(&mut handle, self.options.idle_timeout) => match update {
                    Some(Some(update)) => renderer.render(&update)?,
                    Some(None) => break,
                    None => {
                        warn!("No response activity for {:?}, cancelling", self.options.idle_timeout);
                        handle.cancel();
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    if handle.cancel() {
                        debug!("Cancel requested for session {}", handle.session_id());
                    }
                }
            }
        }
        println!();
        handle.wait().await
    }

    async fn list(&self) -> Result<()> {
        let conversations = self.engine.history().list().await?;
        if conversations.is_empty() {
            println!("{}", "No conversations yet.".bright_yellow());
            return Ok(());
        }
        for (i, conversation) in conversations.iter().enumerate() {
            let marker = if self.current.as_deref() == Some(conversation.conversation_id.as_str()) {
                "*"
            } else {
                " "
            };
            println!(
                "{}{}. {} ({}) - {}",
                marker,
                (i + 1).to_string().bright_yellow(),
                conversation.display_title().bright_green().bold(),
                conversation.conversation_id.bright_blue(),
                format_local_timestamp(conversation.update_timestamp)
            );
        }
        Ok(())
    }

    async fn show(&self) -> Result<()> {
        let id = self
            .current
            .as_deref()
            .ok_or_else(|| anyhow!("No active conversation"))?;
        let conversation = self.engine.history().require(id).await?;
        show_conversation(&conversation);
        Ok(())
    }

    async fn delete(&mut self, reference: &str) -> Result<()> {
        let conversations = self.engine.history().list().await?;
        let id = match reference.parse::<usize>() {
            Ok(index) if index >= 1 && index <= conversations.len() => {
                conversations[index - 1].conversation_id.clone()
            }
            _ => reference.to_string(),
        };
        if self.engine.history().delete(&id).await? {
            if self.current.as_deref() == Some(id.as_str()) {
                self.current = None;
            }
            println!("{}", format!("Deleted {}", id).bright_yellow());
        } else {
            println!("{}", format!("❌ No conversation {}", id).red());
        }
        Ok(())
    }

    async fn rename(&self, title: &str) -> Result<()> {
        let id = self
            .current
            .as_deref()
            .ok_or_else(|| anyhow!("No active conversation"))?;
        let conversation = self.engine.history().rename(id, title).await?;
        println!(
            "{} {}",
            "Renamed to".bright_yellow(),
            conversation.display_title().bright_green().bold()
        );
        Ok(())
    }
}

/// `None` when `limit` passed without an update
async fn next_update(
    handle: &mut StreamHandle,
    limit: Option<Duration>,
) -> Option<Option<SegmentUpdate>> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, handle.next_update()).await.ok(),
        None => Some(handle.next_update().await),
    }
}

/// Prints display updates inline as they arrive
#[derive(Default)]
struct UpdateRenderer {
    current: Option<SegmentKind>,
}

impl UpdateRenderer {
    fn render(&mut self, update: &SegmentUpdate) -> Result<()> {
        match update {
            SegmentUpdate::Opened { kind, .. } => {
                if self.current.is_some() {
                    println!();
                }
                print!("{}", segment_label(*kind));
                self.current = Some(*kind);
            }
            SegmentUpdate::Appended { kind, text } => {
                if self.current != Some(*kind) {
                    println!();
                    print!("{}", segment_label(*kind));
                    self.current = Some(*kind);
                }
                print!("{}", paint(*kind, text));
            }
            SegmentUpdate::Closed { kind, .. } => {
                if self.current == Some(*kind) {
                    println!();
                    self.current = None;
                }
            }
            SegmentUpdate::CollapseToolActivity => {
                if self.current == Some(SegmentKind::ToolActivity) {
                    println!();
                    self.current = None;
                }
            }
        }
        io::stdout().flush()?;
        Ok(())
    }
}

fn segment_label(kind: SegmentKind) -> ColoredString {
    match kind {
        SegmentKind::Answer => "Assistant: ".bright_green().bold(),
        SegmentKind::Reasoning => "💭 Thinking: ".bright_black().bold(),
        SegmentKind::ToolActivity => "🔧 Tools: ".bright_magenta().bold(),
    }
}

fn paint(kind: SegmentKind, text: &str) -> ColoredString {
    match kind {
        SegmentKind::Answer => text.normal(),
        SegmentKind::Reasoning => text.bright_black(),
        SegmentKind::ToolActivity => text.magenta(),
    }
}

fn render_report(report: &StreamReport) {
    if let Some(tool_activity) = &report.tool_activity {
        println!("{}{}", segment_label(SegmentKind::ToolActivity), paint(SegmentKind::ToolActivity, tool_activity));
    }
    if let Some(reasoning) = &report.reasoning {
        println!("{}{}", segment_label(SegmentKind::Reasoning), paint(SegmentKind::Reasoning, reasoning));
    }
    println!("{}{}", segment_label(SegmentKind::Answer), report.answer);
}

fn show_conversation(conversation: &Conversation) {
    println!(
        "{} {} ({})",
        "Conversation:".bright_yellow(),
        conversation.display_title().bright_green().bold(),
        conversation.conversation_id.bright_blue()
    );
    if let Some(system_prompt) = &conversation.system_prompt {
        println!("{} {}", "System:".bright_yellow(), system_prompt);
    }
    for message in &conversation.messages {
        let when = message
            .timestamp()
            .map(format_local_timestamp)
            .unwrap_or_default();
        match message.role {
            Role::User => println!("{} {} {}", "You:".bright_cyan().bold(), message.text, when.dimmed()),
            Role::Assistant => match replay_message(message) {
                Ok(segments) => {
                    for segment in segments {
                        println!("{}{}", segment_label(segment.kind), paint(segment.kind, &segment.text));
                    }
                    if !when.is_empty() {
                        println!("{}", when.dimmed());
                    }
                }
                Err(e) => {
                    warn!("Could not replay message: {}", e);
                    println!("{}{}", segment_label(SegmentKind::Answer), message.text);
                }
            },
            Role::System | Role::Tool => println!("{} {}", format!("{}:", message.role).bright_yellow(), message.text),
        }
    }
    println!();
}

fn print_help() {
    println!("{}", "Commands:".bright_cyan().bold());
    for (command, help) in [
        ("/new", "start a new conversation"),
        ("/list", "list saved conversations"),
        ("/show", "show the current conversation"),
        ("/resume <n|id>", "continue a conversation"),
        ("/delete <n|id>", "delete a conversation"),
        ("/rename <title>", "rename the current conversation"),
        ("/quit", "save and exit"),
    ] {
        println!("  {} {}", command.bright_yellow(), help);
    }
    println!("{}", "Ctrl-C stops a streaming response.".bright_black());
}
