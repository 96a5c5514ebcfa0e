// Run and resume commands - drive a thread and stream its events

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use futures::StreamExt;
use threadloop_core::{
    AgentEvent, AgentLoop, CheckpointStore, EventStream, FileCheckpointStore, MockLlmProvider,
    StreamMode, ToolRegistry,
};

use crate::commands::describe_message;
use crate::output::OutputFormat;
use crate::script::Script;

type CliAgent = AgentLoop<FileCheckpointStore, MockLlmProvider, ToolRegistry>;

pub struct RunArgs {
    pub thread: String,
    pub script: PathBuf,
    pub mode: StreamMode,
}

pub fn parse_mode(s: &str) -> StreamMode {
    match s {
        "tokens" => StreamMode::Tokens,
        _ => StreamMode::Steps,
    }
}

fn build_agent(
    store: FileCheckpointStore,
    script: &Script,
    provider: MockLlmProvider,
) -> Result<CliAgent> {
    Ok(AgentLoop::new(
        script.config()?,
        store,
        provider,
        script.registry()?,
    ))
}

pub async fn submit(
    store: FileCheckpointStore,
    args: RunArgs,
    message: String,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let script = Script::load(&args.script)?;
    // The new user message opens a turn, so the script starts over
    let agent = build_agent(store, &script, script.provider())?;

    if !quiet && output.is_text() {
        println!("You: {}\n", message);
    }

    let events = agent.submit_streaming(&args.thread, message, args.mode);
    render(&agent, &args.thread, events, output, quiet).await
}

pub async fn resume(
    store: FileCheckpointStore,
    args: RunArgs,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let script = Script::load(&args.script)?;
    let state = store.load(&args.thread).await?;
    let provider = script.provider_for(state.messages());
    let agent = build_agent(store, &script, provider)?;

    let events = agent.resume_streaming(&args.thread, args.mode);
    render(&agent, &args.thread, events, output, quiet).await
}

async fn render(
    agent: &CliAgent,
    thread_id: &str,
    mut events: EventStream,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let mut seen = 0usize;
    let mut mid_line = false;
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                if mid_line {
                    println!();
                }
                return Err(e.into());
            }
        };
        seen += 1;

        if !output.is_text() {
            output.print_line(&event)?;
            continue;
        }

        match event {
            AgentEvent::Token(token) => {
                print!("{}", token.text);
                stdout.flush()?;
                mid_line = true;
            }
            AgentEvent::Step(step) => {
                for message in &step.messages {
                    if !quiet {
                        println!("{}", describe_message(message));
                    } else if message.is_final_answer() {
                        println!("{}", message.content);
                    }
                }
            }
        }
    }

    if mid_line {
        println!();
    }

    // A finalized thread resumes without events
    if seen == 0 && output.is_text() {
        let state = agent.checkpoint_store().load(thread_id).await?;
        if let Some(answer) = state.final_response() {
            println!("{}", answer);
        }
    }

    Ok(())
}
