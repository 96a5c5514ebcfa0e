// Thread inspection commands

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;
use threadloop_core::{Checkpoint, CheckpointStore, FileCheckpointStore};

use crate::commands::describe_message;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

pub async fn history(
    store: &FileCheckpointStore,
    thread_id: &str,
    output: OutputFormat,
) -> Result<()> {
    let messages = store.load(thread_id).await?.into_messages();

    if output.is_text() {
        if messages.is_empty() {
            println!("No messages in thread {}", thread_id);
            return Ok(());
        }
        for message in &messages {
            println!("{}", describe_message(message));
        }
    } else {
        output.print_value(&ListResponse { data: messages })?;
    }

    Ok(())
}

pub async fn checkpoints(
    store: &FileCheckpointStore,
    thread_id: &str,
    output: OutputFormat,
) -> Result<()> {
    let mut listing = store.list_checkpoints(thread_id);

    if !output.is_text() {
        let mut data: Vec<Checkpoint> = Vec::new();
        while let Some(checkpoint) = listing.next().await {
            data.push(checkpoint?);
        }
        return output.print_value(&ListResponse { data });
    }

    let mut printed_header = false;
    while let Some(checkpoint) = listing.next().await {
        let checkpoint = checkpoint?;
        if !printed_header {
            print_table_header(&[("STEP", 6), ("KIND", 22), ("MESSAGES", 8), ("CREATED", 30)]);
            printed_header = true;
        }
        print_table_row(&[
            (&checkpoint.step.to_string(), 6),
            (&checkpoint.kind.to_string(), 22),
            (&checkpoint.message_count().to_string(), 8),
            (&checkpoint.created_at.to_rfc3339(), 30),
        ]);
    }

    if !printed_header {
        println!("No checkpoints for thread {}", thread_id);
    }
    Ok(())
}

pub async fn list(store: &FileCheckpointStore, output: OutputFormat) -> Result<()> {
    let threads = store.threads().await?;

    if output.is_text() {
        if threads.is_empty() {
            println!("No threads found");
            return Ok(());
        }

        print_table_header(&[("THREAD", 40), ("STEP", 6), ("KIND", 22)]);
        for thread_id in &threads {
            let latest = store.latest(thread_id).await?;
            let (step, kind) = match &latest {
                Some(checkpoint) => (checkpoint.step.to_string(), checkpoint.kind.to_string()),
                None => ("-".to_string(), "-".to_string()),
            };
            print_table_row(&[(thread_id, 40), (&step, 6), (&kind, 22)]);
        }
    } else {
        output.print_value(&ListResponse { data: threads })?;
    }

    Ok(())
}

pub async fn delete(
    store: &FileCheckpointStore,
    thread_id: &str,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    store.delete_thread(thread_id).await?;

    if output.is_text() {
        if !quiet {
            print_field("Deleted", thread_id);
        }
    } else {
        output.print_value(&serde_json::json!({ "deleted": thread_id }))?;
    }

    Ok(())
}
