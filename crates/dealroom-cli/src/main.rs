//! # dealroom
//!
//! Command-line client for marketplace deal rooms:
//! - read a thread with its contract slots and sale status
//! - send messages, with an optional image attachment
//! - upload contract PDFs, into standard or new custom slots, and co-sign them
//! - open sale requests and follow a thread live

mod cli;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use dealroom_client::{
    init_tracing, ClientConfig, DealRoom, SaleAction, SlotContent, SlotId, VisibleMessage,
};
use dealroom_shared::constants::SALE_REQUEST_POLL_INTERVAL;
use dealroom_shared::{LocalFile, ThreadId};

use crate::cli::{Cli, Command, Stroke};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    cli.apply(&mut config);
    info!(api = %config.api_url, user = ?config.user_id, "Starting dealroom v{}", env!("CARGO_PKG_VERSION"));

    let room = DealRoom::connect(&config)?;

    let result = tokio::select! {
        result = run(&room, cli.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    room.close();
    result
}

async fn run(room: &DealRoom, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Show { thread, with } => {
            let opened = room.open(thread, with).await?;
            print_thread(room, &opened);
        }

        Command::Send { thread, text, image } => {
            room.open(thread, None).await?;
            let attachment = match image {
                Some(path) => Some(read_file(&path).await?),
                None => None,
            };
            let record = room.send(&text, attachment).await?;
            println!("sent {} at {}", record.id, record.created_at);
        }

        Command::Upload { thread, slot, file } => {
            room.open(thread, None).await?;
            let file = read_file(&file).await?;
            let doc = room.registry().upload(&slot, file).await?;
            println!("{slot}: stored {} as {}", doc.file_name, doc.id);
        }

        Command::AddCustom { thread, file } => {
            room.open(thread, None).await?;
            let file = read_file(&file).await?;
            let local = room.registry().add_custom_slot();
            let doc = match room.registry().upload(&local, file).await {
                Ok(doc) => doc,
                Err(e) => {
                    room.registry().remove_custom_slot(&local);
                    return Err(e.into());
                }
            };
            println!(
                "{}: stored {} as {}",
                SlotId::Custom(doc.id.to_string()),
                doc.file_name,
                doc.id
            );
        }

        Command::Sign {
            thread,
            slot,
            placement,
            strokes,
        } => {
            room.open(thread, None).await?;
            let mut session = room.signing_session(&slot)?;
            let strokes = if strokes.is_empty() {
                Stroke::scribble()
            } else {
                strokes
            };

            let capture = session.capture_mut();
            capture.begin()?;
            for Stroke(points) in &strokes {
                let mut points = points.iter();
                if let Some(&(x, y)) = points.next() {
                    capture.pointer_down(x, y);
                    for &(x, y) in points {
                        capture.pointer_move(x, y);
                    }
                    capture.pointer_up();
                }
            }
            capture.complete()?;

            let doc = session.save(placement.map(Into::into)).await?;
            println!(
                "{slot}: {} signature(s), {:?}",
                doc.signatures.len(),
                doc.status(&room.participants())
            );
        }

        Command::Sell {
            thread,
            post,
            price,
            phone,
        } => {
            room.open(thread, None).await?;
            let request = room
                .poller()
                .create_sale_request(post.as_deref(), price, phone)
                .await?;
            println!("sale request {} for {} ({:?})", request.id, request.price, request.status);
        }

        Command::Watch { thread } => {
            let mut events = room.events().subscribe();
            let opened = room.open(thread, None).await?;
            print_thread(room, &opened);

            let mut ticker = tokio::time::interval(SALE_REQUEST_POLL_INTERVAL);
            let mut last_action = None;
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => println!("event: {event:?}"),
                        Err(RecvError::Lagged(skipped)) => println!("missed {skipped} events"),
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => {
                        let action = room.me().map(|me| room.poller().action(me));
                        if action != last_action {
                            println!("sale: {}", describe(action));
                            last_action = action;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_thread(room: &DealRoom, thread: &ThreadId) {
    let view = room.view();
    println!("thread {thread}");
    if let Some(error) = &view.error {
        println!("  error: {error}");
    }

    for message in &view.messages {
        match message {
            VisibleMessage::Confirmed(m) => println!(
                "  [{}] {}: {}{}",
                m.record.created_at.format("%Y-%m-%d %H:%M"),
                m.record.sender_name.as_deref().unwrap_or(m.record.sender_user_id.as_str()),
                m.record.text.as_deref().unwrap_or(""),
                m.attachment_url
                    .as_deref()
                    .map(|url| format!(" <{url}>"))
                    .unwrap_or_default()
            ),
            VisibleMessage::Optimistic(p) => {
                println!("  [sending] {}", p.text.as_deref().unwrap_or(""))
            }
        }
    }

    let participants = room.participants();
    for slot in room.registry().slots() {
        let content = match &slot.content {
            SlotContent::Empty => "empty".to_string(),
            SlotContent::Local { file_name, .. } => format!("uploading {file_name}"),
            SlotContent::Stored(doc) => format!(
                "{} ({:?}, {} signature(s))",
                doc.file_name,
                doc.status(&participants),
                doc.signatures.len()
            ),
        };
        println!("  {:<28} {}  [{}]", slot.label, content, slot.id);
    }

    let action = room.me().map(|me| room.poller().action(me));
    println!("  sale: {}", describe(action));
}

fn describe(action: Option<SaleAction>) -> &'static str {
    match action {
        Some(SaleAction::Sell) => "no pending request",
        Some(SaleAction::Selling) => "your request is pending",
        Some(SaleAction::Purchase) => "counterparty is selling",
        None => "unknown (no user)",
    }
}

async fn read_file(path: &Path) -> anyhow::Result<LocalFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?
        .to_string();
    let content_type = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };
    Ok(LocalFile::new(file_name, content_type, bytes))
}
