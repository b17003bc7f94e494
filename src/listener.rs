//! Stdin line-protocol event source.
//!
//! Thin collaborator plumbing in front of the buffer: one line per event,
//! `text <message>`, `image <path>` or `video <path>`. Anything that can
//! call [`EventBuffer::push`] can stand in for this (a UI-automation
//! callback, a test, another process piping lines in). Media paths are
//! passed through as-is; a listener that downloads attachments itself
//! should save them under the configured media directory and push the
//! resulting paths.

use crate::events::{ChatEvent, EventBuffer};
use std::io::BufRead;
use std::thread;
use tracing::{info, warn};

/// Spawn the blocking listener thread. It runs until stdin closes.
pub fn spawn_stdin_listener(buffer: EventBuffer) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("listener read error: {e}");
                    break;
                }
            };
            match parse_line(&line) {
                Some(event) => {
                    info!("event received: {:?}", event.kind);
                    buffer.push(event);
                }
                None if line.trim().is_empty() => {}
                None => warn!("unrecognized input line: {line}"),
            }
        }
        info!("listener input closed");
    })
}

fn parse_line(line: &str) -> Option<ChatEvent> {
    let line = line.trim();
    let (kind, rest) = line.split_once(' ')?;
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }
    match kind {
        "text" => Some(ChatEvent::text(rest)),
        "image" => Some(ChatEvent::image(rest)),
        "video" => Some(ChatEvent::video(rest)),
        _ => None,
    }
}
