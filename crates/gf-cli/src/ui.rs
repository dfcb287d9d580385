//! Plain-text rendering of messages, typing indicators and summary progress

use chrono::{DateTime, Local};
use gf_client::Message;
use gf_sync::{ChatStore, SummaryState};
use std::collections::HashSet;
use std::io::Write;

/// Local wall-clock time of a millisecond timestamp
fn format_time(timestamp: i64) -> String {
    DateTime::from_timestamp_millis(timestamp)
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

/// One line per message: `[HH:MM] Name: content`
pub fn format_message(store: &ChatStore, message: &Message) -> String {
    let mut line = format!(
        "[{}] {}: {}",
        format_time(message.timestamp),
        store.sender_name(&message.sender_id),
        message.content
    );
    if let Some(parent) = message.reply_to_id.as_deref() {
        let target = store
            .message(parent)
            .map(|m| store.sender_name(&m.sender_id))
            .unwrap_or(parent);
        line.push_str(&format!(" (reply to {})", target));
    }
    line
}

/// Typing indicator text, or `None` when nobody else is typing
pub fn format_typing(store: &ChatStore, user_ids: &[String]) -> Option<String> {
    let me = store.current_user.as_ref().map(|u| u.id.as_str());
    let names: Vec<&str> = user_ids
        .iter()
        .filter(|id| Some(id.as_str()) != me)
        .map(|id| store.sender_name(id))
        .collect();

    match names.as_slice() {
        [] => None,
        [one] => Some(format!("{} is typing...", one)),
        [a, b] => Some(format!("{} and {} are typing...", a, b)),
        many => Some(format!("{} people are typing...", many.len())),
    }
}

/// Prints each message once, in the order it first appears
#[derive(Debug, Default)]
pub struct MessagePrinter {
    seen: HashSet<String>,
}

impl MessagePrinter {
    /// Messages not printed before, marking them as seen
    pub fn take_unseen<'a>(&mut self, messages: &'a [Message]) -> Vec<&'a Message> {
        messages
            .iter()
            .filter(|m| self.seen.insert(m.id.clone()))
            .collect()
    }

    pub fn print_new(&mut self, store: &ChatStore, messages: &[Message]) {
        for message in self.take_unseen(messages) {
            println!("{}", format_message(store, message));
        }
    }
}

/// Streams summary progress: reasoning to stderr, the answer to stdout
#[derive(Debug, Default)]
pub struct SummaryPrinter {
    reasoning: String,
    output: String,
}

impl SummaryPrinter {
    pub fn update(&mut self, state: &SummaryState) {
        if let Some(delta) = appended(&self.reasoning, &state.reasoning_text) {
            if self.reasoning.is_empty() {
                eprintln!("[thinking]");
            }
            eprint!("{}", delta);
            self.reasoning = state.reasoning_text.clone();
        }
        if let Some(delta) = appended(&self.output, &state.output_text) {
            if self.output.is_empty() {
                if !self.reasoning.is_empty() {
                    eprintln!();
                }
                println!("Summary:");
            }
            print!("{}", delta);
            let _ = std::io::stdout().flush();
            self.output = state.output_text.clone();
        }
    }

    /// Print whatever the incremental updates could not, then end the line
    pub fn finish(&mut self, state: &SummaryState) {
        self.update(state);
        if self.output != state.output_text {
            println!();
            println!("Summary:");
            print!("{}", state.output_text);
            self.output = state.output_text.clone();
        }
        if !self.output.is_empty() {
            println!();
        }
    }
}

/// Text appended to `printed` to reach `current`, if it only grew
fn appended<'a>(printed: &str, current: &'a str) -> Option<&'a str> {
    current.strip_prefix(printed).filter(|delta| !delta.is_empty())
}
