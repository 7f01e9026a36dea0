use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Entries kept after compaction.
pub const LOG_WINDOW: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Developer,
}

/// One record of the conversation exchanged with the routing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    Message {
        role: Role,
        content: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

impl LogEntry {
    pub fn user(content: impl Into<String>) -> Self {
        LogEntry::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        LogEntry::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Keeps the last `window` entries, dropping any call output whose call did
/// not survive the cut (or never preceded it).
pub fn compact(log: &[LogEntry], window: usize) -> Vec<LogEntry> {
    let start = log.len().saturating_sub(window);
    let mut seen_calls: HashSet<&str> = HashSet::new();
    let mut compacted = Vec::with_capacity(log.len() - start);

    for entry in &log[start..] {
        match entry {
            LogEntry::FunctionCall { call_id, .. } => {
                seen_calls.insert(call_id.as_str());
                compacted.push(entry.clone());
            }
            LogEntry::FunctionCallOutput { call_id, .. } => {
                if seen_calls.contains(call_id.as_str()) {
                    compacted.push(entry.clone());
                } else {
                    tracing::debug!("Dropping orphaned function_call_output {}", call_id);
                }
            }
            LogEntry::Message { .. } => compacted.push(entry.clone()),
        }
    }

    compacted
}
