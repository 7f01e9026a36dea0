//! Turn orchestration against the routing endpoint, including the local
//! `ui_show_videos` tool round trip.

pub mod log;
pub mod reply;
pub mod tools;
pub mod transport;

use anyhow::{Context, Result};
use std::sync::Arc;

use self::log::LogEntry;
use self::reply::parse_reply_text;
use self::tools::{resolve_call, VideoQueue};
use self::transport::{RouterResponse, RouterTransport};
use crate::catalog::VideoCatalog;
use crate::progress::Act;

pub const EMPTY_REPLY: &str = "Squeak? My thoughts scattered like sunflower seeds. Say that again?";

/// Result of one turn, ready for the controller to apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub chips: Option<Vec<String>>,
    pub next_log: Vec<LogEntry>,
    pub pending_video_queues: Vec<VideoQueue>,
    pub show_all_videos: Option<bool>,
    pub dark_mode_enabled: Option<bool>,
    pub show_contact_card: Option<bool>,
    pub show_profile_card: Option<bool>,
    pub advance_act: Option<Act>,
}

impl TurnReply {
    fn merge_flags(&mut self, response: &RouterResponse) {
        if response.chips.is_some() {
            self.chips = response.chips.clone();
        }
        self.show_all_videos = response.show_all_videos.or(self.show_all_videos);
        self.dark_mode_enabled = response.dark_mode_enabled.or(self.dark_mode_enabled);
        self.show_contact_card = response.show_contact_card.or(self.show_contact_card);
        self.show_profile_card = response.show_profile_card.or(self.show_profile_card);
        self.advance_act = response.advance_act.or(self.advance_act);
    }

    /// Applies a JSON-shaped completion (`{"text", "chips", ...}`) on top of
    /// the response-level flags.
    fn apply_text(&mut self, raw: &str) {
        let parsed = parse_reply_text(raw);
        self.text = parsed.text;
        if parsed.chips.is_some() {
            self.chips = parsed.chips;
        }
        self.show_all_videos = parsed.show_all_videos.or(self.show_all_videos);
        self.dark_mode_enabled = parsed.dark_mode_enabled.or(self.dark_mode_enabled);
        self.show_contact_card = parsed.show_contact_card.or(self.show_contact_card);
        self.show_profile_card = parsed.show_profile_card.or(self.show_profile_card);
    }
}

#[derive(Clone)]
pub struct RouterClient {
    transport: Arc<dyn RouterTransport>,
    catalog: Arc<dyn VideoCatalog>,
}

impl RouterClient {
    pub fn new(transport: Arc<dyn RouterTransport>, catalog: Arc<dyn VideoCatalog>) -> Self {
        Self { transport, catalog }
    }

    pub fn transport(&self) -> &Arc<dyn RouterTransport> {
        &self.transport
    }

    /// Runs one turn. `log` is never modified; the extended conversation comes
    /// back in `next_log`.
    pub async fn send_turn(
        &self,
        log: &[LogEntry],
        user_text: &str,
        synthetic: Option<&str>,
    ) -> Result<TurnReply> {
        let mut next_log = log.to_vec();
        next_log.push(LogEntry::user(user_text));
        if let Some(extra) = synthetic.map(str::trim).filter(|s| !s.is_empty()) {
            next_log.push(LogEntry::user(extra));
        }

        let first = self
            .transport
            .route(&next_log)
            .await
            .context("Router request failed")?;

        let mut reply = TurnReply::default();
        reply.merge_flags(&first);
        let first_text = first.message_text();
        if !first_text.trim().is_empty() {
            next_log.push(LogEntry::assistant(first_text.clone()));
        }

        let calls: Vec<(String, String, String)> = first
            .function_calls()
            .map(|(id, name, args)| (id.to_string(), name.to_string(), args.to_string()))
            .collect();

        if calls.is_empty() {
            reply.apply_text(&first_text);
            return Ok(finish(reply, next_log));
        }

        for (call_id, name, arguments) in &calls {
            next_log.push(LogEntry::FunctionCall {
                call_id: call_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            });
        }
        for (call_id, name, arguments) in &calls {
            let resolved = resolve_call(name, arguments, self.catalog.as_ref());
            if let Some(queue) = resolved.queue {
                reply.pending_video_queues.push(queue);
            }
            next_log.push(LogEntry::FunctionCallOutput {
                call_id: call_id.clone(),
                output: resolved.ack.to_output_string(),
            });
        }

        tracing::debug!(
            "Resolved {} tool call(s), requesting follow-up",
            calls.len()
        );
        let follow_up = self
            .transport
            .route(&next_log)
            .await
            .context("Router follow-up request failed")?;

        let ignored = follow_up.function_calls().count();
        if ignored > 0 {
            tracing::warn!("Ignoring {} tool call(s) in follow-up reply", ignored);
        }

        // First-reply values stay unless the follow-up sets them again.
        reply.apply_text(&first_text);
        reply.merge_flags(&follow_up);
        let follow_text = follow_up.message_text();
        if !follow_text.trim().is_empty() {
            next_log.push(LogEntry::assistant(follow_text.clone()));
            reply.apply_text(&follow_text);
        }

        Ok(finish(reply, next_log))
    }
}

fn finish(mut reply: TurnReply, next_log: Vec<LogEntry>) -> TurnReply {
    if reply.text.trim().is_empty() {
        tracing::warn!("Router returned an empty completion");
        reply.text = EMPTY_REPLY.to_string();
    }
    reply.next_log = next_log;
    reply
}
