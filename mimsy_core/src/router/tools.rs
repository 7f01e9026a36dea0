//! Local execution of the single UI tool the router may call.

use serde::{Deserialize, Serialize};

use crate::catalog::VideoCatalog;

pub const SHOW_VIDEOS_TOOL: &str = "ui_show_videos";
pub const MAX_SHOWN_VIDEOS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayKind {
    Hero,
    Grid,
}

/// Videos the UI should put on screen once the turn is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoQueue {
    pub kind: DisplayKind,
    pub video_ids: Vec<String>,
}

/// Acknowledgement returned to the model as the `function_call_output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<DisplayKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolAck {
    fn shown(queue: &VideoQueue) -> Self {
        Self {
            ok: true,
            kind: Some(queue.kind),
            video_ids: queue.video_ids.clone(),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            kind: None,
            video_ids: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn to_output_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCall {
    pub ack: ToolAck,
    pub queue: Option<VideoQueue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShowVideosArgs {
    #[serde(default, alias = "video_ids")]
    video_ids: Vec<String>,
}

/// Runs one function call locally. Never fails: problems become a failure
/// acknowledgement so the model can respond to them.
pub fn resolve_call(name: &str, arguments: &str, catalog: &dyn VideoCatalog) -> ResolvedCall {
    if name != SHOW_VIDEOS_TOOL {
        tracing::warn!("Router requested unknown tool '{}'", name);
        return ResolvedCall {
            ack: ToolAck::failed(format!("unknown tool '{}'", name)),
            queue: None,
        };
    }

    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    let args = match serde_json::from_str::<ShowVideosArgs>(raw) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!("Unparseable {} arguments: {}", SHOW_VIDEOS_TOOL, e);
            return ResolvedCall {
                ack: ToolAck::failed(format!("invalid arguments: {}", e)),
                queue: None,
            };
        }
    };

    let requested = args.video_ids.len();
    let video_ids = whitelist(&args.video_ids, catalog);
    if video_ids.is_empty() {
        tracing::warn!(
            "{} requested {} id(s), none in the catalog",
            SHOW_VIDEOS_TOOL,
            requested
        );
        return ResolvedCall {
            ack: ToolAck::failed("no valid video ids"),
            queue: None,
        };
    }

    let kind = if video_ids.len() == 1 {
        DisplayKind::Hero
    } else {
        DisplayKind::Grid
    };
    let queue = VideoQueue { kind, video_ids };
    tracing::debug!(
        "{} accepted {}/{} id(s) as {:?}",
        SHOW_VIDEOS_TOOL,
        queue.video_ids.len(),
        requested,
        kind
    );

    ResolvedCall {
        ack: ToolAck::shown(&queue),
        queue: Some(queue),
    }
}

fn whitelist(requested: &[String], catalog: &dyn VideoCatalog) -> Vec<String> {
    let mut accepted: Vec<String> = Vec::new();
    for id in requested {
        let id = id.trim();
        if id.is_empty() || accepted.iter().any(|existing| existing == id) {
            continue;
        }
        if catalog.contains(id) {
            accepted.push(id.to_string());
        }
        if accepted.len() == MAX_SHOWN_VIDEOS {
            break;
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::catalog;

    #[test]
    fn filters_to_whitelisted_ids_as_grid() {
        let catalog = catalog(&["a", "b"]);
        let resolved = resolve_call(
            SHOW_VIDEOS_TOOL,
            r#"{"videoIds":["a","b","c","d"]}"#,
            &catalog,
        );

        let queue = resolved.queue.expect("queue");
        assert_eq!(queue.kind, DisplayKind::Grid);
        assert_eq!(queue.video_ids, vec!["a", "b"]);

        let output: serde_json::Value =
            serde_json::from_str(&resolved.ack.to_output_string()).unwrap();
        assert_eq!(
            output,
            serde_json::json!({"ok": true, "kind": "grid", "videoIds": ["a", "b"]})
        );
    }

    #[test]
    fn caps_at_three_and_dedupes() {
        let catalog = catalog(&["a", "b", "c", "d"]);
        let resolved = resolve_call(
            SHOW_VIDEOS_TOOL,
            r#"{"videoIds":["a"," a ","b","c","d"]}"#,
            &catalog,
        );
        assert_eq!(resolved.queue.unwrap().video_ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn single_id_is_hero() {
        let catalog = catalog(&["a"]);
        let resolved = resolve_call(SHOW_VIDEOS_TOOL, r#"{"video_ids":["a"]}"#, &catalog);
        assert_eq!(resolved.ack.kind, Some(DisplayKind::Hero));
    }

    #[test]
    fn foreign_ids_produce_failure_ack() {
        let catalog = catalog(&["a"]);
        let resolved = resolve_call(SHOW_VIDEOS_TOOL, r#"{"videoIds":["x","y"]}"#, &catalog);
        assert!(resolved.queue.is_none());
        assert!(!resolved.ack.ok);
        assert_eq!(resolved.ack.error.as_deref(), Some("no valid video ids"));
    }

    #[test]
    fn garbage_arguments_and_unknown_tools_fail_softly() {
        let catalog = catalog(&["a"]);
        let resolved = resolve_call(SHOW_VIDEOS_TOOL, "{videoIds: [a", &catalog);
        assert!(!resolved.ack.ok);
        assert!(resolved.ack.error.unwrap().starts_with("invalid arguments"));

        let resolved = resolve_call("ui_launch_rocket", r#"{"videoIds":["a"]}"#, &catalog);
        assert!(!resolved.ack.ok);
        assert!(resolved.queue.is_none());
    }
}
