use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::log::LogEntry;
use crate::config::MimsyConfig;
use crate::http_client::build_http_client_with_timeout;
use crate::progress::Act;

/// One item of the routing endpoint's `output` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        content: Value,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    #[serde(other)]
    Other,
}

impl OutputItem {
    /// Visible text of a message item. Content is either a plain string or a
    /// list of parts carrying `text`.
    pub fn text(&self) -> Option<String> {
        let OutputItem::Message { content, .. } = self else {
            return None;
        };
        match content {
            Value::String(text) => Some(text.clone()),
            Value::Array(parts) => {
                let joined: String = parts
                    .iter()
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect();
                Some(joined)
            }
            _ => None,
        }
    }

    pub fn is_assistant_message(&self) -> bool {
        match self {
            OutputItem::Message { role, .. } => {
                role.as_deref().map_or(true, |r| r == "assistant")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterResponse {
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub chips: Option<Vec<String>>,
    #[serde(default)]
    pub show_all_videos: Option<bool>,
    #[serde(default)]
    pub dark_mode_enabled: Option<bool>,
    #[serde(default)]
    pub show_contact_card: Option<bool>,
    #[serde(default)]
    pub show_profile_card: Option<bool>,
    #[serde(default, deserialize_with = "lenient_act")]
    pub advance_act: Option<Act>,
}

impl RouterResponse {
    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.output.iter().filter_map(|item| match item {
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => Some((call_id.as_str(), name.as_str(), arguments.as_str())),
            _ => None,
        })
    }

    /// Concatenated assistant message text, falling back to the top-level
    /// `text` field.
    pub fn message_text(&self) -> String {
        let from_output: Vec<String> = self
            .output
            .iter()
            .filter(|item| item.is_assistant_message())
            .filter_map(OutputItem::text)
            .filter(|text| !text.trim().is_empty())
            .collect();
        if !from_output.is_empty() {
            return from_output.join("\n");
        }
        self.text.clone().unwrap_or_default()
    }
}

/// Accepts `"2"`, `2`, `"all"`; anything else is ignored.
fn lenient_act<'de, D>(deserializer: D) -> std::result::Result<Option<Act>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => Act::parse(&s),
        Some(Value::Number(n)) => Act::parse(&n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Act1Response {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub script: Option<Vec<String>>,
    #[serde(default)]
    pub text: Option<String>,
}

impl Act1Response {
    pub fn script_lines(&self) -> Option<Vec<String>> {
        let clean = |lines: Vec<String>| -> Vec<String> {
            lines
                .into_iter()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect()
        };

        if let Some(script) = self.script.clone().map(clean) {
            if !script.is_empty() {
                return Some(script);
            }
        }

        let from_text = self
            .text
            .as_deref()
            .map(|text| clean(text.lines().map(str::to_string).collect()))
            .unwrap_or_default();
        if from_text.is_empty() {
            None
        } else {
            Some(from_text)
        }
    }
}

#[async_trait]
pub trait RouterTransport: Send + Sync {
    async fn route(&self, input: &[LogEntry]) -> Result<RouterResponse>;
    async fn generate_act1(&self, idea: &str) -> Result<Act1Response>;
}

#[derive(Serialize)]
struct RouteRequest<'a> {
    input: &'a [LogEntry],
}

#[derive(Serialize)]
struct Act1Request<'a> {
    idea: &'a str,
}

pub struct HttpRouterTransport {
    http: reqwest::Client,
    router_url: String,
    act1_url: String,
    token: Option<String>,
}

impl HttpRouterTransport {
    pub fn new(
        router_url: impl Into<String>,
        act1_url: impl Into<String>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self {
            http: build_http_client_with_timeout(timeout)?,
            router_url: router_url.into(),
            act1_url: act1_url.into(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_config(config: &MimsyConfig) -> Result<Self> {
        Self::new(
            config.router_url.clone(),
            config.act1_url.clone(),
            config.api_token.clone(),
            Some(Duration::from_secs(config.request_timeout_secs)),
        )
    }

    async fn post_json<B, T>(&self, url: &str, body: &B, what: &str) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let mut req = self.http.post(url).json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} endpoint returned error {}: {}", what, status, body);
        }

        let payload = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", what))?;
        serde_json::from_str(&payload).with_context(|| {
            format!(
                "Failed to parse {} response: {}",
                what,
                payload.chars().take(200).collect::<String>()
            )
        })
    }
}

#[async_trait]
impl RouterTransport for HttpRouterTransport {
    async fn route(&self, input: &[LogEntry]) -> Result<RouterResponse> {
        tracing::debug!("Routing turn with {} log entries", input.len());
        self.post_json(&self.router_url, &RouteRequest { input }, "router")
            .await
    }

    async fn generate_act1(&self, idea: &str) -> Result<Act1Response> {
        tracing::debug!("Requesting Act-1 script for {:?}", idea);
        self.post_json(&self.act1_url, &Act1Request { idea }, "act1")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn output_items_decode_with_unknown_types_ignored() {
        let response: RouterResponse = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "role": "assistant",
                 "content": [{"type": "output_text", "text": "Squeak "},
                             {"type": "output_text", "text": "squeak"}]},
                {"type": "function_call", "call_id": "c1", "name": "ui_show_videos",
                 "arguments": "{\"videoIds\":[\"a\"]}"}
            ],
            "chips": ["More"],
            "advanceAct": 2
        }))
        .unwrap();

        assert_eq!(response.output[0], OutputItem::Other);
        assert_eq!(response.message_text(), "Squeak squeak");
        assert_eq!(response.function_calls().count(), 1);
        assert_eq!(response.advance_act, Some(Act::Two));
    }

    #[test]
    fn message_text_falls_back_to_top_level_text() {
        let response: RouterResponse =
            serde_json::from_value(json!({"output": [], "text": "hello", "advanceAct": "bogus"}))
                .unwrap();
        assert_eq!(response.message_text(), "hello");
        assert_eq!(response.advance_act, None);
    }

    #[test]
    fn act1_script_falls_back_to_text_lines() {
        let response = Act1Response {
            title: Some("Moon Dogs".to_string()),
            script: Some(vec!["  ".to_string()]),
            text: Some("Line one\n\nLine two\n".to_string()),
        };
        assert_eq!(
            response.script_lines(),
            Some(vec!["Line one".to_string(), "Line two".to_string()])
        );
        assert_eq!(Act1Response::default().script_lines(), None);
    }

    #[tokio::test]
    async fn http_transport_posts_input_and_bearer_token() {
        let app = Router::new().route(
            "/route",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let count = body["input"].as_array().map(|a| a.len()).unwrap_or(0);
                Json(json!({
                    "output": [{"type": "message", "role": "assistant",
                                "content": format!("{} entries, {}", count, auth)}]
                }))
            }),
        );
        let base = spawn_stub(app).await;
        let transport = HttpRouterTransport::new(
            format!("{}/route", base),
            format!("{}/act1", base),
            Some("secret".to_string()),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

        let response = transport
            .route(&[LogEntry::user("hi"), LogEntry::assistant("hello")])
            .await
            .unwrap();
        assert_eq!(response.message_text(), "2 entries, Bearer secret");
    }

    #[tokio::test]
    async fn http_transport_reports_non_success_status() {
        let app = Router::new()
            .route(
                "/route",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            )
            .route(
                "/act1",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"title": body["idea"], "script": ["a", "b"]}))
                }),
            );
        let base = spawn_stub(app).await;
        let transport = HttpRouterTransport::new(
            format!("{}/route", base),
            format!("{}/act1", base),
            None,
            Some(Duration::from_secs(5)),
        )
        .unwrap();

        let err = transport.route(&[LogEntry::user("hi")]).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("502"), "{}", message);
        assert!(message.contains("upstream down"), "{}", message);

        let act1 = transport.generate_act1("dogs on the moon").await.unwrap();
        assert_eq!(act1.title.as_deref(), Some("dogs on the moon"));
        assert_eq!(act1.script_lines().unwrap().len(), 2);
    }
}
