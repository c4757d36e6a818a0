use super::traits::{AssistantBackend, BuiltinTool, Run, ThreadHandle, ToolOutput};
use crate::tools::ToolSpec;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");
const MESSAGE_PAGE_SIZE: &str = "20";

/// OpenAI Assistants (v2) REST client.
pub struct OpenAiAssistantsClient {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CreatedObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<MessageText>,
}

#[derive(Debug, Deserialize)]
struct MessageText {
    value: String,
}

impl ThreadMessage {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.as_ref().map(|t| t.value.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pick the newest assistant message produced by `run_id` from a
/// newest-first listing.
fn newest_assistant_text(messages: &[ThreadMessage], run_id: &str) -> Option<String> {
    messages
        .iter()
        .filter(|m| m.role == "assistant")
        .filter(|m| m.run_id.as_deref().is_none_or(|id| id == run_id))
        .map(ThreadMessage::text)
        .find(|text| !text.trim().is_empty())
}

fn assistant_tools_payload(tools: &[ToolSpec], builtins: &[BuiltinTool]) -> serde_json::Value {
    let mut payload: Vec<serde_json::Value> = builtins
        .iter()
        .map(|b| json!({ "type": b.as_str() }))
        .collect();
    payload.extend(tools.iter().map(ToolSpec::to_function_tool));
    json!({ "tools": payload })
}

impl OpenAiAssistantsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: crate::config::build_http_client(Duration::from_secs(60)),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> anyhow::Result<T> {
        let resp = request
            .send()
            .await
            .with_context(|| format!("Assistants API {operation} request failed"))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read response body: {e}>"));

        if !status.is_success() {
            anyhow::bail!("Assistants API {operation} failed ({status}): {body}");
        }

        serde_json::from_str(&body)
            .with_context(|| format!("Assistants API {operation} returned an unexpected body"))
    }
}

#[async_trait]
impl AssistantBackend for OpenAiAssistantsClient {
    async fn create_thread(&self) -> anyhow::Result<ThreadHandle> {
        let created: CreatedObject = self
            .send(
                self.request(reqwest::Method::POST, "/threads").json(&json!({})),
                "create thread",
            )
            .await?;
        Ok(ThreadHandle::new(created.id))
    }

    async fn add_user_message(&self, thread: &ThreadHandle, content: &str) -> anyhow::Result<()> {
        let _: CreatedObject = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/threads/{}/messages", thread.id),
                )
                .json(&json!({ "role": "user", "content": content })),
                "create message",
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread: &ThreadHandle, assistant_id: &str) -> anyhow::Result<Run> {
        self.send(
            self.request(reqwest::Method::POST, &format!("/threads/{}/runs", thread.id))
                .json(&json!({ "assistant_id": assistant_id })),
            "create run",
        )
        .await
    }

    async fn retrieve_run(&self, thread: &ThreadHandle, run_id: &str) -> anyhow::Result<Run> {
        self.send(
            self.request(
                reqwest::Method::GET,
                &format!("/threads/{}/runs/{run_id}", thread.id),
            ),
            "retrieve run",
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> anyhow::Result<Run> {
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/threads/{}/runs/{run_id}/submit_tool_outputs", thread.id),
            )
            .json(&json!({ "tool_outputs": outputs })),
            "submit tool outputs",
        )
        .await
    }

    async fn cancel_run(&self, thread: &ThreadHandle, run_id: &str) -> anyhow::Result<()> {
        let _: Run = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/threads/{}/runs/{run_id}/cancel", thread.id),
                ),
                "cancel run",
            )
            .await?;
        Ok(())
    }

    async fn latest_assistant_message(
        &self,
        thread: &ThreadHandle,
        run_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let list: MessageList = self
            .send(
                self.request(
                    reqwest::Method::GET,
                    &format!("/threads/{}/messages", thread.id),
                )
                .query(&[
                    ("order", "desc"),
                    ("limit", MESSAGE_PAGE_SIZE),
                    ("run_id", run_id),
                ]),
                "list messages",
            )
            .await?;
        Ok(newest_assistant_text(&list.data, run_id))
    }

    async fn update_assistant_tools(
        &self,
        assistant_id: &str,
        tools: &[ToolSpec],
        builtins: &[BuiltinTool],
    ) -> anyhow::Result<()> {
        let _: CreatedObject = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/assistants/{assistant_id}"),
                )
                .json(&assistant_tools_payload(tools, builtins)),
                "update assistant",
            )
            .await?;
        Ok(())
    }
}
