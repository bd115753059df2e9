use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::LlmConfig;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("llm returned malformed response: {0}")]
    Malformed(String),
}

/// One entry in a chat transcript, in OpenAI wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A tool the model is allowed to call, described as a JSON schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One model turn: free text plus zero or more tool calls.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSpec])
        -> Result<ChatTurn, LlmError>;
}

pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatTurn, LlmError> {
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let mut obj = json!({"role": m.role, "content": m.content});
                if let Some(ref id) = m.tool_call_id {
                    obj["tool_call_id"] = json!(id);
                }
                if let Some(ref calls) = m.tool_calls {
                    obj["tool_calls"] = Value::Array(
                        calls
                            .iter()
                            .map(|c| {
                                json!({
                                    "id": c.id,
                                    "type": "function",
                                    "function": {
                                        "name": c.name,
                                        "arguments": c.arguments.to_string(),
                                    }
                                })
                            })
                            .collect(),
                    );
                }
                obj
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": wire_messages,
            "temperature": 0.2,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let result: Value = response.json().await?;
        let message = &result["choices"][0]["message"];
        if message.is_null() {
            return Err(LlmError::Malformed(result.to_string()));
        }

        let content = message["content"].as_str().unwrap_or("").to_string();
        let mut tool_calls = Vec::new();
        if let Some(calls) = message["tool_calls"].as_array() {
            for call in calls {
                let id = call["id"].as_str().unwrap_or_default().to_string();
                let name = call["function"]["name"]
                    .as_str()
                    .ok_or_else(|| LlmError::Malformed("tool call without name".to_string()))?
                    .to_string();
                let raw_args = call["function"]["arguments"].as_str().unwrap_or("{}");
                let arguments =
                    serde_json::from_str(raw_args).unwrap_or_else(|_| json!({}));
                tool_calls.push(ToolCall { id, name, arguments });
            }
        }

        Ok(ChatTurn { content, tool_calls })
    }
}

/// Pick the best-matching focus area for an inbound email. Returns `None`
/// when the model chooses `Other` or the call fails; a ticket without a
/// focus area still gets created.
pub async fn classify_focus_area(
    provider: &dyn ChatProvider,
    subject: &str,
    body: &str,
    areas: &[String],
) -> Option<String> {
    if areas.is_empty() {
        return None;
    }
    let prompt = format!(
        "Specify the most relevant focus area for this customer support ticket. \
         Select from the available options: {}. If the ticket is not related to \
         any of the focus areas, select 'Other'. Respond with JSON: \
         {{\"focus_area\": \"<name>\"}}.\n\nEmail {}\n\nContent to analyze: {}",
        areas.join(", "),
        if subject.is_empty() {
            "has no subject".to_string()
        } else {
            format!("Subject: {subject}")
        },
        body,
    );

    let turn = match provider.chat(&[ChatMessage::user(prompt)], &[]).await {
        Ok(turn) => turn,
        Err(e) => {
            warn!("focus area classification failed: {e}");
            return None;
        }
    };

    let raw = turn.content.trim();
    let choice = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v["focus_area"].as_str().map(str::to_string))
        .unwrap_or_else(|| raw.trim_matches('"').to_string());

    if choice.eq_ignore_ascii_case("other") {
        return None;
    }
    areas
        .iter()
        .find(|a| a.eq_ignore_ascii_case(&choice))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider(String);

    #[async_trait]
    impl ChatProvider for CannedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatTurn, LlmError> {
            Ok(ChatTurn {
                content: self.0.clone(),
                tool_calls: Vec::new(),
            })
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ChatProvider for FailingProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[ToolSpec],
        ) -> Result<ChatTurn, LlmError> {
            Err(LlmError::Malformed("boom".to_string()))
        }
    }

    fn areas() -> Vec<String> {
        vec!["Billing".to_string(), "Authentication".to_string()]
    }

    #[tokio::test]
    async fn classification_matches_area_case_insensitively() {
        let provider = CannedProvider(r#"{"focus_area": "billing"}"#.to_string());
        let got = classify_focus_area(&provider, "Invoice wrong", "charged twice", &areas()).await;
        assert_eq!(got.as_deref(), Some("Billing"));
    }

    #[tokio::test]
    async fn classification_other_maps_to_none() {
        let provider = CannedProvider(r#"{"focus_area": "Other"}"#.to_string());
        let got = classify_focus_area(&provider, "", "hello", &areas()).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn classification_accepts_bare_answer() {
        let provider = CannedProvider("Authentication".to_string());
        let got = classify_focus_area(&provider, "login", "cannot log in", &areas()).await;
        assert_eq!(got.as_deref(), Some("Authentication"));
    }

    #[tokio::test]
    async fn classification_failure_degrades_to_none() {
        let got = classify_focus_area(&FailingProvider, "x", "y", &areas()).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn classification_with_no_areas_skips_the_model() {
        let got = classify_focus_area(&FailingProvider, "x", "y", &[]).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn openai_client_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":null,
                    "tool_calls":[{"id":"call_1","type":"function",
                    "function":{"name":"updateField","arguments":"{\"field\":\"subject\",\"value\":\"Login issue\"}"}}]}}]}"#,
            )
            .create_async()
            .await;

        let config = crate::config::LlmConfig {
            api_key: "test".to_string(),
            base_url: server.url(),
            model: "gpt-4o-mini".to_string(),
        };
        let client = OpenAiChat::new(&config);
        let turn = client
            .chat(&[ChatMessage::user("hi")], &[])
            .await
            .expect("chat should succeed");

        mock.assert_async().await;
        assert_eq!(turn.content, "");
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].name, "updateField");
        assert_eq!(turn.tool_calls[0].arguments["field"], "subject");
    }
}
