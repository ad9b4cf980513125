use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use super::{CompletionBackend, LlmError};
use crate::LlmConfig;
use crate::retry::retry_after_from;

/// An OpenAI-style `/v1/chat/completions` endpoint (LM Studio, vLLM,
/// hosted gateways).
pub struct ChatCompletionBackend {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl ChatCompletionBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: LlmConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }
}

/// The user turn: `Context: ...` then `Question: ...`.
pub fn user_message(context: &str, question: &str) -> String {
    format!("Context: {}\nQuestion: {}", context, question)
}

/// Pull `choices[0].message.content` out of a completion body.
pub fn extract_content(body: &str) -> Result<String, LlmError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| LlmError::Malformed("response has no choices[0].message.content".into()))
}

/// Map a non-success response to an error, keeping any `Retry-After` hint.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_after_from(&resp);
    if status.as_u16() == 429 {
        return Err(LlmError::RateLimited { retry_after });
    }
    if status.is_server_error() {
        return Err(LlmError::Server {
            status: status.as_u16(),
            retry_after,
        });
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Rejected {
        status: status.as_u16(),
        body,
    })
}

impl CompletionBackend for ChatCompletionBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn complete<'a>(
        &'a self,
        context: &'a str,
        question: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, LlmError>> + Send + 'a>> {
        Box::pin(async move {
            let user = user_message(context, question);
            let request = ChatRequest {
                model: &self.config.model,
                messages: [
                    ChatMessage {
                        role: "system",
                        content: &self.config.system_prompt,
                    },
                    ChatMessage {
                        role: "user",
                        content: &user,
                    },
                ],
                stream: false,
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };

            let mut builder = self
                .client
                .post(&self.config.endpoint)
                .timeout(self.config.timeout)
                .json(&request);
            if let Some(token) = &self.config.api_token {
                builder = builder.bearer_auth(token);
            }

            let resp = check_status(builder.send().await?).await?;
            let body = resp.text().await?;
            let content = extract_content(&body)?;
            tracing::trace!(model = %self.config.model, chars = content.len(), "completion received");
            Ok(content)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> reqwest::Response {
        let mut builder = http::Response::builder().status(status);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        reqwest::Response::from(builder.body(body).unwrap())
    }

    #[test]
    fn request_body_shape() {
        let request = ChatRequest {
            model: "gemma-2b-it",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "You are a helpful assistant.",
                },
                ChatMessage {
                    role: "user",
                    content: "Context: summary: ok\nQuestion: Cite?",
                },
            ],
            stream: false,
            max_tokens: Some(500),
            temperature: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["model"], "gemma-2b-it");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "Context: summary: ok\nQuestion: Cite?");
        assert_eq!(value["stream"], false);
        assert_eq!(value["max_tokens"], 500);
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn user_message_format() {
        assert_eq!(
            user_message("summary: fine", "Does it cite?"),
            "Context: summary: fine\nQuestion: Does it cite?"
        );
    }

    #[test]
    fn extracts_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Yes."}},{"message":{"content":"No."}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "Yes.");
    }

    #[test]
    fn empty_choices_is_malformed() {
        assert!(matches!(
            extract_content(r#"{"choices":[]}"#),
            Err(LlmError::Malformed(_))
        ));
        assert!(matches!(extract_content("not json"), Err(LlmError::Malformed(_))));
    }

    #[tokio::test]
    async fn status_mapping() {
        assert!(check_status(response(200, &[], "{}")).await.is_ok());

        let err = check_status(response(429, &[("retry-after", "7")], ""))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );

        let err = check_status(response(503, &[], "")).await.unwrap_err();
        assert!(err.is_transient());

        let err = check_status(response(401, &[], "bad token")).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::Rejected {
                status: 401,
                body: "bad token".to_string()
            }
        );
        assert!(!err.is_transient());
    }
}
