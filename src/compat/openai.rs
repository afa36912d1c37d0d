use crate::api::{Message, Role};
use crate::error::Result;
use crate::provider::{ChatResponse, Provider};
use crate::traits::GenerationOptions;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_COMPLETION: AtomicU64 = AtomicU64::new(1);

/// OpenAI-shaped chat-completion request.
///
/// `model` is echoed back in the response; the provider always uses the
/// model configured for the `llm` modality.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

impl ChatCompletionRequest {
    fn options(&self) -> GenerationOptions {
        GenerationOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoiceMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChoiceMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: UsageReport,
}

impl ChatCompletionResponse {
    fn from_chat(model: String, response: ChatResponse) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            id: format!("chatcmpl-{}", NEXT_COMPLETION.fetch_add(1, Ordering::Relaxed)),
            object: "chat.completion",
            created,
            model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChoiceMessage {
                    role: Role::Assistant,
                    content: response.content,
                },
                finish_reason: "stop",
            }],
            usage: UsageReport {
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
                total_tokens: response.usage.total_tokens,
            },
        }
    }
}

/// Answer an OpenAI-shaped request through [`Provider::chat`].
pub async fn chat_completion(
    provider: &Provider,
    request: ChatCompletionRequest,
) -> Result<ChatCompletionResponse> {
    let response = provider.chat(&request.messages, request.options()).await?;
    let model = if request.model.is_empty() {
        provider
            .controller(crate::api::Modality::Llm)
            .model_id()
            .unwrap_or_default()
            .to_string()
    } else {
        request.model
    };
    Ok(ChatCompletionResponse::from_chat(model, response))
}
