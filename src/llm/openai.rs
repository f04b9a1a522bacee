//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 带工具目录时发送 `tools`，响应中的 `tool_calls` 解析为 ToolCallRequest；OpenAIError 映射为 LlmError。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionResponseMessage, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::json;

use crate::llm::{LlmClient, LlmError, ModelResponse};
use crate::memory::{Role, Turn};
use crate::tools::{ToolCallRequest, ToolSchema};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        // 整体超时由重试包装器按次控制，这里只限制建连
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();

        Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    async fn send(
        &self,
        messages: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ChatCompletionResponseMessage, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(to_openai_messages(messages).map_err(map_openai_error)?);
        if !tools.is_empty() {
            args.tools(to_openai_tools(tools));
        }
        let request = args.build().map_err(map_openai_error)?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| LlmError::MalformedResponse("response had no choices".to_string()))
    }
}

/// Turn 转为 chat/completions 的消息类型；助手的工具调用与工具结果保留 id 关联
fn to_openai_messages(
    messages: &[Turn],
) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    messages
        .iter()
        .map(|m| {
            let message: ChatCompletionRequestMessage = match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()?
                    .into(),
                Role::Assistant => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if !m.content.is_empty() || m.tool_calls.is_empty() {
                        args.content(m.content.clone());
                    }
                    if !m.tool_calls.is_empty() {
                        let calls: Vec<ChatCompletionMessageToolCalls> = m
                            .tool_calls
                            .iter()
                            .map(|c| {
                                ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: c.id.clone(),
                                        function: FunctionCall {
                                            name: c.name.clone(),
                                            arguments: c.arguments.to_string(),
                                        },
                                    },
                                )
                            })
                            .collect();
                        args.tool_calls(calls);
                    }
                    args.build()?.into()
                }
                Role::Tool => ChatCompletionRequestToolMessageArgs::default()
                    .content(m.content.clone())
                    .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                    .build()?
                    .into(),
            };
            Ok(message)
        })
        .collect()
}

fn to_openai_tools(tools: &[ToolSchema]) -> Vec<ChatCompletionTools> {
    tools
        .iter()
        .map(|t| {
            ChatCompletionTools::Function(ChatCompletionTool {
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                    strict: None,
                },
            })
        })
        .collect()
}

/// OpenAIError 归类到 LlmError，供重试包装器判断是否瞬时
///
/// ApiError 不带 HTTP 状态码：限流按 type / code 识别，缺少 type 或 server_error 视为服务端错误，其余为请求被拒。
fn map_openai_error(err: OpenAIError) -> LlmError {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => match e.status() {
            Some(status) if status.as_u16() == 429 => LlmError::RateLimited {
                retry_after_ms: None,
            },
            Some(status) if status.is_server_error() => LlmError::Server {
                status: status.as_u16(),
                message: e.to_string(),
            },
            Some(status) => LlmError::InvalidRequest(format!("{}: {}", status.as_u16(), e)),
            None => LlmError::Network(e.to_string()),
        },
        OpenAIError::ApiError(api) => map_api_error(api),
        OpenAIError::JSONDeserialize(e, _) => LlmError::MalformedResponse(e.to_string()),
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg),
        other => LlmError::Network(other.to_string()),
    }
}

fn map_api_error(api: ApiError) -> LlmError {
    let kind = api.r#type.as_deref().unwrap_or_default();
    let code = api.code.as_deref().unwrap_or_default();
    if code == "insufficient_quota" || kind == "insufficient_quota" {
        LlmError::InvalidRequest(api.to_string())
    } else if code.contains("rate_limit") || kind.contains("rate_limit") {
        LlmError::RateLimited {
            retry_after_ms: None,
        }
    } else if api.r#type.is_none() || kind == "server_error" {
        LlmError::Server {
            status: 500,
            message: api.message,
        }
    } else {
        LlmError::InvalidRequest(api.to_string())
    }
}

/// 工具参数以 JSON 字符串下发；空串视为空对象
fn parse_tool_calls(
    calls: Option<Vec<ChatCompletionMessageToolCalls>>,
) -> Result<Vec<ToolCallRequest>, LlmError> {
    calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let c = match call {
                ChatCompletionMessageToolCalls::Function(c) => c,
                ChatCompletionMessageToolCalls::Custom(c) => {
                    return Err(LlmError::MalformedResponse(format!(
                        "unsupported custom tool call '{}'",
                        c.custom_tool.name
                    )))
                }
            };
            let arguments = if c.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&c.function.arguments).map_err(|e| {
                    LlmError::MalformedResponse(format!(
                        "arguments for '{}' are not valid JSON: {}",
                        c.function.name, e
                    ))
                })?
            };
            Ok(ToolCallRequest {
                id: c.id,
                name: c.function.name,
                arguments,
            })
        })
        .collect()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Turn]) -> Result<String, LlmError> {
        let message = self.send(messages, &[]).await?;
        Ok(message.content.unwrap_or_default())
    }

    async fn complete_with_tools(
        &self,
        messages: &[Turn],
        tools: &[ToolSchema],
    ) -> Result<ModelResponse, LlmError> {
        let message = self.send(messages, tools).await?;
        let calls = parse_tool_calls(message.tool_calls)?;
        ModelResponse::from_parts(message.content, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::chat::CreateChatCompletionResponse;

    fn api_error(kind: Option<&str>, code: Option<&str>) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "upstream said no".into(),
            r#type: kind.map(String::from),
            param: None,
            code: code.map(String::from),
        })
    }

    #[test]
    fn test_api_error_mapping() {
        assert_eq!(
            map_openai_error(api_error(Some("requests"), Some("rate_limit_exceeded"))),
            LlmError::RateLimited {
                retry_after_ms: None
            }
        );
        assert!(map_openai_error(api_error(Some("server_error"), None)).is_transient());
        assert!(map_openai_error(api_error(None, None)).is_transient());
        assert!(!map_openai_error(api_error(Some("invalid_request_error"), None)).is_transient());
        assert!(
            !map_openai_error(api_error(Some("insufficient_quota"), Some("insufficient_quota")))
                .is_transient()
        );
    }

    #[test]
    fn test_client_side_errors_mapping() {
        let bad_json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = map_openai_error(OpenAIError::JSONDeserialize(bad_json, "{".into()));
        assert!(matches!(err, LlmError::MalformedResponse(_)));
        assert!(err.is_transient());

        let err = map_openai_error(OpenAIError::InvalidArgument("no model".into()));
        assert_eq!(err, LlmError::InvalidRequest("no model".into()));
    }

    #[test]
    fn test_tool_turns_serialize_with_ids() {
        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "search_policies".into(),
            arguments: json!({"question": "refund window"}),
        };
        let turns = vec![
            Turn::user("how long do I have to return?"),
            Turn::assistant_tool_calls(vec![call]),
            Turn::tool("call_1", "30 days"),
        ];
        let wire = serde_json::to_value(to_openai_messages(&turns).unwrap()).unwrap();
        assert_eq!(wire[0]["role"], "user");
        assert_eq!(wire[1]["role"], "assistant");
        assert_eq!(wire[1]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire[1]["tool_calls"][0]["function"]["arguments"],
            r#"{"question":"refund window"}"#
        );
        assert_eq!(wire[2]["role"], "tool");
        assert_eq!(wire[2]["tool_call_id"], "call_1");
        assert_eq!(wire[2]["content"], "30 days");
    }

    #[test]
    fn test_tool_catalog_is_function_tools() {
        let schema = ToolSchema {
            name: "search_policies".into(),
            description: "Search company policies".into(),
            parameters: json!({"type": "object", "properties": {"question": {"type": "string"}}}),
        };
        let wire = serde_json::to_value(to_openai_tools(&[schema])).unwrap();
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "search_policies");
        assert_eq!(wire[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_parse_tool_calls_rejects_bad_json() {
        let calls = vec![ChatCompletionMessageToolCalls::Function(
            ChatCompletionMessageToolCall {
                id: "c".into(),
                function: FunctionCall {
                    name: "query_orders_database".into(),
                    arguments: "{not json".into(),
                },
            },
        )];
        assert!(matches!(
            parse_tool_calls(Some(calls)),
            Err(LlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_response_tool_calls_are_parsed() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "search_policies", "arguments": ""}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        }"#;
        let parsed: CreateChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let msg = parsed.choices.into_iter().next().unwrap().message;
        let calls = parse_tool_calls(msg.tool_calls).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].arguments, json!({}));
    }

    #[test]
    fn test_response_without_tool_calls_is_answer() {
        let raw = r#"{
            "id": "chatcmpl-2",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "deepseek-chat",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello"}}]
        }"#;
        let parsed: CreateChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let msg = parsed.choices.into_iter().next().unwrap().message;
        let calls = parse_tool_calls(msg.tool_calls).unwrap();
        assert_eq!(
            ModelResponse::from_parts(msg.content, calls).unwrap(),
            ModelResponse::FinalAnswer("Hello".into())
        );
    }
}
