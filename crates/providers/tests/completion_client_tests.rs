// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use llm_contracts::{Backend, CompletionRequest, LLMError, Message, ModelSelector};
use providers::{CompletionClient, CompletionService, GroqClient, OpenAIClient};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 11, "completion_tokens": 7, "total_tokens": 18}
    })
}

async fn router_for(server: &MockServer) -> CompletionClient {
    let openai = OpenAIClient::new(
        "sk-test".to_string(),
        Some(format!("{}/openai/chat", server.uri())),
        None,
        Some(5),
    )
    .unwrap();
    let groq = GroqClient::new(
        "gsk-test".to_string(),
        Some(format!("{}/groq/chat", server.uri())),
        None,
        Some(5),
    )
    .unwrap();
    CompletionClient::new()
        .with_client(Arc::new(openai))
        .with_client(Arc::new(groq))
}

#[tokio::test]
async fn test_routes_bare_model_to_openai() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4.1", "temperature": 0.0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("  {\"code\": \"x = 1\"}  ")))
        .expect(1)
        .mount(&server)
        .await;

    let client = router_for(&server).await;
    let response = client
        .complete(CompletionRequest::new(
            "gpt-4.1".parse().unwrap(),
            vec![Message::user("write code")],
        ))
        .await
        .unwrap();

    assert_eq!(response.content, "{\"code\": \"x = 1\"}");
    assert_eq!(response.backend, Backend::OpenAI);
    assert_eq!(response.usage.total_tokens, 18);
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));
}

#[tokio::test]
async fn test_routes_groq_flag_to_groq_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/groq/chat"))
        .and(body_partial_json(json!({"model": "openai/gpt-oss-120b", "top_p": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_body("Question 1: ...")))
        .expect(1)
        .mount(&server)
        .await;

    let client = router_for(&server).await;
    let response = client
        .complete(CompletionRequest::new(
            ModelSelector::backend(Backend::Groq),
            vec![Message::user("compose")],
        ))
        .await
        .unwrap();

    assert_eq!(response.backend, Backend::Groq);
    assert_eq!(response.model, "openai/gpt-oss-120b");
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;

    let client = router_for(&server).await;
    let err = client
        .complete(CompletionRequest::new(
            ModelSelector::backend(Backend::OpenAI),
            vec![Message::user("hi")],
        ))
        .await
        .unwrap_err();

    assert!(matches!(err, LLMError::Provider(msg) if msg.contains("overloaded")));
}

#[tokio::test]
async fn test_status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/groq/chat"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = router_for(&server).await;
    let auth = client
        .complete(CompletionRequest::new(
            ModelSelector::backend(Backend::OpenAI),
            vec![Message::user("hi")],
        ))
        .await
        .unwrap_err();
    assert!(matches!(auth, LLMError::Authentication(_)));

    let limited = client
        .complete(CompletionRequest::new(
            ModelSelector::backend(Backend::Groq),
            vec![Message::user("hi")],
        ))
        .await
        .unwrap_err();
    assert!(matches!(limited, LLMError::RateLimit));
    assert!(limited.is_transient());
}
