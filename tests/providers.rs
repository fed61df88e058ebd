use futures::StreamExt;
use mockito::Matcher;

use miktos_gateway::models::{ChatTurn, StreamChunk};
use miktos_gateway::providers::{
    AnthropicClient, CompletionParams, GoogleClient, LlmClient, OpenAiClient, StreamOutcome,
};

fn params(messages: Vec<ChatTurn>) -> CompletionParams {
    CompletionParams {
        messages,
        model: None,
        system_prompt: None,
        temperature: None,
        max_tokens: None,
    }
}

async fn drain(outcome: StreamOutcome) -> Vec<StreamChunk> {
    match outcome {
        StreamOutcome::Stream(stream) => stream.collect().await,
        StreamOutcome::Failed(chunk) => panic!("stream failed up front: {:?}", chunk),
    }
}

mod openai {
    use super::*;

    #[tokio::test]
    async fn complete_maps_vendor_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "model": "gpt-4o-2024-08-06",
                    "choices": [{"message": {"content": "Hello!"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
                }"#,
            )
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;

        mock.assert_async().await;
        assert!(!response.error);
        assert_eq!(response.content.as_deref(), Some("Hello!"));
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.model_name, "gpt-4o-2024-08-06");
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 9);
        assert_eq!(usage.total_tokens, 12);
        assert!(response.raw_response.is_some());
    }

    #[tokio::test]
    async fn stream_yields_deltas_then_final() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].delta.as_deref(), Some("Hel"));
        assert_eq!(chunks[1].delta.as_deref(), Some("lo"));
        let last = &chunks[2];
        assert!(last.is_final);
        assert!(!last.error);
        assert_eq!(last.accumulated_content, "Hello");
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
        assert_eq!(last.model_name.as_deref(), Some("gpt-4o"));
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
    }

    #[tokio::test]
    async fn rate_limit_status_maps_to_error_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"slow down","code":"rate_limit_exceeded"}}"#)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;

        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("RateLimitError"));
        assert_eq!(response.status_code, Some(429));
        assert!(response.message.as_deref().unwrap().contains("slow down"));
    }

    #[tokio::test]
    async fn missing_key_is_a_configuration_error_per_call() {
        let client = OpenAiClient::new(None, None, None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;
        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("ConfigurationError"));

        match client.stream(params(vec![ChatTurn::user("Hi")])).await {
            StreamOutcome::Failed(chunk) => {
                assert!(chunk.error);
                assert!(chunk.is_final);
                assert_eq!(chunk.error_type.as_deref(), Some("ConfigurationError"));
            }
            StreamOutcome::Stream(_) => panic!("expected up-front failure"),
        }
    }

    #[tokio::test]
    async fn unparseable_body_is_a_parsing_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("not json at all")
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;
        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("ParsingError"));
    }

    #[tokio::test]
    async fn bad_stream_chunk_ends_with_terminal_error_preserving_partial() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {{{garbage\n\n",
        );
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = OpenAiClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        let last = chunks.last().unwrap();
        assert!(last.error);
        assert!(last.is_final);
        assert_eq!(last.error_type.as_deref(), Some("ParsingError"));
        assert_eq!(last.accumulated_content, "Hi");
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
    }
}

mod anthropic {
    use super::*;

    #[tokio::test]
    async fn complete_sends_version_header_and_maps_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "test-key")
            .match_header("anthropic-version", "2023-06-01")
            .with_status(200)
            .with_body(
                r#"{
                    "model": "claude-3-5-sonnet-20240620",
                    "content": [{"type": "text", "text": "Hello from Claude"}],
                    "stop_reason": "end_turn",
                    "usage": {"input_tokens": 10, "output_tokens": 4}
                }"#,
            )
            .create_async()
            .await;

        let client = AnthropicClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;

        mock.assert_async().await;
        assert!(!response.error);
        assert_eq!(response.content.as_deref(), Some("Hello from Claude"));
        assert_eq!(response.finish_reason.as_deref(), Some("end_turn"));
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 14);
    }

    #[tokio::test]
    async fn stream_combines_prompt_and_cumulative_output_tokens() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "event: message_start\n",
            "data: {\"type\":\"message_start\",\"message\":{\"model\":\"claude-3-5-sonnet-20240620\",\"usage\":{\"input_tokens\":12}}}\n\n",
            "event: ping\n",
            "data: {\"type\":\"ping\"}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "event: message_delta\n",
            "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n",
            "event: message_stop\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        );
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = AnthropicClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        assert_eq!(chunks.len(), 3);
        let last = &chunks[2];
        assert!(last.is_final);
        assert_eq!(last.accumulated_content, "Hello");
        assert_eq!(last.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(
            last.model_name.as_deref(),
            Some("claude-3-5-sonnet-20240620")
        );
        let usage = last.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 12);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 17);
    }

    #[tokio::test]
    async fn stream_error_event_becomes_terminal_error_chunk() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"par\"}}\n\n",
            "data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
        );
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = AnthropicClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        let last = chunks.last().unwrap();
        assert!(last.error);
        assert!(last.is_final);
        assert_eq!(last.accumulated_content, "par");
        assert_eq!(last.error_type.as_deref(), Some("APIError"));
        assert!(last.message.as_deref().unwrap().contains("overloaded_error"));
    }
}

mod google {
    use super::*;

    #[tokio::test]
    async fn complete_maps_candidates_and_usage() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/models/gemini-1.5-flash-latest:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test-key".into()))
            .with_status(200)
            .with_body(
                r#"{
                    "candidates": [{
                        "content": {"parts": [{"text": "Hello from Gemini"}], "role": "model"},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 4, "totalTokenCount": 11},
                    "modelVersion": "gemini-1.5-flash-002"
                }"#,
            )
            .create_async()
            .await;

        let client = GoogleClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;

        mock.assert_async().await;
        assert!(!response.error);
        assert_eq!(response.content.as_deref(), Some("Hello from Gemini"));
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.model_name, "gemini-1.5-flash-002");
        assert_eq!(response.usage.unwrap().total_tokens, 11);
    }

    #[tokio::test]
    async fn stream_uses_latest_cumulative_usage() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}],\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":1,\"totalTokenCount\":8}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}],\"usageMetadata\":{\"promptTokenCount\":7,\"candidatesTokenCount\":4,\"totalTokenCount\":11}}\n\n",
        );
        server
            .mock(
                "POST",
                "/models/gemini-1.5-flash-latest:streamGenerateContent",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = GoogleClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        assert_eq!(chunks.len(), 3);
        let last = &chunks[2];
        assert!(last.is_final);
        assert_eq!(last.accumulated_content, "Hello");
        assert_eq!(last.finish_reason.as_deref(), Some("STOP"));
        let usage = last.usage.unwrap();
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 11);
    }

    #[tokio::test]
    async fn blocked_prompt_surfaces_blocked_finish_reason() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "POST",
                "/models/gemini-1.5-flash-latest:streamGenerateContent",
            )
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("data: {\"promptFeedback\":{\"blockReason\":\"SAFETY\"},\"candidates\":[]}\n\n")
            .create_async()
            .await;

        let client = GoogleClient::new(Some("test-key".into()), Some(server.url()), None);
        let chunks = drain(client.stream(params(vec![ChatTurn::user("Hi")])).await).await;

        assert_eq!(chunks.len(), 1);
        let last = &chunks[0];
        assert!(last.is_final);
        assert!(!last.error);
        assert_eq!(last.finish_reason.as_deref(), Some("BLOCKED_SAFETY"));
        assert_eq!(last.accumulated_content, "");
    }

    #[tokio::test]
    async fn api_error_status_maps_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/models/gemini-1.5-flash-latest:generateContent")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#)
            .create_async()
            .await;

        let client = GoogleClient::new(Some("test-key".into()), Some(server.url()), None);
        let response = client.complete(params(vec![ChatTurn::user("Hi")])).await;

        assert!(response.error);
        assert_eq!(response.error_type.as_deref(), Some("APIError"));
        assert_eq!(response.status_code, Some(400));
        assert_eq!(response.error_code.as_deref(), Some("INVALID_ARGUMENT"));
    }
}
