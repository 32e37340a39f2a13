use base64::Engine;
use serde_json::json;
use tokio::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use studio_core::{ErrorKind, GeminiClient, ProgressReporter, RetryPolicy, StudioConfig, VideoRequest};

const KEY: &str = "test-key";

fn client_for(server: &MockServer) -> GeminiClient {
    let mut cfg = StudioConfig::new(KEY);
    cfg.base_url = server.uri();
    cfg.retry = RetryPolicy::new(2, Duration::from_millis(5));
    cfg.poll.interval = Duration::from_millis(10);
    cfg.poll.retry = RetryPolicy::new(1, Duration::from_millis(5));
    GeminiClient::new(cfg).unwrap()
}

fn text_reply(text: &str) -> serde_json::Value {
    json!({ "candidates": [ { "content": { "parts": [ { "text": text } ] }, "finishReason": "STOP" } ] })
}

#[tokio::test]
async fn text_generation_sends_prompt_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(query_param("key", KEY))
        .and(body_partial_json(json!({ "contents": [ { "parts": [ { "text": "pitch me a film" } ] } ] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("A lighthouse keeper...")))
        .expect(1)
        .mount(&server)
        .await;

    let text = client_for(&server).generate_text("pitch me a film").await.unwrap();
    assert_eq!(text, "A lighthouse keeper...");
}

#[tokio::test]
async fn structured_reply_in_fences_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(body_partial_json(json!({ "generationConfig": { "responseMimeType": "application/json" } })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_reply("```json\n{\"title\": \"Tide\", \"scenes\": 3}\n```")),
        )
        .mount(&server)
        .await;

    let v: serde_json::Value = client_for(&server)
        .generate_structured("outline", &json!({ "type": "OBJECT" }))
        .await
        .unwrap();
    assert_eq!(v["title"], "Tide");
    assert_eq!(v["scenes"], 3);
}

#[tokio::test]
async fn error_responses_are_classified_at_the_boundary() {
    let cases = [
        (
            429,
            r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#,
            ErrorKind::RateLimited,
        ),
        (
            400,
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
            ErrorKind::InvalidCredential,
        ),
        (
            404,
            r#"{"error":{"code":404,"message":"models/nope is not found","status":"NOT_FOUND"}}"#,
            ErrorKind::EntityNotFound,
        ),
        (500, "upstream exploded", ErrorKind::Unknown),
    ];

    for (status, body, kind) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&server)
            .await;

        let err = client_for(&server).generate_text("hi").await.unwrap_err();
        assert_eq!(err.kind, kind, "HTTP {status}");
        assert!(!err.message.contains(KEY));

        let attempts = server.received_requests().await.unwrap().len();
        let expected = if kind == ErrorKind::RateLimited { 3 } else { 1 };
        assert_eq!(attempts, expected, "HTTP {status}");
    }
}

#[tokio::test]
async fn blocked_prompt_is_a_policy_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "promptFeedback": { "blockReason": "SAFETY" } })))
        .mount(&server)
        .await;

    let err = client_for(&server).generate_text("something bad").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ContentPolicyRejected);
}

#[tokio::test]
async fn speech_reply_is_decoded_from_inline_pcm() {
    let pcm: Vec<u8> = [0i16, 16384, -16384]
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash-preview-tts:generateContent"))
        .and(body_partial_json(json!({
            "generationConfig": { "speechConfig": { "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": "Kore" } } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [ { "content": { "parts": [ { "inlineData": {
                "mimeType": "audio/L16;codec=pcm;rate=24000",
                "data": base64::engine::general_purpose::STANDARD.encode(&pcm)
            } } ] } } ]
        })))
        .mount(&server)
        .await;

    let audio = client_for(&server).generate_speech("Hello there.", "Kore").await.unwrap();
    assert_eq!(audio.sample_rate(), 24000);
    assert_eq!(audio.channel(0), &[0.0, 0.5, -0.5]);
}

#[tokio::test]
async fn video_job_submits_polls_and_downloads() {
    let server = MockServer::start().await;
    let op = "models/veo-3.1-fast-generate-preview/operations/op-7";

    Mock::given(method("POST"))
        .and(path("/models/veo-3.1-fast-generate-preview:predictLongRunning"))
        .and(query_param("key", KEY))
        .and(body_partial_json(json!({
            "instances": [ { "prompt": "waves at night" } ],
            "parameters": { "numberOfVideos": 1 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": op })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{op}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": op, "done": false })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{op}")))
        .and(query_param("key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op,
            "done": true,
            "response": { "generateVideoResponse": { "generatedSamples": [
                { "video": { "uri": format!("{}/files/v.mp4?alt=media", server.uri()) } }
            ] } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/v.mp4"))
        .and(query_param("alt", "media"))
        .and(query_param("key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .generate_video(&VideoRequest::new("waves at night"), &ProgressReporter::silent())
        .await
        .unwrap();
    assert_eq!(result.operation, op);
    assert_eq!(result.polls, 2);
    assert!(result.uri.ends_with(&format!("&key={KEY}")));

    let bytes = client.download(&result.uri).await.unwrap();
    assert_eq!(bytes, b"mp4-bytes");
}

#[tokio::test]
async fn filtered_video_job_is_a_policy_rejection() {
    let server = MockServer::start().await;
    let op = "models/veo-3.1-fast-generate-preview/operations/op-8";
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": op })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{op}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": op,
            "done": true,
            "response": { "generateVideoResponse": {
                "raiMediaFilteredCount": 1,
                "raiMediaFilteredReasons": ["The prompt could not be submitted."]
            } }
        })))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .generate_video(&VideoRequest::new("disallowed"), &ProgressReporter::silent())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ContentPolicyRejected);
}
