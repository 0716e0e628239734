use futures::StreamExt;
use modelhost::{
    Error,
    client::EndpointClient,
    model::{ImageModel, ImageRequest, ProceduralDiffusion, encode_png_base64},
    server::types::{GenerateRequest, TextToImageRequest},
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

#[tokio::test]
async fn test_generate_posts_prompt_and_returns_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/generate"))
        .and(body_partial_json(json!({ "prompt": "hello", "seed": 3 })))
        .respond_with(ResponseTemplate::new(200).set_body_string("world again"))
        .expect(1)
        .mount(&server)
        .await;

    let client = EndpointClient::new(server.uri(), "llm");
    let request = GenerateRequest {
        seed: Some(3),
        ..GenerateRequest::new("hello")
    };
    assert_eq!(client.generate(&request).await.unwrap(), "world again");
}

#[tokio::test]
async fn test_error_body_becomes_remote_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/generate"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({ "error": "prompt must not be empty" })),
        )
        .mount(&server)
        .await;

    let client = EndpointClient::new(server.uri(), "llm");
    match client.generate(&GenerateRequest::new("")).await {
        Err(Error::Remote { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "prompt must not be empty");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_yields_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm/generate_stream"))
        .respond_with(ResponseTemplate::new(200).set_body_string(" the loop runs again"))
        .mount(&server)
        .await;

    let client = EndpointClient::new(format!("{}/", server.uri()), "llm");
    let request = GenerateRequest::new("and");
    let stream = client.generate_stream(&request).await.unwrap();
    let chunks: Vec<String> = Box::pin(stream)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks.concat(), " the loop runs again");
}

#[tokio::test]
async fn test_text_to_image_decodes_png() {
    let image = ProceduralDiffusion::new()
        .generate(&ImageRequest {
            prompt: "harbor".to_string(),
            width: 64,
            height: 64,
            num_inference_steps: 2,
            guidance_scale: 5.0,
            seed: Some(1),
        })
        .unwrap();
    let encoded = encode_png_base64(&image).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sd/text_to_image"))
        .respond_with(ResponseTemplate::new(200).set_body_string(encoded))
        .mount(&server)
        .await;

    let client = EndpointClient::new(server.uri(), "sd");
    let png = client
        .text_to_image(&TextToImageRequest::new("harbor"))
        .await
        .unwrap();
    assert_eq!(&png[..4], b"\x89PNG");
}

#[tokio::test]
async fn test_text_to_image_rejects_non_png() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sd/text_to_image"))
        .respond_with(ResponseTemplate::new(200).set_body_string("bm90IGFuIGltYWdl"))
        .mount(&server)
        .await;

    let client = EndpointClient::new(server.uri(), "sd");
    assert!(
        client
            .text_to_image(&TextToImageRequest::new("harbor"))
            .await
            .is_err()
    );
}
