use crate::{
    Error, Result,
    model::decode_png_base64,
    server::types::{ErrorResponse, GenerateRequest, TextToImageRequest},
};
use futures::{Stream, StreamExt, future};
use reqwest::{Client, Response};
use tracing::debug;

/// Calls the endpoints of one deployed app over HTTP.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: Client,
    base_url: String,
    app: String,
}

impl EndpointClient {
    pub fn new(base_url: impl Into<String>, app: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app: app.into(),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.app, endpoint)
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<String> {
        let url = self.url("generate");
        debug!("POST {}", url);
        let response = self.http.post(&url).json(request).send().await?;
        Ok(check(response).await?.text().await?)
    }

    /// Decoded text chunks in the order the server produced them.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<impl Stream<Item = Result<String>>> {
        let url = self.url("generate_stream");
        debug!("POST {} (streaming)", url);
        let response = check(self.http.post(&url).json(request).send().await?).await?;

        // Chunk boundaries may split a multi-byte character; hold the
        // incomplete tail until the next chunk arrives.
        let mut pending: Vec<u8> = Vec::new();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                pending.extend_from_slice(&chunk?);
                let valid = match std::str::from_utf8(&pending) {
                    Ok(text) => text.len(),
                    Err(e) if e.error_len().is_none() => e.valid_up_to(),
                    Err(e) => {
                        return Err(Error::internal(format!("stream chunk is not UTF-8: {e}")));
                    }
                };
                String::from_utf8(pending.drain(..valid).collect())
                    .map_err(|e| Error::internal(format!("stream chunk is not UTF-8: {e}")))
            })
            .filter(|chunk| future::ready(!matches!(chunk, Ok(text) if text.is_empty()))))
    }

    /// PNG bytes of the generated image.
    pub async fn text_to_image(&self, request: &TextToImageRequest) -> Result<Vec<u8>> {
        let url = self.url("text_to_image");
        debug!("POST {}", url);
        let response = self.http.post(&url).json(request).send().await?;
        let encoded = check(response).await?.text().await?;
        decode_png_base64(&encoded)
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(Error::Remote {
        status: status.as_u16(),
        message,
    })
}
