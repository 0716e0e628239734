use super::types::{ErrorResponse, GenerateRequest, TextToImageRequest};
use crate::{
    Error, Result,
    config::{EndpointKind, GenerationDefaults, ImageDefaults, ModelConfig},
    deploy::{ConnectionInfo, DeployedApp},
    model::{self, ImageModel, LanguageModel, ModelHandle, TokenStream, encode_png_base64},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Json, Response},
};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

const STREAM_CHANNEL_CAPACITY: usize = 16;
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Clone)]
pub struct AppState {
    pub apps: Arc<HashMap<String, DeployedApp>>,
}

impl AppState {
    pub fn new(apps: impl IntoIterator<Item = DeployedApp>) -> Self {
        Self {
            apps: Arc::new(apps.into_iter().map(|app| (app.name.clone(), app)).collect()),
        }
    }

    fn app(&self, name: &str, endpoint: EndpointKind) -> Result<&DeployedApp> {
        let app = self.apps.get(name).ok_or_else(|| Error::AppNotFound {
            app_name: name.to_string(),
        })?;
        if !app.serves(endpoint) {
            return Err(Error::EndpointNotFound {
                app_name: name.to_string(),
                endpoint: endpoint.as_str().to_string(),
            });
        }
        Ok(app)
    }

    fn language_model(
        &self,
        name: &str,
        endpoint: EndpointKind,
    ) -> Result<(&DeployedApp, Arc<dyn LanguageModel>)> {
        let app = self.app(name, endpoint)?;
        match &app.handle {
            ModelHandle::Text(model) => Ok((app, model.clone())),
            ModelHandle::Image(_) => Err(Error::EndpointNotFound {
                app_name: name.to_string(),
                endpoint: endpoint.as_str().to_string(),
            }),
        }
    }

    fn image_model(&self, name: &str) -> Result<(&DeployedApp, Arc<dyn ImageModel>)> {
        let app = self.app(name, EndpointKind::TextToImage)?;
        match &app.handle {
            ModelHandle::Image(model) => Ok((app, model.clone())),
            ModelHandle::Text(_) => Err(Error::EndpointNotFound {
                app_name: name.to_string(),
                endpoint: EndpointKind::TextToImage.as_str().to_string(),
            }),
        }
    }
}

fn api_error(e: Error) -> ApiError {
    let status = e.status_code();
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        debug!("Request rejected: {}", e);
    }
    (status, Json(ErrorResponse { error: e.to_string() }))
}

/// Runs CPU-bound inference off the async workers, bounded by the app's time
/// limit. A timed-out task is detached, so `work` must stop at the same limit.
async fn run_blocking<T, F>(timeout: Duration, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(work)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::internal(format!("inference task failed: {e}"))),
        Err(_) => Err(Error::Timeout {
            timeout_secs: timeout.as_secs(),
        }),
    }
}

fn generation_defaults(app: &DeployedApp) -> GenerationDefaults {
    match &app.model {
        ModelConfig::TextGeneration { defaults, .. } => defaults.clone(),
        ModelConfig::TextToImage { .. } => Default::default(),
    }
}

fn image_defaults(app: &DeployedApp) -> ImageDefaults {
    match &app.model {
        ModelConfig::TextToImage { defaults, .. } => defaults.clone(),
        ModelConfig::TextGeneration { .. } => Default::default(),
    }
}

fn require_prompt(prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(Error::validation("prompt must not be empty"));
    }
    Ok(())
}

/// JSON 404 for every path no route matches.
pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    let segments: Vec<&str> = uri.path().trim_matches('/').split('/').collect();
    let e = match segments.as_slice() {
        [app_name, endpoint] if !app_name.is_empty() => Error::EndpointNotFound {
            app_name: app_name.to_string(),
            endpoint: endpoint.to_string(),
        },
        _ => Error::RouteNotFound {
            method: method.to_string(),
            path: uri.path().to_string(),
        },
    };
    api_error(e)
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_apps(State(state): State<AppState>) -> Json<Vec<ConnectionInfo>> {
    let mut apps: Vec<ConnectionInfo> = state
        .apps
        .values()
        .map(DeployedApp::connection_info)
        .collect();
    apps.sort_by(|a, b| a.app_name.cmp(&b.app_name));
    Json(apps)
}

pub async fn generate(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> std::result::Result<Response, ApiError> {
    info!("Received generate request for app {}", app_name);

    let (app, model) = state
        .language_model(&app_name, EndpointKind::Generate)
        .map_err(api_error)?;
    require_prompt(&request.prompt).map_err(api_error)?;
    let params = request.sampling_params(&generation_defaults(app));
    params.validate().map_err(api_error)?;

    let prompt = request.prompt;
    let timeout = app.resources.timeout;
    let generation = run_blocking(timeout, move || {
        model::generate_within(model, &prompt, params, timeout)
    })
    .await
    .map_err(api_error)?;

    debug!(
        "App {} generated {} tokens ({:?})",
        app_name, generation.tokens, generation.finish_reason
    );

    Ok((
        [
            (header::CONTENT_TYPE, TEXT_PLAIN.to_string()),
            (
                header::HeaderName::from_static("x-finish-reason"),
                format!("{:?}", generation.finish_reason).to_lowercase(),
            ),
            (
                header::HeaderName::from_static("x-generated-tokens"),
                generation.tokens.to_string(),
            ),
        ],
        generation.text,
    )
        .into_response())
}

/// Streams one chunk per decoded token while the decode loop runs on a
/// blocking thread. A closed connection stops the loop at the next token.
pub async fn generate_stream(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(request): Json<GenerateRequest>,
) -> std::result::Result<Response, ApiError> {
    info!("Received streaming generate request for app {}", app_name);

    let (app, model) = state
        .language_model(&app_name, EndpointKind::GenerateStream)
        .map_err(api_error)?;
    require_prompt(&request.prompt).map_err(api_error)?;
    let params = request.sampling_params(&generation_defaults(app));
    params.validate().map_err(api_error)?;

    let timeout = app.resources.timeout;
    let (tx, rx) = mpsc::channel::<std::io::Result<String>>(STREAM_CHANNEL_CAPACITY);
    let prompt = request.prompt;

    tokio::task::spawn_blocking(move || {
        let mut stream = TokenStream::new(model, &prompt, params).with_time_limit(timeout);
        for token in stream.by_ref() {
            let chunk = match token {
                Ok(token) => Ok(token.text),
                Err(e @ Error::Timeout { .. }) => {
                    warn!("Streaming generation for {} stopped: {}", app_name, e);
                    Err(std::io::Error::other(e.to_string()))
                }
                Err(e) => {
                    error!("Streaming generation for {} failed: {}", app_name, e);
                    Err(std::io::Error::other(e.to_string()))
                }
            };
            let failed = chunk.is_err();
            if tx.blocking_send(chunk).is_err() {
                debug!("Client for {} disconnected, stopping decode loop", app_name);
                return;
            }
            if failed {
                return;
            }
        }
        debug!(
            "Streaming generation for {} finished after {} steps ({:?})",
            app_name,
            stream.steps(),
            stream.finish_reason()
        );
    });

    Ok((
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

pub async fn text_to_image(
    State(state): State<AppState>,
    Path(app_name): Path<String>,
    Json(request): Json<TextToImageRequest>,
) -> std::result::Result<Response, ApiError> {
    info!("Received text_to_image request for app {}", app_name);

    let (app, model) = state.image_model(&app_name).map_err(api_error)?;
    require_prompt(&request.prompt).map_err(api_error)?;
    let image_request = request.image_request(&image_defaults(app));
    image_request.validate().map_err(api_error)?;

    let encoded = run_blocking(app.resources.timeout, move || {
        let image = model.generate(&image_request)?;
        encode_png_base64(&image)
    })
    .await
    .map_err(api_error)?;

    debug!("App {} produced {} base64 bytes", app_name, encoded.len());
    Ok(([(header::CONTENT_TYPE, TEXT_PLAIN)], encoded).into_response())
}
