use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    gemini::ModelFactory,
    models::{ChoiceOptions, ConvertResponse, CustomizationRequest, DesignImage, ImageError, Session, UnknownChoice},
    pipeline,
};

pub const DOWNLOAD_FILENAME: &str = "generated_page.html";

pub type SessionStore = Arc<RwLock<HashMap<Uuid, Session>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: SessionStore,
    pub models: Arc<dyn ModelFactory>,
    /// Server-side key; a key posted with the form takes precedence.
    pub api_key: Option<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Please enter your Gemini API key")]
    MissingApiKey,
    #[error("Please upload a design image (PNG or JPEG)")]
    MissingImage,
    #[error(transparent)]
    InvalidImage(#[from] ImageError),
    #[error("invalid form: {0}")]
    BadForm(String),
    #[error("invalid upload: {0}")]
    Upload(#[from] MultipartError),
    #[error("session not found")]
    SessionNotFound,
    #[error("a conversion is already running for this session")]
    Busy,
    #[error("nothing has been generated for this session yet")]
    NothingGenerated,
}

impl From<UnknownChoice> for AppError {
    fn from(e: UnknownChoice) -> Self { AppError::BadForm(e.to_string()) }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::MissingApiKey | AppError::MissingImage | AppError::BadForm(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidImage(ImageError::Unsupported) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            AppError::Upload(e) => e.status(),
            AppError::SessionNotFound | AppError::NothingGenerated => StatusCode::NOT_FOUND,
            AppError::Busy => StatusCode::CONFLICT,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn list_options() -> Json<ChoiceOptions> {
    Json(ChoiceOptions::all())
}

pub async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<Session>) {
    let session = Session::new();
    state.store.write().insert(session.id, session.clone());
    tracing::info!("🎯 Created session {}", session.id);
    (StatusCode::CREATED, Json(session))
}

pub async fn get_session(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<Session>, AppError> {
    state.store.read().get(&id).cloned().map(Json).ok_or(AppError::SessionNotFound)
}

/// Form fields accepted by the convert endpoint.
#[derive(Default)]
struct ConvertForm {
    image: Option<Bytes>,
    api_key: Option<String>,
    custom: CustomizationRequest,
}

async fn read_form(mut multipart: Multipart) -> Result<ConvertForm, AppError> {
    let mut form = ConvertForm::default();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else { continue };
        if name == "image" {
            let data = field.bytes().await?;
            form.image = Some(data).filter(|d| !d.is_empty());
            continue;
        }
        let value = field.text().await?;
        let chosen = Some(value.trim()).filter(|v| !v.is_empty());
        match name.as_str() {
            "api_key" => form.api_key = chosen.map(str::to_string),
            "color_scheme" => form.custom.color_scheme = chosen.map(str::parse).transpose()?,
            "font_size" => form.custom.font_size = chosen.map(str::parse).transpose()?,
            "spacing" => form.custom.spacing = chosen.map(str::parse).transpose()?,
            "button_style" => form.custom.button_style = chosen.map(str::parse).transpose()?,
            "animations" => form.custom.animations = chosen.is_some_and(is_checked),
            "instructions" => form.custom.instructions = value,
            _ => {}
        }
    }
    Ok(form)
}

fn is_checked(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "true" | "on" | "1" | "yes")
}

/// Marks a session busy for as long as it is alive.
struct InFlight {
    store: SessionStore,
    id: Uuid,
}

impl InFlight {
    fn acquire(store: &SessionStore, id: Uuid) -> Result<Self, AppError> {
        let mut guard = store.write();
        let session = guard.get_mut(&id).ok_or(AppError::SessionNotFound)?;
        if session.in_flight {
            return Err(AppError::Busy);
        }
        session.in_flight = true;
        Ok(Self { store: store.clone(), id })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(session) = self.store.write().get_mut(&self.id) {
            session.in_flight = false;
        }
    }
}

/// Analyze then synthesize. Credential and image are checked before any call is made.
pub async fn convert(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    let known = state.store.read().contains_key(&id);
    if !known {
        return Err(AppError::SessionNotFound);
    }

    let form = read_form(multipart).await?;
    let api_key = form.api_key.or_else(|| state.api_key.clone()).ok_or(AppError::MissingApiKey)?;
    let image = DesignImage::decode(form.image.ok_or(AppError::MissingImage)?)?;
    let info = image.info();

    let _in_flight = InFlight::acquire(&state.store, id)?;
    tracing::info!(
        "🚀 Converting {}x{} {} for session {}",
        info.width, info.height, info.mime_type, id
    );

    let model = state.models.connect(&api_key);
    let report = pipeline::convert(model.as_ref(), &image, &form.custom).await;

    match report.error() {
        Some(message) => tracing::error!("❌ Session {} conversion failed: {}", id, message),
        None => tracing::info!("✅ Session {} conversion complete", id),
    }

    if let Some(session) = state.store.write().get_mut(&id) {
        session.record(info.clone(), &report);
    }
    Ok(Json(ConvertResponse { session_id: id, image: info, report }))
}

fn last_document(state: &AppState, id: Uuid) -> Result<String, AppError> {
    let store = state.store.read();
    let session = store.get(&id).ok_or(AppError::SessionNotFound)?;
    session.html.clone().ok_or(AppError::NothingGenerated)
}

pub async fn preview(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Html<String>, AppError> {
    last_document(&state, id).map(Html)
}

pub async fn download(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<Response, AppError> {
    let html = last_document(&state, id)?;
    let disposition = format!("attachment; filename=\"{DOWNLOAD_FILENAME}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        html,
    )
        .into_response())
}

pub async fn analysis(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<String, AppError> {
    let store = state.store.read();
    let session = store.get(&id).ok_or(AppError::SessionNotFound)?;
    session.analysis.clone().ok_or(AppError::NothingGenerated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app,
        gemini::{GeminiError, GenerativeModel},
        models::tests::png,
        pipeline::tests::{quota_exceeded, ScriptedModel},
    };
    use axum::{body::Body, http::Request, Router};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    const BOUNDARY: &str = "design-to-html-boundary";
    const DOC: &str = "<!DOCTYPE html>\n<html><body><header>Hi</header></body></html>";

    struct ScriptedFactory {
        model: Arc<ScriptedModel>,
        keys: Mutex<Vec<String>>,
    }

    impl ModelFactory for ScriptedFactory {
        fn connect(&self, api_key: &str) -> Arc<dyn GenerativeModel> {
            self.keys.lock().push(api_key.to_string());
            self.model.clone()
        }
    }

    fn setup(
        api_key: Option<&str>,
        replies: impl IntoIterator<Item = Result<String, GeminiError>>,
    ) -> (Router, AppState, Arc<ScriptedFactory>) {
        setup_with_limit(api_key, replies, 1024 * 1024)
    }

    fn setup_with_limit(
        api_key: Option<&str>,
        replies: impl IntoIterator<Item = Result<String, GeminiError>>,
        max_upload_bytes: usize,
    ) -> (Router, AppState, Arc<ScriptedFactory>) {
        let factory = Arc::new(ScriptedFactory {
            model: Arc::new(ScriptedModel::new(replies)),
            keys: Mutex::default(),
        });
        let state = AppState {
            store: Arc::default(),
            models: factory.clone(),
            api_key: api_key.map(str::to_string),
        };
        (app(state.clone(), max_upload_bytes), state, factory)
    }

    fn form(fields: &[(&str, &str)], image: Option<&[u8]>) -> Body {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
            );
        }
        if let Some(bytes) = image {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"design.png\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, headers, body)
    }

    async fn new_session(app: &Router) -> Uuid {
        let req = Request::post("/api/sessions").body(Body::empty()).unwrap();
        let (status, _, body) = send(app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        let session: Value = serde_json::from_slice(&body).unwrap();
        session["id"].as_str().unwrap().parse().unwrap()
    }

    fn convert_request(id: Uuid, body: Body) -> Request<Body> {
        Request::post(format!("/api/sessions/{id}/convert"))
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn convert_then_download() {
        let (app, _, factory) = setup(Some("server-key"), [
            Ok("Layout: header+footer".to_string()),
            Ok(format!("Here is your page:\n```html\n{DOC}\n```")),
        ]);
        let id = new_session(&app).await;
        let image = png(1200, 800);
        let body = form(&[("color_scheme", "Modern Dark"), ("animations", "on")], Some(&image));

        let (status, _, body) = send(&app, convert_request(id, body)).await;
        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["outcome"], "analyzed");
        assert_eq!(report["analysis"], "Layout: header+footer");
        assert_eq!(report["generation"]["status"], "success");
        assert_eq!(report["generation"]["value"], DOC);
        assert_eq!(report["image"]["width"], 1200);
        assert_eq!(report["image"]["height"], 800);
        assert_eq!(*factory.keys.lock(), vec!["server-key".to_string()]);

        let prompts = factory.model.prompts.lock().clone();
        assert!(prompts[1].contains("- Use a Modern Dark color scheme\n- Add smooth CSS animations and transitions\n"));

        let req = Request::get(format!("/api/sessions/{id}/download")).body(Body::empty()).unwrap();
        let (status, headers, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
        assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"generated_page.html\"");
        assert_eq!(&body[..], DOC.as_bytes());

        let req = Request::get(format!("/api/sessions/{id}/analysis")).body(Body::empty()).unwrap();
        let (_, _, body) = send(&app, req).await;
        assert_eq!(&body[..], b"Layout: header+footer");

        let req = Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap();
        let (_, _, body) = send(&app, req).await;
        let session: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(session["has_document"], true);
        assert_eq!(session["in_flight"], false);
    }

    #[tokio::test]
    async fn form_key_overrides_server_key() {
        let (app, _, factory) = setup(Some("server-key"), [Ok("a".to_string()), Ok(DOC.to_string())]);
        let id = new_session(&app).await;
        let body = form(&[("api_key", "user-key")], Some(&png(4, 4)));
        let (status, _, _) = send(&app, convert_request(id, body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(*factory.keys.lock(), vec!["user-key".to_string()]);
    }

    #[tokio::test]
    async fn missing_key_blocks_before_any_call() {
        let (app, _, factory) = setup(None, [Ok("a".to_string())]);
        let id = new_session(&app).await;
        let (status, _, body) = send(&app, convert_request(id, form(&[("api_key", "  ")], Some(&png(4, 4))))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(err["error"], "Please enter your Gemini API key");
        assert!(factory.keys.lock().is_empty());
        assert!(factory.model.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn missing_or_bad_image_is_rejected() {
        let (app, _, factory) = setup(Some("k"), []);
        let id = new_session(&app).await;

        let (status, _, _) = send(&app, convert_request(id, form(&[], None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = send(&app, convert_request(id, form(&[], Some(b"not an image")))).await;
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(factory.model.prompts.lock().is_empty());
    }

    #[tokio::test]
    async fn oversized_upload_is_payload_too_large() {
        let (app, _, factory) = setup_with_limit(Some("k"), [], 4 * 1024);
        let id = new_session(&app).await;
        let mut image = png(4, 4);
        image.resize(16 * 1024, 0);

        let (status, _, _) = send(&app, convert_request(id, form(&[], Some(&image)))).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(factory.model.prompts.lock().is_empty());

        let req = Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap();
        let (_, _, body) = send(&app, req).await;
        let session: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(session["in_flight"], false);
    }

    #[tokio::test]
    async fn unknown_choice_is_a_bad_form() {
        let (app, _, _) = setup(Some("k"), []);
        let id = new_session(&app).await;
        let body = form(&[("spacing", "cramped")], Some(&png(4, 4)));
        let (status, _, _) = send(&app, convert_request(id, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analysis_failure_is_reported_and_nothing_stored() {
        let (app, _, factory) = setup(Some("k"), [Err(quota_exceeded())]);
        let id = new_session(&app).await;
        let (status, _, body) = send(&app, convert_request(id, form(&[], Some(&png(4, 4))))).await;

        assert_eq!(status, StatusCode::OK);
        let report: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(report["outcome"], "analysis_failed");
        assert_eq!(report["message"], "quota exceeded");
        assert_eq!(factory.model.prompts.lock().len(), 1);

        let req = Request::get(format!("/api/sessions/{id}/preview")).body(Body::empty()).unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::get(format!("/api/sessions/{id}")).body(Body::empty()).unwrap();
        let (_, _, body) = send(&app, req).await;
        let session: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(session["last_error"], "quota exceeded");
    }

    #[tokio::test]
    async fn second_submission_while_busy_is_refused() {
        let (app, state, factory) = setup(Some("k"), [Ok("a".to_string()), Ok(DOC.to_string())]);
        let id = new_session(&app).await;
        let held = InFlight::acquire(&state.store, id).unwrap();

        let (status, _, _) = send(&app, convert_request(id, form(&[], Some(&png(4, 4))))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(factory.model.prompts.lock().is_empty());

        drop(held);
        let (status, _, _) = send(&app, convert_request(id, form(&[], Some(&png(4, 4))))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (app, _, _) = setup(Some("k"), []);
        let id = Uuid::new_v4();
        let (status, _, _) = send(&app, convert_request(id, form(&[], Some(&png(4, 4))))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let req = Request::get(format!("/api/sessions/{id}/download")).body(Body::empty()).unwrap();
        let (status, _, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn options_list_every_choice() {
        let (app, _, _) = setup(None, []);
        let req = Request::get("/api/options").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        let options: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(options["color_scheme"][0], "Original (from design)");
        assert_eq!(options["font_size"].as_array().unwrap().len(), 4);
        assert_eq!(options["button_style"][4], "Outlined");
    }
}
