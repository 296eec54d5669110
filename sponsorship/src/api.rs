use crate::SponsorshipError;
use crate::assignment::{AssignError, Assigner, AssignmentReport};
use crate::auth::{Authenticator, require_basic, require_bearer};
use crate::config::{Config, Listener};
use crate::metrics_defs::{ASSIGNMENT_REQUESTS, ASSIGNMENTS_INFLIGHT};
use crate::store::DocumentStore;
use crate::upload::{UploadError, UploadedFile, Uploader};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{StatusCode, header::CONTENT_TYPE},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use shared::{counter, gauge};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

const RECEIVED_PAGE: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>Upload</title></head>
<body>
<p>Successfully uploaded file.</p>
<p><a href=\".\">Back</a></p>
</body>
</html>
";

#[derive(Clone)]
struct AppState {
    assigner: Arc<Assigner>,
    uploader: Arc<Uploader>,
}

/// Builds the public router.
///
/// `{prefix}/hektar` requires a bearer token. Everything under
/// `{prefix}/update` requires basic auth: the upload endpoint and the
/// static files of the upload page. The page itself lives at
/// `{prefix}/update/`, so its form posts relative to that directory.
pub fn router(config: &Config, store: Arc<dyn DocumentStore>) -> Router {
    let auth = Arc::new(Authenticator::new(&config.auth));
    let state = AppState {
        assigner: Arc::new(Assigner::new(store.clone(), config)),
        uploader: Arc::new(Uploader::new(&config.upload, store)),
    };
    let prefix = config.normalized_prefix();
    let update_dir = format!("{prefix}/update");
    let basic_auth = middleware::from_fn_with_state(auth.clone(), require_basic);

    let to_index = Redirect::permanent(&format!("{update_dir}/"));
    let update = Router::new()
        .route(
            "/",
            get(move || {
                let to_index = to_index.clone();
                async move { to_index }
            }),
        )
        .route("/upload", post(upload_handler))
        .fallback_service(ServeDir::new(&config.upload.static_dir))
        .layer(basic_auth.clone())
        .layer(DefaultBodyLimit::max(config.upload.max_size_bytes));

    let update_index = Router::new()
        .route_service(
            &format!("{update_dir}/"),
            ServeFile::new(config.upload.static_dir.join("index.html")),
        )
        .layer(basic_auth);

    Router::new()
        .route(&format!("{prefix}/hektar"), get(assign_handler))
        .route_layer(middleware::from_fn_with_state(auth, require_bearer))
        .nest(&update_dir, update)
        .merge(update_index)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(listener: &Listener, app: Router) -> Result<(), SponsorshipError> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let tcp_listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Serving sponsorship API");
    axum::serve(tcp_listener, app).await?;
    Ok(())
}

#[derive(Deserialize, Debug)]
struct AssignParams {
    #[serde(default)]
    id: String,
    area: Option<String>,
}

struct AssignResponse(AssignmentReport);

impl IntoResponse for AssignResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.0.render(),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

/// Keeps an assignment in the inflight gauge for as long as it runs and
/// counts it by outcome once it ends. A request dropped before it finished
/// is counted as `cancelled`.
struct AssignmentTracker {
    outcome: &'static str,
}

impl AssignmentTracker {
    fn start() -> Self {
        gauge!(ASSIGNMENTS_INFLIGHT).increment(1.0);
        AssignmentTracker {
            outcome: "cancelled",
        }
    }
}

impl Drop for AssignmentTracker {
    fn drop(&mut self) {
        gauge!(ASSIGNMENTS_INFLIGHT).decrement(1.0);
        counter!(ASSIGNMENT_REQUESTS, "outcome" => self.outcome).increment(1);
    }
}

async fn assign_handler(
    State(state): State<AppState>,
    Query(params): Query<AssignParams>,
) -> Result<AssignResponse, AssignError> {
    let mut tracker = AssignmentTracker::start();
    let result = state
        .assigner
        .assign(&params.id, params.area.as_deref())
        .await;

    tracker.outcome = match &result {
        Ok(_) => "assigned",
        Err(e) => e.as_str(),
    };

    result.map(AssignResponse)
}

impl IntoResponse for AssignError {
    fn into_response(self) -> Response {
        let status = match &self {
            AssignError::NotFound => return StatusCode::NOT_FOUND.into_response(),
            AssignError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AssignError::Contention { .. } => StatusCode::CONFLICT,
            AssignError::StoreUnavailable(_) => StatusCode::BAD_GATEWAY,
            AssignError::StoreTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        if status.is_server_error() || status == StatusCode::CONFLICT {
            tracing::warn!(error = %self, "Assignment failed");
        }

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (status, body).into_response()
    }
}

async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Html<&'static str>, UploadError> {
    let mut project_name = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("myFile") => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(multipart_error)?;
                file = Some(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            }
            Some("projectname") => {
                project_name = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let file = file.ok_or(UploadError::MissingField("myFile"))?;
    state.uploader.upload(project_name.as_deref(), file).await?;
    Ok(Html(RECEIVED_PAGE))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> UploadError {
    UploadError::Multipart {
        status: err.status(),
        reason: err.body_text(),
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadError::MissingField(_)
            | UploadError::InvalidProjectName(_)
            | UploadError::NotJson(_) => StatusCode::BAD_REQUEST,
            UploadError::Multipart { status, .. } => *status,
            UploadError::Relay(_) | UploadError::RelayRejected(_) => StatusCode::BAD_GATEWAY,
            UploadError::Store(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            UploadError::Store(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Upload failed");
        } else {
            tracing::info!(error = %self, "Upload rejected");
        }

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });
        (status, body).into_response()
    }
}
