use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use super::{Channels, Saved, ServiceError};

mod earnings;
mod surveys;
mod users;

#[derive(Clone)]
pub struct AppState {
    pub channels: Channels,
    pub public_url: String,
}

/// Service error rendered as `{"error": kind, "description": message}`.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Duplicate(_) => StatusCode::CONFLICT,
            ServiceError::InvalidCredential | ServiceError::NoSession => StatusCode::UNAUTHORIZED,
            ServiceError::Blocked(_) => StatusCode::FORBIDDEN,
            ServiceError::InvalidState(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.0 {
            ServiceError::Validation(_) => "validation",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Duplicate(_) => "duplicate",
            ServiceError::InvalidCredential => "invalid_credential",
            ServiceError::NoSession => "no_session",
            ServiceError::Blocked(_) => "blocked",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::Capacity(_) => "capacity",
            ServiceError::Internal(_)
            | ServiceError::Repository(..)
            | ServiceError::Communication(..) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }

        let body = match &self.0 {
            ServiceError::Blocked(reason) => json!({
                "error": self.kind(),
                "description": self.0.to_string(),
                "reason": reason,
                "upgradeAvailable": reason.offers_upgrade(),
            }),
            _ => json!({
                "error": self.kind(),
                "description": self.0.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult = Result<Response, ApiError>;

#[derive(Serialize)]
struct Envelope<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

pub fn reply<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope { data, warning: None })).into_response()
}

/// Successful write; a storage warning rides along with the data.
pub fn reply_saved<T: Serialize>(status: StatusCode, saved: Saved<T>) -> Response {
    let envelope = Envelope {
        data: saved.value,
        warning: saved.warning,
    };
    (status, Json(envelope)).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(users::open_app))
        .route("/health", get(|| async { "OK" }))
        .route("/referrals/capture", post(users::capture_referral))
        .route("/r/{code}", get(users::follow_referral))
        .route("/register/code", post(users::request_registration_code))
        .route("/register", post(users::register))
        .route("/login", post(users::request_login))
        .route("/login/verify", post(users::complete_login))
        .route("/password-reset/code", post(users::request_password_reset))
        .route("/password-reset", post(users::reset_password))
        .route("/logout", post(users::logout))
        .route(
            "/me",
            get(users::get_current)
                .patch(users::update_current)
                .delete(users::delete_account),
        )
        .route("/me/history", get(users::get_history))
        .route("/invite", get(users::get_invite))
        .route(
            "/onboarding",
            get(users::get_onboarding).post(users::complete_onboarding),
        )
        .route("/eligibility", get(earnings::get_eligibility))
        .route(
            "/upgrades",
            get(earnings::list_upgrades).post(earnings::upgrade),
        )
        .route("/surveys", get(surveys::list_surveys))
        .route("/surveys/{id}/start", post(surveys::start))
        .route("/survey", get(surveys::status))
        .route("/survey/select", post(surveys::select))
        .route("/survey/next", post(surveys::next))
        .route("/survey/previous", post(surveys::previous))
        .route("/survey/resume", post(surveys::resume))
        .route("/survey/submit", post(surveys::submit))
        .route("/survey/cancel", post(surveys::cancel))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_http_server(
    channels: Channels,
    public_url: String,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let app = router(AppState {
        channels,
        public_url,
    });

    let listener = tokio::net::TcpListener::bind(listen).await?;
    log::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
