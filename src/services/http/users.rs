use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use super::{reply, reply_saved, ApiResult, AppState};
use crate::models::referrals::ReferralCapture;
use crate::models::users::{NewUser, UserPatch};
use crate::services::{dispatch, referrals::build_invite, users::UserRequest};

const SERVICE: &str = "Users";

#[derive(Deserialize)]
pub struct AppQuery {
    #[serde(rename = "ref")]
    referral: Option<String>,
}

#[derive(Deserialize)]
pub struct UsernameBody {
    username: String,
}

#[derive(Deserialize)]
pub struct CodeBody {
    code: String,
}

#[derive(Deserialize)]
pub struct RegisterBody {
    code: String,
    #[serde(flatten)]
    user: NewUser,
}

#[derive(Deserialize)]
pub struct LoginBody {
    username: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    code: String,
    new_password: String,
}

pub async fn capture_referral(
    State(state): State<AppState>,
    Json(req): Json<ReferralCapture>,
) -> ApiResult {
    dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::CaptureReferral {
            code: req.referral_code,
            response,
        }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Application entry. A `ref` parameter is captured once and dropped from
/// the address by redirecting to the bare URL.
pub async fn open_app(State(state): State<AppState>, Query(query): Query<AppQuery>) -> ApiResult {
    match query.referral {
        Some(code) => follow_referral(State(state), Path(code)).await,
        None => Ok(reply(
            StatusCode::OK,
            json!({ "service": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") }),
        )),
    }
}

/// Path form of the referral link.
pub async fn follow_referral(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult {
    dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::CaptureReferral { code, response }
    })
    .await?;

    Ok(Redirect::to("/").into_response())
}

pub async fn request_registration_code(
    State(state): State<AppState>,
    Json(req): Json<UsernameBody>,
) -> ApiResult {
    let otp = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::RequestRegistrationCode {
            username: req.username,
            response,
        }
    })
    .await?;

    Ok(reply(StatusCode::OK, otp))
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterBody>,
) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::Register {
            candidate: req.user,
            code: req.code,
            response,
        }
    })
    .await?;

    Ok(reply_saved(StatusCode::CREATED, saved.map(|user| user.public())))
}

pub async fn request_login(
    State(state): State<AppState>,
    Json(req): Json<LoginBody>,
) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::RequestLogin {
            username: req.username,
            password: req.password,
            response,
        }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved))
}

pub async fn complete_login(
    State(state): State<AppState>,
    Json(req): Json<CodeBody>,
) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::CompleteLogin {
            code: req.code,
            response,
        }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|user| user.public())))
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<UsernameBody>,
) -> ApiResult {
    let otp = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::RequestPasswordReset {
            username: req.username,
            response,
        }
    })
    .await?;

    Ok(reply(StatusCode::OK, otp))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(req): Json<ResetBody>,
) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::ResetPassword {
            code: req.code,
            new_password: req.new_password,
            response,
        }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|_| json!({"reset": true}))))
}

pub async fn logout(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::Logout { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|_| json!({"loggedOut": true}))))
}

pub async fn get_current(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::GetCurrent { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|user| user.public())))
}

pub async fn update_current(
    State(state): State<AppState>,
    Json(patch): Json<UserPatch>,
) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::UpdateUser { patch, response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|user| user.public())))
}

pub async fn delete_account(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::DeleteAccount { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|_| json!({"deleted": true}))))
}

pub async fn get_history(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::GetCurrent { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|user| user.history)))
}

pub async fn get_invite(State(state): State<AppState>) -> ApiResult {
    let user = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::GetCurrent { response }
    })
    .await?
    .value;

    let invite = build_invite(&state.public_url, &user.username)?;
    Ok(reply(StatusCode::OK, invite))
}

pub async fn get_onboarding(State(state): State<AppState>) -> ApiResult {
    let completed = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::GetOnboarding { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, json!({"completed": completed})))
}

pub async fn complete_onboarding(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.users, SERVICE, |response| {
        UserRequest::CompleteOnboarding { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|_| json!({"completed": true}))))
}
