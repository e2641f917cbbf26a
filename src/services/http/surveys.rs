use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use super::{reply, reply_saved, ApiResult, AppState};
use crate::services::{dispatch, surveys::SurveyRequest};

const SERVICE: &str = "Surveys";

#[derive(Deserialize)]
pub struct SelectBody {
    option: usize,
}

pub async fn list_surveys(State(state): State<AppState>) -> ApiResult {
    let catalog = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::ListSurveys { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, catalog))
}

pub async fn start(State(state): State<AppState>, Path(survey_id): Path<String>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Start {
            survey_id,
            response,
        }
    })
    .await?;

    Ok(reply(StatusCode::CREATED, status))
}

pub async fn status(State(state): State<AppState>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Status { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, status))
}

pub async fn select(State(state): State<AppState>, Json(req): Json<SelectBody>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Select {
            option: req.option,
            response,
        }
    })
    .await?;

    Ok(reply(StatusCode::OK, status))
}

pub async fn next(State(state): State<AppState>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Next { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, status))
}

pub async fn previous(State(state): State<AppState>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Previous { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, status))
}

pub async fn resume(State(state): State<AppState>) -> ApiResult {
    let status = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Resume { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, status))
}

pub async fn submit(State(state): State<AppState>) -> ApiResult {
    let saved = dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Submit { response }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved))
}

pub async fn cancel(State(state): State<AppState>) -> ApiResult {
    dispatch(&state.channels.surveys, SERVICE, |response| {
        SurveyRequest::Cancel { response }
    })
    .await?;

    Ok(StatusCode::NO_CONTENT.into_response())
}
