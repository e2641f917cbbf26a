use axum::{extract::State, http::StatusCode, Json};

use super::{reply, reply_saved, ApiResult, AppState};
use crate::models::upgrades::UpgradeRequest;
use crate::services::{dispatch, earnings::EarningsRequest};

const SERVICE: &str = "Earnings";

pub async fn get_eligibility(State(state): State<AppState>) -> ApiResult {
    let report = dispatch(&state.channels.earnings, SERVICE, |response| {
        EarningsRequest::GetEligibility { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, report))
}

pub async fn list_upgrades(State(state): State<AppState>) -> ApiResult {
    let tiers = dispatch(&state.channels.earnings, SERVICE, |response| {
        EarningsRequest::ListUpgrades { response }
    })
    .await?;

    Ok(reply(StatusCode::OK, tiers))
}

/// Applies a paid tier once the simulated payment check accepts the code.
pub async fn upgrade(
    State(state): State<AppState>,
    Json(req): Json<UpgradeRequest>,
) -> ApiResult {
    let saved = dispatch(&state.channels.earnings, SERVICE, |response| {
        EarningsRequest::Upgrade {
            daily_limit: req.daily_limit,
            transaction_code: req.transaction_code,
            response,
        }
    })
    .await?;

    Ok(reply_saved(StatusCode::OK, saved.map(|user| user.public())))
}
