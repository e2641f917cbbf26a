use async_trait::async_trait;
use chrono::NaiveDate;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

use super::users::{now_millis, today, SessionManager};
use super::{RequestHandler, Responder, Saved, Service, ServiceError};
use crate::models::counters::GlobalDailyCounter;
use crate::models::surveys::SurveyOption;
use crate::models::upgrades::{UpgradeTier, UPGRADE_TIERS};
use crate::models::users::{Stats, UserPatch, UserRecord, MAX_SCORE};
use crate::repositories::counters::CounterRepository;
use crate::repositories::payments::{is_valid_transaction_code, PaymentGateway};

pub const ELEVATED_PERFORMANCE: u32 = 75;
pub const ELEVATED_DAILY_SURVEYS: u32 = 7;
pub const STANDARD_DAILY_SURVEYS: u32 = 3;

pub const DEFAULT_REWARD: u64 = 40;
pub const MIN_REWARD: u64 = 10;
pub const REWARD_VARIANCE: RangeInclusive<i64> = -5..=10;
pub const PERFORMANCE_GAIN: RangeInclusive<u32> = 1..=3;
pub const ELIGIBILITY_GAIN: RangeInclusive<u32> = 1..=2;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    GlobalCap,
    EarningsCap,
    SurveyCountCap,
}

impl BlockReason {
    pub fn offers_upgrade(&self) -> bool {
        matches!(self, BlockReason::EarningsCap)
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::GlobalCap => write!(f, "global cap reached"),
            BlockReason::EarningsCap => write!(f, "earnings cap reached"),
            BlockReason::SurveyCountCap => write!(f, "survey-count cap reached"),
        }
    }
}

pub fn daily_survey_limit(performance: u32) -> u32 {
    if performance >= ELEVATED_PERFORMANCE {
        ELEVATED_DAILY_SURVEYS
    } else {
        STANDARD_DAILY_SURVEYS
    }
}

/// Gates are checked in order and the first failure wins: global count,
/// daily earnings, daily survey count. `stats` must already be rolled over.
pub fn check_eligibility(stats: &Stats, global_count: u64, global_cap: u64) -> Result<(), BlockReason> {
    if global_count >= global_cap {
        return Err(BlockReason::GlobalCap);
    }
    if stats.daily_earnings >= stats.daily_limit {
        return Err(BlockReason::EarningsCap);
    }
    if stats.daily_count >= daily_survey_limit(stats.performance) {
        return Err(BlockReason::SurveyCountCap);
    }

    Ok(())
}

/// Nominal reward plus variance, floored at the minimum, then cut down so
/// today's earnings never pass the daily cap. May return zero.
pub fn compute_reward<R: Rng + ?Sized>(base: u64, stats: &Stats, rng: &mut R) -> u64 {
    let varied = base as i64 + rng.gen_range(REWARD_VARIANCE);
    let floored = varied.max(MIN_REWARD as i64) as u64;
    let headroom = stats.daily_limit.saturating_sub(stats.daily_earnings);

    floored.min(headroom)
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub reward: u64,
    pub performance: u32,
    pub eligibility: u32,
}

/// Builds the single merged update for a finished survey: stats, scores,
/// counters and the new history entry.
pub fn reward_patch<R: Rng + ?Sized>(
    user: &UserRecord,
    survey: Option<&SurveyOption>,
    today: NaiveDate,
    now_millis: i64,
    rng: &mut R,
) -> (RewardOutcome, UserPatch) {
    let mut scratch = user.clone();
    scratch.stats.roll_over(today);

    let base = survey.map(|s| s.reward).unwrap_or(DEFAULT_REWARD);
    let reward = compute_reward(base, &scratch.stats, rng);

    let stats = &mut scratch.stats;
    stats.earnings += reward;
    stats.daily_earnings += reward;
    stats.performance = (stats.performance + rng.gen_range(PERFORMANCE_GAIN)).min(MAX_SCORE);
    stats.eligibility = (stats.eligibility + rng.gen_range(ELIGIBILITY_GAIN)).min(MAX_SCORE);
    stats.surveys_completed += 1;
    stats.daily_count += 1;

    let outcome = RewardOutcome {
        reward,
        performance: stats.performance,
        eligibility: stats.eligibility,
    };

    let label = match survey {
        Some(survey) => format!("Survey: {}", survey.title),
        None => "Survey reward".to_string(),
    };
    scratch.push_history(now_millis, today.to_string(), reward, label);

    let patch = UserPatch {
        stats: Some(scratch.stats),
        history: Some(scratch.history),
        ..Default::default()
    };
    (outcome, patch)
}

pub fn upgrade_tiers(current_limit: u64) -> Vec<UpgradeTier> {
    UPGRADE_TIERS
        .iter()
        .filter(|tier| tier.daily_limit > current_limit)
        .copied()
        .collect()
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub allowed: bool,
    pub reason: Option<BlockReason>,
    pub message: Option<String>,
    pub upgrade_available: bool,
    pub daily_count: u32,
    pub daily_survey_limit: u32,
    pub daily_earnings: u64,
    pub daily_limit: u64,
    pub global_count: u64,
    pub global_cap: u64,
}

impl EligibilityReport {
    fn new(stats: &Stats, global: &GlobalDailyCounter, global_cap: u64) -> Self {
        let verdict = check_eligibility(stats, global.count, global_cap);
        let reason = verdict.err();

        Self {
            allowed: reason.is_none(),
            reason,
            message: reason.map(|r| r.to_string()),
            upgrade_available: reason.is_some_and(|r| r.offers_upgrade()),
            daily_count: stats.daily_count,
            daily_survey_limit: daily_survey_limit(stats.performance),
            daily_earnings: stats.daily_earnings,
            daily_limit: stats.daily_limit,
            global_count: global.count,
            global_cap,
        }
    }
}

/// Daily caps and rewards for the session user. Reads and writes user state
/// through the session manager.
#[derive(Clone)]
pub struct EarningsEngine {
    sessions: SessionManager,
    counters: CounterRepository,
    global_cap: u64,
}

impl EarningsEngine {
    pub fn new(sessions: SessionManager, counters: CounterRepository, global_cap: u64) -> Self {
        Self {
            sessions,
            counters,
            global_cap,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn counters(&self) -> &CounterRepository {
        &self.counters
    }

    pub async fn eligibility(&self, today: NaiveDate) -> Result<EligibilityReport, ServiceError> {
        let user = self.sessions.current(today).await?.value;
        let global = self
            .counters
            .current(today)
            .await
            .map_err(|e| ServiceError::repository("Earnings", e))?;

        Ok(EligibilityReport::new(&user.stats, &global, self.global_cap))
    }

    /// Checks every gate and consumes one global slot. The slot stays spent
    /// even if the survey is abandoned.
    pub async fn start_survey(&self, today: NaiveDate) -> Result<GlobalDailyCounter, ServiceError> {
        let report = self.eligibility(today).await?;
        if let Some(reason) = report.reason {
            log::info!("Survey start blocked: {}", reason);
            return Err(ServiceError::Blocked(reason));
        }

        let counter = self
            .counters
            .consume(today, self.global_cap)
            .await
            .map_err(|e| ServiceError::repository("Earnings", e))?
            .ok_or_else(|| {
                log::info!("Survey start blocked: {}", BlockReason::GlobalCap);
                ServiceError::Blocked(BlockReason::GlobalCap)
            })?;

        log::debug!("Global survey count for {} is {}", today, counter.count);
        Ok(counter)
    }

    pub async fn process_reward(
        &self,
        owner: &str,
        survey: Option<&SurveyOption>,
        today: NaiveDate,
    ) -> Result<Saved<(UserRecord, RewardOutcome)>, ServiceError> {
        let saved = self
            .sessions
            .modify_session_user(
                owner,
                |user| {
                    let mut rng = rand::thread_rng();
                    Ok(reward_patch(user, survey, today, now_millis(), &mut rng))
                },
                today,
            )
            .await?;

        let (user, outcome) = &saved.value;
        log::info!(
            "Rewarded {} with {} ({} of {} today).",
            user.username,
            outcome.reward,
            user.stats.daily_earnings,
            user.stats.daily_limit
        );
        Ok(saved)
    }

    /// Replaces the daily earnings cap.
    pub async fn upgrade_limit(&self, new_limit: u64, today: NaiveDate) -> Result<Saved<UserRecord>, ServiceError> {
        let saved = self
            .sessions
            .modify_current(
                |user| {
                    let mut stats = user.stats.clone();
                    stats.daily_limit = new_limit;
                    Ok((
                        (),
                        UserPatch {
                            stats: Some(stats),
                            ..Default::default()
                        },
                    ))
                },
                today,
            )
            .await?;

        log::info!("Daily limit for {} is now {}", saved.value.0.username, new_limit);
        Ok(saved.map(|(user, _)| user))
    }
}

pub enum EarningsRequest {
    GetEligibility {
        response: Responder<EligibilityReport>,
    },
    ListUpgrades {
        response: Responder<Vec<UpgradeTier>>,
    },
    Upgrade {
        daily_limit: u64,
        transaction_code: String,
        response: Responder<Saved<UserRecord>>,
    },
}

#[derive(Clone)]
pub struct EarningsRequestHandler {
    engine: EarningsEngine,
    payments: Arc<dyn PaymentGateway>,
}

impl EarningsRequestHandler {
    pub fn new(engine: EarningsEngine, payments: Arc<dyn PaymentGateway>) -> Self {
        Self { engine, payments }
    }

    async fn list_upgrades(&self) -> Result<Vec<UpgradeTier>, ServiceError> {
        let user = self.engine.sessions().current(today()).await?.value;
        Ok(upgrade_tiers(user.stats.daily_limit))
    }

    /// Validates the tier and transaction code, waits for the simulated
    /// payment check and applies the new cap.
    pub async fn upgrade(
        &self,
        daily_limit: u64,
        transaction_code: &str,
        today: NaiveDate,
    ) -> Result<Saved<UserRecord>, ServiceError> {
        if !is_valid_transaction_code(transaction_code) {
            return Err(ServiceError::Validation(
                "transaction code must be exactly 10 letters or digits".to_string(),
            ));
        }

        let user = self.engine.sessions().current(today).await?.value;
        let tier = upgrade_tiers(user.stats.daily_limit)
            .into_iter()
            .find(|tier| tier.daily_limit == daily_limit)
            .ok_or_else(|| {
                ServiceError::Validation(format!(
                    "{} is not an available upgrade above {}",
                    daily_limit, user.stats.daily_limit
                ))
            })?;

        self.payments
            .verify(transaction_code, tier.price)
            .await
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        self.engine.upgrade_limit(tier.daily_limit, today).await
    }
}

#[async_trait]
impl RequestHandler<EarningsRequest> for EarningsRequestHandler {
    async fn handle_request(&self, request: EarningsRequest) {
        match request {
            EarningsRequest::GetEligibility { response } => {
                let _ = response.send(self.engine.eligibility(today()).await);
            }
            EarningsRequest::ListUpgrades { response } => {
                let _ = response.send(self.list_upgrades().await);
            }
            EarningsRequest::Upgrade {
                daily_limit,
                transaction_code,
                response,
            } => {
                let result = self.upgrade(daily_limit, &transaction_code, today()).await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct EarningsService;

impl EarningsService {
    pub fn new() -> Self {
        EarningsService {}
    }
}

#[async_trait]
impl Service<EarningsRequest, EarningsRequestHandler> for EarningsService {}
