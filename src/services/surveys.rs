use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use uuid::Uuid;

use super::earnings::{EarningsEngine, RewardOutcome};
use super::users::today;
use super::{RequestHandler, Responder, Saved, Service, ServiceError};
use crate::models::surveys::{
    fallback_questions, find_survey, SurveyOption, SurveyPhase, SurveyQuestion, SurveyStatus,
    CATALOG,
};
use crate::models::users::Stats;
use crate::repositories::ai::{extract_json_array, generate_with_timeout, TextProvider};

pub const OPTIONS_PER_QUESTION: usize = 4;

#[derive(Clone, Debug)]
pub struct SurveyTiming {
    pub question_seconds: u32,
    pub tick: Duration,
    pub submit_delay: Duration,
    pub questions_timeout: Duration,
    pub question_count: usize,
}

/// Parses provider output into at most `count` questions. Entries without a
/// prompt or without exactly four non-empty options are dropped.
pub fn parse_questions(text: &str, count: usize) -> Option<Vec<SurveyQuestion>> {
    let array = extract_json_array(text)?;
    let raw: Vec<serde_json::Value> = serde_json::from_str(array).ok()?;

    let questions: Vec<SurveyQuestion> = raw
        .iter()
        .filter_map(|value| {
            let question = value.get("question")?.as_str()?.trim();
            let options = value.get("options")?.as_array()?;
            if question.is_empty() || options.len() != OPTIONS_PER_QUESTION {
                return None;
            }

            let options: Vec<String> = options
                .iter()
                .map(|o| o.as_str().map(str::trim).filter(|o| !o.is_empty()).map(str::to_string))
                .collect::<Option<_>>()?;
            let options: [String; OPTIONS_PER_QUESTION] = options.try_into().ok()?;

            Some((question.to_string(), options))
        })
        .take(count)
        .enumerate()
        .map(|(id, (question, options))| SurveyQuestion {
            id,
            question,
            options,
        })
        .collect();

    if questions.is_empty() {
        None
    } else {
        Some(questions)
    }
}

/// Asks the provider for questions about `survey`. Any failure yields the
/// generic fallback set; the boolean reports whether that happened.
pub async fn generate_questions(
    provider: &dyn TextProvider,
    survey: &SurveyOption,
    count: usize,
    timeout: Duration,
) -> (Vec<SurveyQuestion>, bool) {
    let prompt = format!(
        "Create {count} multiple-choice market research questions for a survey titled \
         \"{}\" in the {} category ({}). Respond with a JSON array only. Each item must be \
         an object {{\"question\": string, \"options\": [four short strings]}}.",
        survey.title, survey.category, survey.description
    );

    match generate_with_timeout(provider, &prompt, timeout).await {
        Ok(text) => match parse_questions(&text, count) {
            Some(questions) => (questions, false),
            None => {
                log::warn!("Unusable questions for {}, using fallback set.", survey.id);
                (fallback_questions(), true)
            }
        },
        Err(e) => {
            log::warn!("Question generation for {} failed: {}", survey.id, e);
            (fallback_questions(), true)
        }
    }
}

/// One survey attempt moving through generating, active, paused,
/// submitting and completed.
#[derive(Clone, Debug)]
pub struct SurveyAttempt {
    pub attempt_id: Uuid,
    pub username: String,
    pub survey: &'static SurveyOption,
    questions: Vec<SurveyQuestion>,
    answers: Vec<Option<usize>>,
    current: usize,
    phase: SurveyPhase,
    seconds_left: u32,
    question_seconds: u32,
    used_fallback: bool,
    reward: Option<u64>,
}

impl SurveyAttempt {
    pub fn generating(username: String, survey: &'static SurveyOption, question_seconds: u32) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            username,
            survey,
            questions: Vec::new(),
            answers: Vec::new(),
            current: 0,
            phase: SurveyPhase::Generating,
            seconds_left: question_seconds,
            question_seconds,
            used_fallback: false,
            reward: None,
        }
    }

    pub fn phase(&self) -> SurveyPhase {
        self.phase
    }

    fn expect_phase(&self, phase: SurveyPhase) -> Result<(), ServiceError> {
        if self.phase != phase {
            return Err(ServiceError::InvalidState(format!(
                "survey is {:?}, expected {:?}",
                self.phase, phase
            )));
        }
        Ok(())
    }

    pub fn begin(&mut self, questions: Vec<SurveyQuestion>, used_fallback: bool) {
        self.answers = vec![None; questions.len()];
        self.questions = questions;
        self.used_fallback = used_fallback;
        self.current = 0;
        self.seconds_left = self.question_seconds;
        self.phase = SurveyPhase::Active;
    }

    pub fn select(&mut self, option: usize) -> Result<(), ServiceError> {
        self.expect_phase(SurveyPhase::Active)?;
        if option >= OPTIONS_PER_QUESTION {
            return Err(ServiceError::Validation(format!(
                "option must be between 0 and {}",
                OPTIONS_PER_QUESTION - 1
            )));
        }

        self.answers[self.current] = Some(option);
        Ok(())
    }

    pub fn next(&mut self) -> Result<(), ServiceError> {
        self.expect_phase(SurveyPhase::Active)?;
        if self.answers[self.current].is_none() {
            return Err(ServiceError::Validation("select an option first".to_string()));
        }
        if self.current + 1 >= self.questions.len() {
            return Err(ServiceError::InvalidState(
                "already on the last question, submit instead".to_string(),
            ));
        }

        self.current += 1;
        self.seconds_left = self.question_seconds;
        Ok(())
    }

    pub fn previous(&mut self) -> Result<(), ServiceError> {
        self.expect_phase(SurveyPhase::Active)?;
        if self.current == 0 {
            return Err(ServiceError::InvalidState("already on the first question".to_string()));
        }

        self.current -= 1;
        self.seconds_left = self.question_seconds;
        Ok(())
    }

    /// Counts one time unit down. Returns true when the question just
    /// expired and the survey paused.
    pub fn tick(&mut self) -> bool {
        if self.phase != SurveyPhase::Active {
            return false;
        }

        self.seconds_left = self.seconds_left.saturating_sub(1);
        if self.seconds_left == 0 {
            self.phase = SurveyPhase::Paused;
            return true;
        }
        false
    }

    /// Restarts the full countdown on the same question.
    pub fn resume(&mut self) -> Result<(), ServiceError> {
        self.expect_phase(SurveyPhase::Paused)?;
        self.seconds_left = self.question_seconds;
        self.phase = SurveyPhase::Active;
        Ok(())
    }

    pub fn begin_submit(&mut self) -> Result<(), ServiceError> {
        self.expect_phase(SurveyPhase::Active)?;
        if self.current + 1 != self.questions.len() {
            return Err(ServiceError::InvalidState(
                "answer every question before submitting".to_string(),
            ));
        }
        if self.answers.iter().any(Option::is_none) {
            return Err(ServiceError::Validation("select an option first".to_string()));
        }

        self.phase = SurveyPhase::Submitting;
        Ok(())
    }

    fn abort_submit(&mut self) {
        if self.phase == SurveyPhase::Submitting {
            self.phase = SurveyPhase::Active;
        }
    }

    pub fn complete(&mut self, reward: u64) {
        self.reward = Some(reward);
        self.phase = SurveyPhase::Completed;
    }

    pub fn status(&self) -> SurveyStatus {
        SurveyStatus {
            attempt_id: self.attempt_id,
            survey_id: self.survey.id.to_string(),
            phase: self.phase,
            current: self.current,
            total: self.questions.len(),
            question: self.questions.get(self.current).cloned(),
            selected: self.answers.get(self.current).copied().flatten(),
            seconds_left: self.seconds_left,
            used_fallback: self.used_fallback,
            reward: self.reward,
        }
    }
}

struct ActiveSurvey {
    attempt: SurveyAttempt,
    ticker: Option<AbortHandle>,
}

impl ActiveSurvey {
    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for ActiveSurvey {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyResult {
    pub status: SurveyStatus,
    pub outcome: RewardOutcome,
    pub stats: Stats,
}

pub enum SurveyRequest {
    ListSurveys {
        response: Responder<Vec<SurveyOption>>,
    },
    Start {
        survey_id: String,
        response: Responder<SurveyStatus>,
    },
    Status {
        response: Responder<SurveyStatus>,
    },
    Select {
        option: usize,
        response: Responder<SurveyStatus>,
    },
    Next {
        response: Responder<SurveyStatus>,
    },
    Previous {
        response: Responder<SurveyStatus>,
    },
    Resume {
        response: Responder<SurveyStatus>,
    },
    Submit {
        response: Responder<Saved<SurveyResult>>,
    },
    Cancel {
        response: Responder<()>,
    },
}

#[derive(Clone)]
pub struct SurveyRequestHandler {
    engine: EarningsEngine,
    provider: Arc<dyn TextProvider>,
    timing: SurveyTiming,
    active: Arc<Mutex<Option<ActiveSurvey>>>,
}

impl SurveyRequestHandler {
    pub fn new(engine: EarningsEngine, provider: Arc<dyn TextProvider>, timing: SurveyTiming) -> Self {
        Self {
            engine,
            provider,
            timing,
            active: Arc::new(Mutex::new(None)),
        }
    }

    async fn session_username(&self) -> Result<String, ServiceError> {
        self.engine
            .sessions()
            .current_username()
            .await
            .ok_or(ServiceError::NoSession)
    }

    /// Runs `f` on the attempt owned by the session user. An attempt left
    /// behind by another user is discarded.
    async fn with_attempt<T>(
        &self,
        f: impl FnOnce(&mut SurveyAttempt) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let username = self.session_username().await?;
        let mut active = self.active.lock().await;

        let owned = active
            .as_ref()
            .is_some_and(|survey| survey.attempt.username == username);
        if !owned {
            *active = None;
            return Err(ServiceError::InvalidState("no survey in progress".to_string()));
        }

        match active.as_mut() {
            Some(survey) => f(&mut survey.attempt),
            None => Err(ServiceError::InvalidState("no survey in progress".to_string())),
        }
    }

    pub async fn start(&self, survey_id: &str, today: NaiveDate) -> Result<SurveyStatus, ServiceError> {
        let survey = find_survey(survey_id)
            .ok_or_else(|| ServiceError::NotFound(format!("no survey {}", survey_id)))?;
        let username = self.session_username().await?;

        let attempt = SurveyAttempt::generating(username.clone(), survey, self.timing.question_seconds);
        let attempt_id = attempt.attempt_id;
        {
            let mut active = self.active.lock().await;
            if let Some(current) = active.as_ref() {
                let finished = current.attempt.phase() == SurveyPhase::Completed;
                if current.attempt.username == username && !finished {
                    return Err(ServiceError::InvalidState(
                        "a survey is already in progress".to_string(),
                    ));
                }
            }
            *active = Some(ActiveSurvey {
                attempt,
                ticker: None,
            });
        }

        if let Err(e) = self.engine.start_survey(today).await {
            let mut active = self.active.lock().await;
            if active.as_ref().is_some_and(|s| s.attempt.attempt_id == attempt_id) {
                *active = None;
            }
            return Err(e);
        }

        log::info!("{} started survey {}", username, survey.id);
        let (questions, used_fallback) = generate_questions(
            self.provider.as_ref(),
            survey,
            self.timing.question_count,
            self.timing.questions_timeout,
        )
        .await;

        let mut active = self.active.lock().await;
        match active.as_mut() {
            Some(current) if current.attempt.attempt_id == attempt_id => {
                current.attempt.begin(questions, used_fallback);
                current.ticker = Some(self.spawn_ticker(attempt_id));
                Ok(current.attempt.status())
            }
            _ => Err(ServiceError::InvalidState("survey was cancelled".to_string())),
        }
    }

    fn spawn_ticker(&self, attempt_id: Uuid) -> AbortHandle {
        let active = self.active.clone();
        let period = self.timing.tick;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;

                let mut active = active.lock().await;
                match active.as_mut() {
                    Some(current) if current.attempt.attempt_id == attempt_id => {
                        if current.attempt.tick() {
                            log::info!(
                                "Question {} of survey {} timed out, pausing.",
                                current.attempt.status().current + 1,
                                current.attempt.survey.id
                            );
                        }
                    }
                    _ => break,
                }
            }
        });

        handle.abort_handle()
    }

    pub async fn status(&self) -> Result<SurveyStatus, ServiceError> {
        self.with_attempt(|attempt| Ok(attempt.status())).await
    }

    pub async fn select(&self, option: usize) -> Result<SurveyStatus, ServiceError> {
        self.with_attempt(|attempt| {
            attempt.select(option)?;
            Ok(attempt.status())
        })
        .await
    }

    pub async fn next(&self) -> Result<SurveyStatus, ServiceError> {
        self.with_attempt(|attempt| {
            attempt.next()?;
            Ok(attempt.status())
        })
        .await
    }

    pub async fn previous(&self) -> Result<SurveyStatus, ServiceError> {
        self.with_attempt(|attempt| {
            attempt.previous()?;
            Ok(attempt.status())
        })
        .await
    }

    pub async fn resume(&self) -> Result<SurveyStatus, ServiceError> {
        self.with_attempt(|attempt| {
            attempt.resume()?;
            Ok(attempt.status())
        })
        .await
    }

    /// Waits out the simulated network delay, then credits the reward to the
    /// user who took the survey. A cancel during the delay wins and nothing
    /// is awarded; so does a change of session user.
    pub async fn submit(&self, today: NaiveDate) -> Result<Saved<SurveyResult>, ServiceError> {
        let attempt_id = self
            .with_attempt(|attempt| {
                attempt.begin_submit()?;
                Ok(attempt.attempt_id)
            })
            .await?;

        tokio::time::sleep(self.timing.submit_delay).await;

        let mut active = self.active.lock().await;
        let owner = match active.as_ref() {
            Some(current) if current.attempt.attempt_id == attempt_id => {
                current.attempt.username.clone()
            }
            _ => return Err(ServiceError::InvalidState("survey was cancelled".to_string())),
        };

        let session = self.engine.sessions().current_username().await;
        if session.as_deref() != Some(owner.as_str()) {
            log::warn!("Session changed while {} was submitting, dropping the survey.", owner);
            *active = None;
            return Err(ServiceError::InvalidState(
                "the session changed before the survey was submitted".to_string(),
            ));
        }

        let Some(current) = active.as_mut() else {
            return Err(ServiceError::InvalidState("survey was cancelled".to_string()));
        };

        let saved = match self
            .engine
            .process_reward(&owner, Some(current.attempt.survey), today)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                current.attempt.abort_submit();
                return Err(e);
            }
        };

        current.stop_ticker();
        current.attempt.complete(saved.value.1.reward);
        let status = current.attempt.status();

        Ok(saved.map(|(user, outcome)| SurveyResult {
            status,
            outcome,
            stats: user.stats,
        }))
    }

    /// Drops the session user's attempt and its answers. Nothing is awarded
    /// and the global slot stays consumed.
    pub async fn cancel(&self) -> Result<(), ServiceError> {
        let username = self.session_username().await?;
        let mut active = self.active.lock().await;

        let owned = active
            .as_ref()
            .is_some_and(|survey| survey.attempt.username == username);
        if !owned {
            return Err(ServiceError::InvalidState("no survey in progress".to_string()));
        }

        if let Some(survey) = active.take() {
            log::info!(
                "{} left survey {} in phase {:?}",
                username,
                survey.attempt.survey.id,
                survey.attempt.phase()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RequestHandler<SurveyRequest> for SurveyRequestHandler {
    async fn handle_request(&self, request: SurveyRequest) {
        match request {
            SurveyRequest::ListSurveys { response } => {
                let _ = response.send(Ok(CATALOG.to_vec()));
            }
            SurveyRequest::Start {
                survey_id,
                response,
            } => {
                let _ = response.send(self.start(&survey_id, today()).await);
            }
            SurveyRequest::Status { response } => {
                let _ = response.send(self.status().await);
            }
            SurveyRequest::Select { option, response } => {
                let _ = response.send(self.select(option).await);
            }
            SurveyRequest::Next { response } => {
                let _ = response.send(self.next().await);
            }
            SurveyRequest::Previous { response } => {
                let _ = response.send(self.previous().await);
            }
            SurveyRequest::Resume { response } => {
                let _ = response.send(self.resume().await);
            }
            SurveyRequest::Submit { response } => {
                let _ = response.send(self.submit(today()).await);
            }
            SurveyRequest::Cancel { response } => {
                let _ = response.send(self.cancel().await);
            }
        }
    }
}

pub struct SurveyService;

impl SurveyService {
    pub fn new() -> Self {
        SurveyService {}
    }
}

#[async_trait]
impl Service<SurveyRequest, SurveyRequestHandler> for SurveyService {}
