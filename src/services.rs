use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::repositories::{
    ai::TextProvider, counters::CounterRepository, payments::PaymentGateway,
    store::KeyValueStore, store::StoreError, users::UserRepository,
};
use crate::settings::Settings;

pub mod earnings;
pub mod http;
pub mod referrals;
pub mod surveys;
pub mod users;
pub mod verification;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Duplicate(String),
    #[error("Invalid credentials.")]
    InvalidCredential,
    #[error("No active session.")]
    NoSession,
    #[error("Blocked: {0}")]
    Blocked(earnings::BlockReason),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Storage full: {0}")]
    Capacity(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Communication error: {0} - {1}")]
    Communication(String, String),
}

impl ServiceError {
    pub fn repository(service: &str, error: StoreError) -> Self {
        match error {
            StoreError::Capacity { .. } => ServiceError::Capacity(error.to_string()),
            other => ServiceError::Repository(service.to_string(), other.to_string()),
        }
    }
}

/// A value together with a storage warning raised while persisting it. The
/// in-memory state is kept when the store rejects a write for lack of space.
#[derive(Debug, Clone)]
pub struct Saved<T> {
    pub value: T,
    pub warning: Option<String>,
}

impl<T> Saved<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Saved<U> {
        Saved {
            value: f(self.value),
            warning: self.warning,
        }
    }
}

pub type Responder<T> = oneshot::Sender<Result<T, ServiceError>>;

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Sends a request built around a fresh responder and waits for the reply.
pub async fn dispatch<R, T>(
    channel: &mpsc::Sender<R>,
    service: &str,
    build: impl FnOnce(Responder<T>) -> R,
) -> Result<T, ServiceError> {
    let (response_tx, response_rx) = oneshot::channel();

    channel
        .send(build(response_tx))
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?;

    response_rx
        .await
        .map_err(|e| ServiceError::Communication(service.to_string(), e.to_string()))?
}

#[derive(Clone)]
pub struct Channels {
    pub users: mpsc::Sender<users::UserRequest>,
    pub earnings: mpsc::Sender<earnings::EarningsRequest>,
    pub surveys: mpsc::Sender<surveys::SurveyRequest>,
}

pub async fn start_services(
    settings: &Settings,
    store: Arc<dyn KeyValueStore>,
    provider: Arc<dyn TextProvider>,
    payments: Arc<dyn PaymentGateway>,
) -> Result<Channels, anyhow::Error> {
    let (user_tx, mut user_rx) = mpsc::channel(512);
    let (earnings_tx, mut earnings_rx) = mpsc::channel(512);
    let (survey_tx, mut survey_rx) = mpsc::channel(512);

    let verifier = verification::Verifier::new(
        provider.clone(),
        Duration::from_millis(settings.ai.otp_timeout_ms),
        Duration::from_millis(settings.ai.message_timeout_ms),
    );
    let sessions = users::SessionManager::load(
        UserRepository::new(store.clone()),
        verifier,
        settings.earnings.referral_bonus,
    )
    .await?;
    let engine = earnings::EarningsEngine::new(
        sessions.clone(),
        CounterRepository::new(store),
        settings.earnings.global_daily_cap,
    );

    log::info!("Starting user service.");
    let mut user_service = users::UserService::new();
    let user_handler = users::UserRequestHandler::new(sessions);
    tokio::spawn(async move {
        user_service.run(user_handler, &mut user_rx).await;
    });

    log::info!("Starting earnings service.");
    let mut earnings_service = earnings::EarningsService::new();
    let earnings_handler = earnings::EarningsRequestHandler::new(engine.clone(), payments);
    tokio::spawn(async move {
        earnings_service
            .run(earnings_handler, &mut earnings_rx)
            .await;
    });

    log::info!("Starting survey service.");
    let mut survey_service = surveys::SurveyService::new();
    let survey_handler = surveys::SurveyRequestHandler::new(
        engine,
        provider,
        surveys::SurveyTiming {
            question_seconds: settings.survey.question_seconds,
            tick: Duration::from_millis(settings.survey.tick_ms),
            submit_delay: Duration::from_millis(settings.survey.submit_delay_ms),
            questions_timeout: Duration::from_millis(settings.ai.questions_timeout_ms),
            question_count: settings.ai.question_count(),
        },
    );
    tokio::spawn(async move {
        survey_service.run(survey_handler, &mut survey_rx).await;
    });

    log::info!("Started services.");
    Ok(Channels {
        users: user_tx,
        earnings: earnings_tx,
        surveys: survey_tx,
    })
}
