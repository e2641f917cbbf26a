use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::verification::{OtpDispatch, Purpose, PurposeKind, Verifier};
use super::{RequestHandler, Responder, Saved, Service, ServiceError};
use crate::models::users::{NewUser, Stats, UserPatch, UserRecord};
use crate::repositories::payments::is_valid_transaction_code;
use crate::repositories::store::StoreError;
use crate::repositories::users::UserRepository;

pub fn validate_username(username: &str) -> Result<(), ServiceError> {
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !(3..=30).contains(&username.len()) || !valid_chars {
        return Err(ServiceError::Validation(
            "username must be 3-30 letters, digits or underscores".to_string(),
        ));
    }

    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ServiceError> {
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if password.chars().count() < 8 || !has_letter || !has_digit {
        return Err(ServiceError::Validation(
            "password must be at least 8 characters with a letter and a digit".to_string(),
        ));
    }

    Ok(())
}

fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::Internal(format!("Could not hash password: {}", e)))
}

/// Checks a secret against the stored hash, or against a legacy plaintext
/// secret when no hash exists yet. Returns true when the record should be
/// re-saved with a fresh hash.
fn check_password(user: &UserRecord, password: &str) -> Result<bool, ServiceError> {
    if let Some(stored) = &user.password_hash {
        let parsed = PasswordHash::new(stored)
            .map_err(|e| ServiceError::Internal(format!("Corrupt password hash: {}", e)))?;
        return match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(false),
            Err(_) => Err(ServiceError::InvalidCredential),
        };
    }

    match &user.password {
        Some(legacy) if legacy == password => Ok(true),
        _ => Err(ServiceError::InvalidCredential),
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

struct SessionState {
    users: Vec<UserRecord>,
    unreadable: Vec<Value>,
    session: Option<usize>,
    pending_referral: Option<String>,
}

impl SessionState {
    fn position(&self, username: &str) -> Option<usize> {
        self.users.iter().position(|user| user.matches(username))
    }

    fn current_mut(&mut self) -> Result<&mut UserRecord, ServiceError> {
        let index = self.session.ok_or(ServiceError::NoSession)?;
        self.users.get_mut(index).ok_or(ServiceError::NoSession)
    }
}

/// Owns the registered users and the active session. All persisted user
/// state is written through here; the users collection and the session
/// copy are saved together after every mutation.
#[derive(Clone)]
pub struct SessionManager {
    repository: UserRepository,
    verifier: Verifier,
    referral_bonus: u64,
    state: Arc<Mutex<SessionState>>,
}

impl SessionManager {
    pub async fn load(
        repository: UserRepository,
        verifier: Verifier,
        referral_bonus: u64,
    ) -> Result<Self, ServiceError> {
        let collection = repository
            .load_users()
            .await
            .map_err(|e| ServiceError::repository("Users", e))?;
        let users = collection.users;
        let stored_session = repository
            .load_session()
            .await
            .map_err(|e| ServiceError::repository("Users", e))?;

        let session = stored_session.and_then(|stored| {
            let index = users.iter().position(|user| user.matches(&stored.username));
            if index.is_none() {
                log::warn!("Dropping session for unknown user {}", stored.username);
            }
            index
        });

        log::info!("Loaded {} registered users.", users.len());
        if !collection.unreadable.is_empty() {
            log::warn!(
                "{} stored user entries could not be read and are kept as is.",
                collection.unreadable.len()
            );
        }
        Ok(Self {
            repository,
            verifier,
            referral_bonus,
            state: Arc::new(Mutex::new(SessionState {
                users,
                unreadable: collection.unreadable,
                session,
                pending_referral: None,
            })),
        })
    }

    /// Saves both the collection and the session copy. Running out of space
    /// is reported as a warning; the in-memory state stays authoritative.
    async fn persist(&self, state: &SessionState) -> Result<Option<String>, ServiceError> {
        let result = self.write(state).await;

        match result {
            Ok(()) => Ok(None),
            Err(e @ StoreError::Capacity { .. }) => {
                log::warn!("Storage quota exceeded, changes may be lost: {}", e);
                Ok(Some(format!("Storage is full, recent changes may be lost: {}", e)))
            }
            Err(e) => Err(ServiceError::repository("Users", e)),
        }
    }

    async fn write(&self, state: &SessionState) -> Result<(), StoreError> {
        self.repository
            .save_users(&state.users, &state.unreadable)
            .await?;

        match state.session.and_then(|index| state.users.get(index)) {
            Some(user) => self.repository.save_session(user).await,
            None => self.repository.clear_session().await,
        }
    }

    pub async fn capture_referral(&self, code: &str) {
        let code = code.trim();
        if code.is_empty() {
            return;
        }

        log::info!("Captured referral code {}", code);
        self.state.lock().await.pending_referral = Some(code.to_string());
    }

    pub async fn request_registration_code(&self, username: &str) -> Result<OtpDispatch, ServiceError> {
        validate_username(username)?;
        if self.state.lock().await.position(username).is_some() {
            return Err(ServiceError::Duplicate(format!(
                "an account named {} already exists, log in instead",
                username
            )));
        }

        Ok(self
            .verifier
            .issue(Purpose {
                kind: PurposeKind::Registration,
                username: username.to_string(),
            })
            .await)
    }

    /// Registers after checking the registration code issued for the same
    /// username.
    pub async fn register_verified(
        &self,
        candidate: NewUser,
        code: &str,
        today: NaiveDate,
    ) -> Result<Saved<UserRecord>, ServiceError> {
        self.check_candidate(&candidate).await?;

        match self.verifier.pending_username(PurposeKind::Registration).await {
            Some(username) if username.eq_ignore_ascii_case(&candidate.username) => {}
            _ => {
                return Err(ServiceError::InvalidState(
                    "request a registration code for this username first".to_string(),
                ))
            }
        }
        self.verifier.verify(PurposeKind::Registration, code).await?;

        self.register(candidate, today).await
    }

    async fn check_candidate(&self, candidate: &NewUser) -> Result<(), ServiceError> {
        validate_username(&candidate.username)?;
        validate_password(&candidate.password)?;
        if let Some(code) = &candidate.payment_code {
            if !is_valid_transaction_code(code) {
                return Err(ServiceError::Validation(
                    "payment code must be exactly 10 letters or digits".to_string(),
                ));
            }
        }

        if self.state.lock().await.position(&candidate.username).is_some() {
            return Err(ServiceError::Duplicate(format!(
                "an account named {} already exists, log in instead",
                candidate.username
            )));
        }

        Ok(())
    }

    /// Creates the account with default stats and makes it the session. A
    /// captured referral code naming another existing user credits that
    /// user with the referral bonus.
    pub async fn register(
        &self,
        candidate: NewUser,
        today: NaiveDate,
    ) -> Result<Saved<UserRecord>, ServiceError> {
        self.check_candidate(&candidate).await?;
        let password_hash = hash_password(&candidate.password)?;

        let mut state = self.state.lock().await;
        if state.position(&candidate.username).is_some() {
            return Err(ServiceError::Duplicate(format!(
                "an account named {} already exists, log in instead",
                candidate.username
            )));
        }

        let referral = state.pending_referral.take();
        let referrer = referral
            .as_deref()
            .filter(|code| !code.eq_ignore_ascii_case(&candidate.username))
            .and_then(|code| state.position(code));

        let mut user = UserRecord {
            username: candidate.username,
            password_hash: Some(password_hash),
            payment_code: candidate.payment_code,
            profile: candidate.profile.unwrap_or_default(),
            stats: Stats {
                last_activity_date: Some(today),
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(index) = referrer {
            let bonus = self.referral_bonus;
            let referrer = &mut state.users[index];
            referrer.stats.earnings += bonus;
            referrer.push_history(
                now_millis(),
                today.to_string(),
                bonus,
                format!("Referral bonus: {}", user.username),
            );
            user.referred_by = Some(referrer.username.clone());
            log::info!("Credited {} with a referral bonus of {}", referrer.username, bonus);
        } else if let Some(code) = referral {
            log::info!("Ignoring referral code {} with no matching user", code);
        }

        state.users.push(user.clone());
        state.session = Some(state.users.len() - 1);
        let warning = self.persist(&state).await?;

        log::info!("Registered user {}", user.username);
        Ok(Saved {
            value: user,
            warning,
        })
    }

    /// First login step: checks the credentials and sends a login code. The
    /// session is only established by `complete_login`.
    pub async fn request_login(&self, username: &str, password: &str) -> Result<Saved<OtpDispatch>, ServiceError> {
        let mut state = self.state.lock().await;
        let index = state
            .position(username)
            .ok_or_else(|| ServiceError::NotFound(format!("no account named {}", username)))?;

        let needs_rehash = check_password(&state.users[index], password)?;
        let mut warning = None;
        if needs_rehash {
            let user = &mut state.users[index];
            user.password_hash = Some(hash_password(password)?);
            user.password = None;
            log::info!("Migrated legacy credentials for {}", user.username);
            warning = self.persist(&state).await?;
        }

        let canonical = state.users[index].username.clone();
        drop(state);

        let dispatch = self
            .verifier
            .issue(Purpose {
                kind: PurposeKind::Login,
                username: canonical,
            })
            .await;

        Ok(Saved {
            value: dispatch,
            warning,
        })
    }

    pub async fn complete_login(&self, code: &str, today: NaiveDate) -> Result<Saved<UserRecord>, ServiceError> {
        let username = self.verifier.verify(PurposeKind::Login, code).await?;

        let mut state = self.state.lock().await;
        let index = state
            .position(&username)
            .ok_or_else(|| ServiceError::NotFound(format!("no account named {}", username)))?;
        state.session = Some(index);
        state.users[index].stats.roll_over(today);
        let warning = self.persist(&state).await?;

        log::info!("User {} logged in.", username);
        Ok(Saved {
            value: state.users[index].clone(),
            warning,
        })
    }

    pub async fn request_password_reset(&self, username: &str) -> Result<OtpDispatch, ServiceError> {
        let canonical = {
            let state = self.state.lock().await;
            let index = state
                .position(username)
                .ok_or_else(|| ServiceError::NotFound(format!("no account named {}", username)))?;
            state.users[index].username.clone()
        };

        Ok(self
            .verifier
            .issue(Purpose {
                kind: PurposeKind::PasswordReset,
                username: canonical,
            })
            .await)
    }

    /// Completes a reset started with `request_password_reset`.
    pub async fn reset_password_verified(
        &self,
        code: &str,
        new_password: &str,
    ) -> Result<Saved<()>, ServiceError> {
        validate_password(new_password)?;
        let username = self.verifier.verify(PurposeKind::PasswordReset, code).await?;
        self.reset_password(&username, new_password).await
    }

    /// Overwrites the stored secret for `username`.
    pub async fn reset_password(&self, username: &str, new_password: &str) -> Result<Saved<()>, ServiceError> {
        validate_password(new_password)?;
        let password_hash = hash_password(new_password)?;

        let mut state = self.state.lock().await;
        let index = state
            .position(username)
            .ok_or_else(|| ServiceError::NotFound(format!("no account named {}", username)))?;
        let user = &mut state.users[index];
        user.password_hash = Some(password_hash);
        user.password = None;
        let warning = self.persist(&state).await?;

        log::info!("Password reset for {}", username);
        Ok(Saved { value: (), warning })
    }

    /// Current session user, after applying the daily rollover.
    pub async fn current(&self, today: NaiveDate) -> Result<Saved<UserRecord>, ServiceError> {
        self.modify_current(|_| Ok(((), UserPatch::default())), today)
            .await
            .map(|saved| saved.map(|(user, _)| user))
    }

    pub async fn current_username(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .session
            .and_then(|index| state.users.get(index))
            .map(|user| user.username.clone())
    }

    /// Shallow-merges `patch` into the session user and the registered copy.
    pub async fn update_user(&self, patch: UserPatch, today: NaiveDate) -> Result<Saved<UserRecord>, ServiceError> {
        if let Some(code) = &patch.payment_code {
            if !is_valid_transaction_code(code) {
                return Err(ServiceError::Validation(
                    "payment code must be exactly 10 letters or digits".to_string(),
                ));
            }
        }

        self.modify_current(|_| Ok(((), patch)), today)
            .await
            .map(|saved| saved.map(|(user, _)| user))
    }

    /// Runs `f` against the session user (daily counters already rolled
    /// over), merges the patch it returns and persists once.
    pub async fn modify_current<T, F>(
        &self,
        f: F,
        today: NaiveDate,
    ) -> Result<Saved<(UserRecord, T)>, ServiceError>
    where
        F: FnOnce(&UserRecord) -> Result<(T, UserPatch), ServiceError>,
    {
        self.modify_session(None, f, today).await
    }

    /// Like `modify_current`, but fails with `InvalidState` unless `owner`
    /// still holds the session.
    pub async fn modify_session_user<T, F>(
        &self,
        owner: &str,
        f: F,
        today: NaiveDate,
    ) -> Result<Saved<(UserRecord, T)>, ServiceError>
    where
        F: FnOnce(&UserRecord) -> Result<(T, UserPatch), ServiceError>,
    {
        self.modify_session(Some(owner), f, today).await
    }

    async fn modify_session<T, F>(
        &self,
        owner: Option<&str>,
        f: F,
        today: NaiveDate,
    ) -> Result<Saved<(UserRecord, T)>, ServiceError>
    where
        F: FnOnce(&UserRecord) -> Result<(T, UserPatch), ServiceError>,
    {
        let mut state = self.state.lock().await;
        let user = state.current_mut()?;
        if let Some(owner) = owner {
            if !user.matches(owner) {
                return Err(ServiceError::InvalidState(format!(
                    "{} no longer holds the session",
                    owner
                )));
            }
        }
        let rolled = user.stats.roll_over(today);

        let (value, patch) = match f(user) {
            Ok(result) => result,
            Err(e) => {
                if rolled {
                    self.persist(&state).await?;
                }
                return Err(e);
            }
        };
        let changed = rolled || !patch.is_empty();
        patch.apply(user);
        let user = user.clone();

        let warning = if changed {
            self.persist(&state).await?
        } else {
            None
        };

        Ok(Saved {
            value: (user, value),
            warning,
        })
    }

    pub async fn logout(&self) -> Result<Saved<()>, ServiceError> {
        let mut state = self.state.lock().await;
        let Some(index) = state.session.take() else {
            return Ok(Saved {
                value: (),
                warning: None,
            });
        };
        let warning = self.persist(&state).await?;

        log::info!("User {} logged out.", state.users[index].username);
        Ok(Saved { value: (), warning })
    }

    /// Ends the session. The stored account is kept: there is no deletion
    /// backend.
    pub async fn delete_account(&self) -> Result<Saved<()>, ServiceError> {
        let username = self.current_username().await.ok_or(ServiceError::NoSession)?;
        log::warn!("Account deletion requested by {}, record kept.", username);
        self.logout().await
    }

    pub async fn onboarding_completed(&self) -> Result<bool, ServiceError> {
        self.repository
            .onboarding_completed()
            .await
            .map_err(|e| ServiceError::repository("Users", e))
    }

    pub async fn complete_onboarding(&self) -> Result<Saved<()>, ServiceError> {
        match self.repository.set_onboarding_completed().await {
            Ok(()) => Ok(Saved { value: (), warning: None }),
            Err(e @ StoreError::Capacity { .. }) => Ok(Saved {
                value: (),
                warning: Some(e.to_string()),
            }),
            Err(e) => Err(ServiceError::repository("Users", e)),
        }
    }

    pub async fn find(&self, username: &str) -> Option<UserRecord> {
        let state = self.state.lock().await;
        state.position(username).map(|index| state.users[index].clone())
    }
}

pub enum UserRequest {
    CaptureReferral {
        code: String,
        response: Responder<()>,
    },
    RequestRegistrationCode {
        username: String,
        response: Responder<OtpDispatch>,
    },
    Register {
        candidate: NewUser,
        code: String,
        response: Responder<Saved<UserRecord>>,
    },
    RequestLogin {
        username: String,
        password: String,
        response: Responder<Saved<OtpDispatch>>,
    },
    CompleteLogin {
        code: String,
        response: Responder<Saved<UserRecord>>,
    },
    RequestPasswordReset {
        username: String,
        response: Responder<OtpDispatch>,
    },
    ResetPassword {
        code: String,
        new_password: String,
        response: Responder<Saved<()>>,
    },
    GetCurrent {
        response: Responder<Saved<UserRecord>>,
    },
    UpdateUser {
        patch: UserPatch,
        response: Responder<Saved<UserRecord>>,
    },
    Logout {
        response: Responder<Saved<()>>,
    },
    DeleteAccount {
        response: Responder<Saved<()>>,
    },
    GetOnboarding {
        response: Responder<bool>,
    },
    CompleteOnboarding {
        response: Responder<Saved<()>>,
    },
}

#[derive(Clone)]
pub struct UserRequestHandler {
    sessions: SessionManager,
}

impl UserRequestHandler {
    pub fn new(sessions: SessionManager) -> Self {
        UserRequestHandler { sessions }
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        let sessions = &self.sessions;

        match request {
            UserRequest::CaptureReferral { code, response } => {
                sessions.capture_referral(&code).await;
                let _ = response.send(Ok(()));
            }
            UserRequest::RequestRegistrationCode { username, response } => {
                let _ = response.send(sessions.request_registration_code(&username).await);
            }
            UserRequest::Register {
                candidate,
                code,
                response,
            } => {
                let result = sessions.register_verified(candidate, &code, today()).await;
                let _ = response.send(result);
            }
            UserRequest::RequestLogin {
                username,
                password,
                response,
            } => {
                let _ = response.send(sessions.request_login(&username, &password).await);
            }
            UserRequest::CompleteLogin { code, response } => {
                let _ = response.send(sessions.complete_login(&code, today()).await);
            }
            UserRequest::RequestPasswordReset { username, response } => {
                let _ = response.send(sessions.request_password_reset(&username).await);
            }
            UserRequest::ResetPassword {
                code,
                new_password,
                response,
            } => {
                let result = sessions.reset_password_verified(&code, &new_password).await;
                let _ = response.send(result);
            }
            UserRequest::GetCurrent { response } => {
                let _ = response.send(sessions.current(today()).await);
            }
            UserRequest::UpdateUser { patch, response } => {
                let _ = response.send(sessions.update_user(patch, today()).await);
            }
            UserRequest::Logout { response } => {
                let _ = response.send(sessions.logout().await);
            }
            UserRequest::DeleteAccount { response } => {
                let _ = response.send(sessions.delete_account().await);
            }
            UserRequest::GetOnboarding { response } => {
                let _ = response.send(sessions.onboarding_completed().await);
            }
            UserRequest::CompleteOnboarding { response } => {
                let _ = response.send(sessions.complete_onboarding().await);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::ai::OfflineProvider;
    use crate::repositories::store::{KeyValueStore, MemoryStore, CURRENT_SESSION, REGISTERED_USERS};
    use crate::services::verification::tests::extract_code;
    use std::time::Duration;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 15).unwrap()
    }

    fn candidate(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: "secret123".to_string(),
            payment_code: None,
            profile: None,
        }
    }

    async fn manager(store: Arc<dyn KeyValueStore>) -> SessionManager {
        let verifier = Verifier::new(
            Arc::new(OfflineProvider),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        SessionManager::load(UserRepository::new(store), verifier, 50)
            .await
            .unwrap()
    }

    #[test]
    fn username_and_password_policies() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("alice_99").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(31)).is_err());

        assert!(validate_password("secret123").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("12345678").is_err());
    }

    #[tokio::test]
    async fn register_writes_collection_and_session() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = manager(store.clone()).await;

        let user = sessions.register(candidate("alice"), day()).await.unwrap().value;
        assert_eq!(user.stats.last_activity_date, Some(day()));
        assert!(user.password.is_none());
        assert_ne!(user.password_hash.as_deref(), Some("secret123"));

        let users: Vec<UserRecord> =
            serde_json::from_str(&store.get(REGISTERED_USERS).await.unwrap().unwrap()).unwrap();
        let session: UserRecord =
            serde_json::from_str(&store.get(CURRENT_SESSION).await.unwrap().unwrap()).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(session.username, "alice");

        let reloaded = manager(store).await;
        assert_eq!(reloaded.current_username().await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn duplicate_registration_leaves_store_untouched() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = manager(store.clone()).await;
        sessions.register(candidate("alice"), day()).await.unwrap();
        let before = store.get(REGISTERED_USERS).await.unwrap();

        let result = sessions.register(candidate("ALICE"), day()).await;
        assert!(matches!(result, Err(ServiceError::Duplicate(_))));
        assert!(matches!(
            sessions.request_registration_code("Alice").await,
            Err(ServiceError::Duplicate(_))
        ));
        assert_eq!(store.get(REGISTERED_USERS).await.unwrap(), before);
    }

    #[tokio::test]
    async fn referral_credits_referrer_once() {
        let sessions = manager(Arc::new(MemoryStore::new())).await;
        sessions.register(candidate("alice"), day()).await.unwrap();
        sessions.logout().await.unwrap();

        sessions.capture_referral("alice").await;
        let bob = sessions.register(candidate("bob"), day()).await.unwrap().value;
        assert_eq!(bob.referred_by.as_deref(), Some("alice"));
        assert_eq!(bob.stats.earnings, 0);

        let alice = sessions.find("alice").await.unwrap();
        assert_eq!(alice.stats.earnings, 50);
        assert_eq!(alice.stats.daily_earnings, 0);
        assert_eq!(alice.history.len(), 1);
        assert_eq!(alice.history[0].label, "Referral bonus: bob");

        sessions.logout().await.unwrap();
        let carol = sessions.register(candidate("carol"), day()).await.unwrap().value;
        assert!(carol.referred_by.is_none());
        assert_eq!(sessions.find("alice").await.unwrap().stats.earnings, 50);
    }

    #[tokio::test]
    async fn unknown_or_self_referral_is_ignored() {
        let sessions = manager(Arc::new(MemoryStore::new())).await;

        sessions.capture_referral("ghost").await;
        let dave = sessions.register(candidate("dave"), day()).await.unwrap().value;
        assert!(dave.referred_by.is_none());

        sessions.logout().await.unwrap();
        sessions.capture_referral("erin").await;
        let erin = sessions.register(candidate("erin"), day()).await.unwrap().value;
        assert!(erin.referred_by.is_none());
        assert_eq!(erin.stats.earnings, 0);
    }

    #[tokio::test]
    async fn login_requires_matching_code() {
        let sessions = manager(Arc::new(MemoryStore::new())).await;
        sessions.register(candidate("alice"), day()).await.unwrap();
        sessions.logout().await.unwrap();

        assert!(matches!(
            sessions.request_login("alice", "wrongpass1").await,
            Err(ServiceError::InvalidCredential)
        ));
        assert!(matches!(
            sessions.request_login("nobody", "secret123").await,
            Err(ServiceError::NotFound(_))
        ));

        let first = sessions.request_login("Alice", "secret123").await.unwrap().value;
        let second = sessions.request_login("alice", "secret123").await.unwrap().value;
        let stale = extract_code(&first.message);
        let fresh = extract_code(&second.message);

        if stale != fresh {
            assert!(sessions.complete_login(&stale, day()).await.is_err());
        }
        assert!(sessions.current_username().await.is_none());

        let user = sessions.complete_login(&fresh, day()).await.unwrap().value;
        assert_eq!(user.username, "alice");
        assert_eq!(sessions.current_username().await.as_deref(), Some("alice"));
        assert!(sessions.complete_login(&fresh, day()).await.is_err());
    }

    #[tokio::test]
    async fn legacy_plaintext_is_migrated_on_login() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store
            .set(
                REGISTERED_USERS,
                r#"[{"username":"legacy","password":"oldpass12","stats":{"earnings":75}}]"#,
            )
            .await
            .unwrap();
        let sessions = manager(store.clone()).await;

        sessions.request_login("legacy", "oldpass12").await.unwrap();

        let user = sessions.find("legacy").await.unwrap();
        assert!(user.password.is_none());
        assert!(user.password_hash.is_some());
        assert_eq!(user.stats.earnings, 75);

        let raw = store.get(REGISTERED_USERS).await.unwrap().unwrap();
        assert!(!raw.contains("oldpass12"));
        assert!(sessions.request_login("legacy", "oldpass12").await.is_ok());
    }

    #[tokio::test]
    async fn password_reset_through_code() {
        let sessions = manager(Arc::new(MemoryStore::new())).await;
        sessions.register(candidate("alice"), day()).await.unwrap();
        sessions.logout().await.unwrap();

        let otp = sessions.request_password_reset("alice").await.unwrap();
        let code = extract_code(&otp.message);
        assert!(matches!(
            sessions.reset_password_verified(&code, "weak").await,
            Err(ServiceError::Validation(_))
        ));
        sessions.reset_password_verified(&code, "newsecret9").await.unwrap();

        assert!(sessions.request_login("alice", "secret123").await.is_err());
        assert!(sessions.request_login("alice", "newsecret9").await.is_ok());
    }

    #[tokio::test]
    async fn update_merges_into_session_and_collection() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = manager(store.clone()).await;
        sessions.register(candidate("alice"), day()).await.unwrap();

        let bad = UserPatch {
            payment_code: Some("short".into()),
            ..Default::default()
        };
        assert!(matches!(
            sessions.update_user(bad, day()).await,
            Err(ServiceError::Validation(_))
        ));

        let patch = UserPatch {
            payment_code: Some("ABCDE12345".into()),
            ..Default::default()
        };
        let user = sessions.update_user(patch, day()).await.unwrap().value;
        assert_eq!(user.payment_code.as_deref(), Some("ABCDE12345"));

        let session: UserRecord =
            serde_json::from_str(&store.get(CURRENT_SESSION).await.unwrap().unwrap()).unwrap();
        assert_eq!(session.payment_code.as_deref(), Some("ABCDE12345"));
        assert_eq!(
            sessions.find("alice").await.unwrap().payment_code.as_deref(),
            Some("ABCDE12345")
        );
    }

    #[tokio::test]
    async fn capacity_failure_is_a_warning() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_quota(64));
        let sessions = manager(store.clone()).await;

        let saved = sessions.register(candidate("alice"), day()).await.unwrap();
        assert!(saved.warning.is_some());
        assert_eq!(sessions.current_username().await.as_deref(), Some("alice"));
        assert!(store.get(REGISTERED_USERS).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_account_ends_session_but_keeps_record() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = manager(store.clone()).await;
        sessions.register(candidate("alice"), day()).await.unwrap();

        sessions.delete_account().await.unwrap();
        assert!(sessions.current_username().await.is_none());
        assert!(sessions.find("alice").await.is_some());
        assert!(store.get(CURRENT_SESSION).await.unwrap().is_none());
        assert!(matches!(
            sessions.delete_account().await,
            Err(ServiceError::NoSession)
        ));
    }

    fn stored<T: serde::de::DeserializeOwned>(raw: Option<String>) -> T {
        serde_json::from_str(&raw.unwrap()).unwrap()
    }

    async fn seed_stale_session(store: &Arc<dyn KeyValueStore>) {
        let yesterday = day().pred_opt().unwrap();
        let user = format!(
            r#"{{"username":"alice","password":"oldpass12","stats":{{"earnings":300,"dailyCount":4,"dailyEarnings":150,"dailyLimit":1000,"lastActivityDate":"{}"}}}}"#,
            yesterday
        );
        store
            .set(REGISTERED_USERS, &format!("[{}]", user))
            .await
            .unwrap();
        store.set(CURRENT_SESSION, &user).await.unwrap();
    }

    #[tokio::test]
    async fn legacy_entries_survive_load_and_rewrite() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store
            .set(
                REGISTERED_USERS,
                r#"[
                    {"username":"alice","stats":{"earnings":12.5,"lastActivityDate":"Wed Oct 14 2026"}},
                    {"username":"carol","password":"oldpass12"},
                    {"username":42}
                ]"#,
            )
            .await
            .unwrap();
        let sessions = manager(store.clone()).await;

        let otp = sessions.request_login("carol", "oldpass12").await.unwrap().value;
        sessions
            .complete_login(&extract_code(&otp.message), day())
            .await
            .unwrap();
        sessions.logout().await.unwrap();
        sessions.register(candidate("dave"), day()).await.unwrap();

        let alice = sessions.find("alice").await.unwrap();
        assert_eq!(alice.stats.earnings, 13);
        assert_eq!(
            alice.stats.last_activity_date,
            NaiveDate::from_ymd_opt(2026, 10, 14)
        );

        let entries: Vec<Value> = stored(store.get(REGISTERED_USERS).await.unwrap());
        let names: Vec<Value> = entries.iter().map(|entry| entry["username"].clone()).collect();
        assert_eq!(
            names,
            vec![
                serde_json::json!("alice"),
                serde_json::json!("carol"),
                serde_json::json!("dave"),
                serde_json::json!(42)
            ]
        );

        let reloaded = manager(store).await;
        assert!(reloaded.find("carol").await.is_some());
        assert!(reloaded.request_login("carol", "oldpass12").await.is_ok());
    }

    #[tokio::test]
    async fn rollover_on_access_is_written_through() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        seed_stale_session(&store).await;
        let sessions = manager(store.clone()).await;

        let saved = sessions.current(day()).await.unwrap();
        assert!(saved.warning.is_none());
        for stats in [
            saved.value.stats,
            stored::<Vec<UserRecord>>(store.get(REGISTERED_USERS).await.unwrap())[0]
                .stats
                .clone(),
            stored::<UserRecord>(store.get(CURRENT_SESSION).await.unwrap()).stats,
        ] {
            assert_eq!(stats.daily_count, 0);
            assert_eq!(stats.daily_earnings, 0);
            assert_eq!(stats.daily_limit, 1000);
            assert_eq!(stats.earnings, 300);
            assert_eq!(stats.last_activity_date, Some(day()));
        }
    }

    #[tokio::test]
    async fn rollover_is_saved_even_when_the_change_fails() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        seed_stale_session(&store).await;
        let sessions = manager(store.clone()).await;

        let result = sessions
            .modify_current(
                |_| Err::<((), UserPatch), _>(ServiceError::Validation("rejected".into())),
                day(),
            )
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));

        let session: UserRecord = stored(store.get(CURRENT_SESSION).await.unwrap());
        assert_eq!(session.stats.daily_count, 0);
        assert_eq!(session.stats.last_activity_date, Some(day()));
    }

    #[tokio::test]
    async fn owner_checked_change_rejects_other_session_user() {
        let sessions = manager(Arc::new(MemoryStore::new())).await;
        sessions.register(candidate("alice"), day()).await.unwrap();
        sessions.logout().await.unwrap();
        sessions.register(candidate("bob"), day()).await.unwrap();

        let result = sessions
            .modify_session_user("alice", |_| Ok(((), UserPatch::default())), day())
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));

        let saved = sessions
            .modify_session_user("bob", |_| Ok(((), UserPatch::default())), day())
            .await
            .unwrap();
        assert_eq!(saved.value.0.username, "bob");
    }

    #[tokio::test]
    async fn onboarding_flag_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let sessions = manager(store.clone()).await;

        assert!(!sessions.onboarding_completed().await.unwrap());
        sessions.complete_onboarding().await.unwrap();
        assert!(manager(store).await.onboarding_completed().await.unwrap());
    }
}
