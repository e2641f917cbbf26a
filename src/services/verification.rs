use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::ServiceError;
use crate::repositories::ai::{generate_with_timeout, TextProvider};

pub const CODE_LENGTH: usize = 5;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PurposeKind {
    Login,
    Registration,
    PasswordReset,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Purpose {
    pub kind: PurposeKind,
    pub username: String,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CodeSource {
    /// Provider digits folded with a local draw.
    Mixed,
    Local,
}

/// Simulated push notification carrying the code.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpDispatch {
    pub purpose: PurposeKind,
    pub message: String,
    pub code_source: CodeSource,
}

struct Challenge {
    purpose: Purpose,
    digest: String,
}

fn digest(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_code(candidate: &str) -> bool {
    candidate.len() == CODE_LENGTH && candidate.bytes().all(|b| b.is_ascii_digit())
}

const CODE_SPACE: u32 = 90_000;
const CODE_FLOOR: u32 = 10_000;

pub fn local_code() -> String {
    rand::thread_rng().gen_range(CODE_FLOOR..CODE_FLOOR + CODE_SPACE).to_string()
}

/// Offsets a provider code by a local draw in `0..CODE_SPACE`. The result is
/// uniform over the five-digit codes whatever the provider returned.
fn mix_code(provider_code: &str, local: u32) -> String {
    let seed = provider_code.parse::<u32>().unwrap_or(0) % CODE_SPACE;
    ((seed + local) % CODE_SPACE + CODE_FLOOR).to_string()
}

pub fn fallback_message(code: &str) -> String {
    format!("Your verification code is {code}. Do not share it with anyone.")
}

/// Holds the single outstanding one-time passcode. Issuing a new code
/// replaces whatever was pending.
#[derive(Clone)]
pub struct Verifier {
    provider: Arc<dyn TextProvider>,
    code_timeout: Duration,
    message_timeout: Duration,
    pending: Arc<Mutex<Option<Challenge>>>,
}

impl Verifier {
    pub fn new(
        provider: Arc<dyn TextProvider>,
        code_timeout: Duration,
        message_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            code_timeout,
            message_timeout,
            pending: Arc::new(Mutex::new(None)),
        }
    }

    async fn generate_code(&self) -> (String, CodeSource) {
        let prompt = "Generate a random 5-digit numeric verification code. \
                      Respond with the five digits only.";

        match generate_with_timeout(self.provider.as_ref(), prompt, self.code_timeout).await {
            Ok(text) if is_code(text.trim()) => {
                let local = rand::thread_rng().gen_range(0..CODE_SPACE);
                (mix_code(text.trim(), local), CodeSource::Mixed)
            }
            Ok(_) => {
                log::warn!("Text provider returned a malformed code, using local code.");
                (local_code(), CodeSource::Local)
            }
            Err(e) => {
                log::warn!("Falling back to local code: {}", e);
                (local_code(), CodeSource::Local)
            }
        }
    }

    async fn generate_message(&self, code: &str) -> String {
        let prompt = format!(
            "Write a short, friendly SMS (under 160 characters) telling the user that \
             their verification code is {code}. Include the code exactly once."
        );

        match generate_with_timeout(self.provider.as_ref(), &prompt, self.message_timeout).await {
            Ok(text) if text.contains(code) => text.trim().to_string(),
            Ok(_) => fallback_message(code),
            Err(e) => {
                log::warn!("Falling back to canned notification: {}", e);
                fallback_message(code)
            }
        }
    }

    pub async fn issue(&self, purpose: Purpose) -> OtpDispatch {
        let (code, code_source) = self.generate_code().await;
        let message = self.generate_message(&code).await;
        let kind = purpose.kind;

        *self.pending.lock().await = Some(Challenge {
            purpose,
            digest: digest(&code),
        });

        log::info!("Issued {:?} verification code ({:?}).", kind, code_source);
        log::debug!("Notification: {}", message);

        OtpDispatch {
            purpose: kind,
            message,
            code_source,
        }
    }

    /// Checks `code` against the pending challenge for `kind`. A match
    /// consumes the challenge and returns the username it was issued for; a
    /// mismatch leaves it pending.
    pub async fn verify(&self, kind: PurposeKind, code: &str) -> Result<String, ServiceError> {
        let mut pending = self.pending.lock().await;

        let Some(challenge) = pending.as_ref() else {
            return Err(ServiceError::InvalidState(
                "no verification code was requested".to_string(),
            ));
        };
        if challenge.purpose.kind != kind {
            return Err(ServiceError::InvalidState(format!(
                "pending code was issued for {:?}",
                challenge.purpose.kind
            )));
        }
        if challenge.digest != digest(code) {
            return Err(ServiceError::Validation("incorrect verification code".to_string()));
        }

        let username = challenge.purpose.username.clone();
        *pending = None;
        Ok(username)
    }

    pub async fn pending_username(&self, kind: PurposeKind) -> Option<String> {
        self.pending
            .lock()
            .await
            .as_ref()
            .filter(|challenge| challenge.purpose.kind == kind)
            .map(|challenge| challenge.purpose.username.clone())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repositories::ai::{OfflineProvider, ProviderError};
    use async_trait::async_trait;

    /// Replies with canned text; every call pops the next reply.
    pub struct Scripted(pub std::sync::Mutex<Vec<String>>);

    impl Scripted {
        pub fn new(replies: &[&str]) -> Self {
            Self(std::sync::Mutex::new(
                replies.iter().rev().map(|r| r.to_string()).collect(),
            ))
        }
    }

    #[async_trait]
    impl TextProvider for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .ok_or(ProviderError::Unavailable)
        }
    }

    pub fn extract_code(message: &str) -> String {
        message
            .split(|c: char| !c.is_ascii_digit())
            .find(|part| part.len() == CODE_LENGTH)
            .unwrap()
            .to_string()
    }

    fn login(username: &str) -> Purpose {
        Purpose {
            kind: PurposeKind::Login,
            username: username.to_string(),
        }
    }

    fn verifier(provider: impl TextProvider) -> Verifier {
        Verifier::new(
            Arc::new(provider),
            Duration::from_millis(200),
            Duration::from_millis(200),
        )
    }

    /// Answers the code prompt with fixed digits and writes the message
    /// around whatever code it is asked to include.
    struct EchoCode;

    #[async_trait]
    impl TextProvider for EchoCode {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            if prompt.starts_with("Generate a random") {
                return Ok(" 24680\n".to_string());
            }
            let code = prompt
                .split(|c: char| !c.is_ascii_digit())
                .find(|part| part.len() == CODE_LENGTH)
                .ok_or(ProviderError::Unavailable)?;
            Ok(format!("Hi! Your code: {code}"))
        }
    }

    #[test]
    fn mixing_stays_in_five_digit_range() {
        assert_eq!(mix_code("24680", 0), "34680");
        assert_eq!(mix_code("99999", CODE_SPACE - 1), "19998");
        assert_eq!(mix_code("10000", 80_000), "10000");

        for local in [0, 1, 12_345, 45_000, CODE_SPACE - 1] {
            for provider in ["10000", "54321", "99999"] {
                assert!(is_code(&mix_code(provider, local)));
            }
        }
    }

    #[tokio::test]
    async fn provider_code_is_mixed_and_message_used() {
        let verifier = verifier(EchoCode);

        let dispatch = verifier.issue(login("alice")).await;
        assert_eq!(dispatch.code_source, CodeSource::Mixed);
        assert!(dispatch.message.starts_with("Hi! Your code: "));

        let code = extract_code(&dispatch.message);
        assert!(is_code(&code));
        assert_eq!(
            verifier.verify(PurposeKind::Login, &code).await.unwrap(),
            "alice"
        );
    }

    #[tokio::test]
    async fn malformed_provider_output_falls_back() {
        let verifier = verifier(Scripted::new(&["code: 1234", "no code in here"]));

        let dispatch = verifier.issue(login("alice")).await;
        assert_eq!(dispatch.code_source, CodeSource::Local);
        let code = extract_code(&dispatch.message);
        assert_eq!(dispatch.message, fallback_message(&code));
        assert!(verifier.verify(PurposeKind::Login, &code).await.is_ok());
    }

    #[tokio::test]
    async fn resend_invalidates_previous_code() {
        let verifier = verifier(Scripted::new(&["11111", "x", "11111", "y"]));

        let first = verifier.issue(login("alice")).await;
        let second = verifier.issue(login("alice")).await;
        assert_eq!(second.code_source, CodeSource::Mixed);
        assert_eq!(second.message, fallback_message(&extract_code(&second.message)));

        let first = extract_code(&first.message);
        let second = extract_code(&second.message);
        assert!(is_code(&first) && is_code(&second));

        if first != second {
            assert!(verifier.verify(PurposeKind::Login, &first).await.is_err());
        }
        assert!(verifier.verify(PurposeKind::Login, &second).await.is_ok());
        assert!(verifier.verify(PurposeKind::Login, &second).await.is_err());
    }

    #[tokio::test]
    async fn code_is_consumed_and_purpose_checked() {
        let verifier = verifier(OfflineProvider);

        let code = extract_code(&verifier.issue(login("alice")).await.message);
        assert!(matches!(
            verifier.verify(PurposeKind::PasswordReset, &code).await,
            Err(ServiceError::InvalidState(_))
        ));
        assert!(verifier.verify(PurposeKind::Login, &code).await.is_ok());
        assert!(matches!(
            verifier.verify(PurposeKind::Login, &code).await,
            Err(ServiceError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn near_miss_codes_fail() {
        let verifier = verifier(Scripted::new(&["54321", "no digits here"]));
        let code = extract_code(&verifier.issue(login("alice")).await.message);

        let near_misses = [
            code[..CODE_LENGTH - 1].to_string(),
            format!("{code}0"),
            format!(" {code}"),
            format!("{code} "),
            String::new(),
        ];
        for attempt in &near_misses {
            assert!(verifier.verify(PurposeKind::Login, attempt).await.is_err());
        }
        assert!(verifier.verify(PurposeKind::Login, &code).await.is_ok());
    }

    #[test]
    fn local_codes_are_five_digits() {
        for _ in 0..100 {
            assert!(is_code(&local_code()));
        }
    }
}
