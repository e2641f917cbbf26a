use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static TRANSACTION_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{10}$").expect("valid transaction code pattern"));

/// Exactly ten ASCII letters or digits.
pub fn is_valid_transaction_code(code: &str) -> bool {
    TRANSACTION_CODE.is_match(code)
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn verify(&self, transaction_code: &str, amount: u64) -> Result<(), PaymentError>;
}

/// Waits for the configured delay and accepts any well-formed code. No money
/// moves anywhere.
pub struct SimulatedPayments {
    delay: Duration,
}

impl SimulatedPayments {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPayments {
    async fn verify(&self, transaction_code: &str, amount: u64) -> Result<(), PaymentError> {
        if !is_valid_transaction_code(transaction_code) {
            return Err(PaymentError::Rejected("malformed transaction code".to_string()));
        }

        tokio::time::sleep(self.delay).await;
        log::info!("Simulated payment of {} accepted.", amount);
        Ok(())
    }
}
