pub mod checks;
pub mod probe;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("Request timed out")]
    Timeout,
    #[error("No response or server not reachable")]
    Unreachable,
    #[error("Error {code}: {status_text}")]
    Http { code: u16, status_text: String },
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> Result<u16, ProbeError>;
}
