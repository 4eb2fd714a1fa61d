use anyhow::Result;
use async_trait::async_trait;

use super::CheckOutcome;

/// Compiles and runs a generated stress-tester.
///
/// Implementations own the scratch space for each check and clean it up afterwards,
/// whatever the outcome.
#[async_trait]
pub trait StressSandbox: Send + Sync {
    async fn check(&self, source: &str) -> Result<CheckOutcome>;
}
