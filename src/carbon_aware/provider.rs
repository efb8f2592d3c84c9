//! Generation-mix provider abstraction

use crate::carbon_aware::types::GenerationTable;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of time-indexed generation-mix tables
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generation per production type for `zone_id` over `[start, end)`
    async fn query_generation(
        &self,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GenerationTable>;

    /// Short name used in log lines
    fn name(&self) -> &str;
}

#[async_trait]
impl<T: GenerationProvider + ?Sized> GenerationProvider for Box<T> {
    async fn query_generation(
        &self,
        zone_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<GenerationTable> {
        (**self).query_generation(zone_id, start, end).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
