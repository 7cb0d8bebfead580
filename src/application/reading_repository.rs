// Repository trait for reading persistence
use crate::domain::error::StoreError;
use crate::domain::reading::{Reading, TimeRange};
use async_trait::async_trait;

/// Rows removed by one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Eviction {
    pub expired: usize,
    pub over_capacity: usize,
}

impl Eviction {
    pub fn total(&self) -> usize {
        self.expired + self.over_capacity
    }
}

#[async_trait]
pub trait ReadingRepository: Send + Sync {
    /// Persist a reading, then evict. Eviction failures are logged, not returned.
    async fn append(&self, reading: &Reading) -> Result<(), StoreError>;

    /// Readings inside the range (bounds inclusive), oldest first
    async fn query_range(&self, range: TimeRange) -> Result<Vec<Reading>, StoreError>;

    /// Up to `limit` readings, newest first
    async fn query_recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError>;

    /// Every stored reading, oldest first
    async fn query_all(&self) -> Result<Vec<Reading>, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    /// Drop expired readings, then the oldest ones above the cap
    async fn evict(&self) -> Result<Eviction, StoreError>;

    /// False when running without a backing medium
    fn is_persistent(&self) -> bool {
        true
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        Ok(self.query_recent(1).await?.into_iter().next())
    }
}

/// Stand-in used when the database could not be opened at startup.
///
/// Appends fail with `StorageUnavailable` so the sample is dropped; reads
/// return nothing.
#[derive(Debug, Clone)]
pub struct UnavailableRepository {
    reason: String,
}

impl UnavailableRepository {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ReadingRepository for UnavailableRepository {
    async fn append(&self, _reading: &Reading) -> Result<(), StoreError> {
        Err(StoreError::StorageUnavailable(self.reason.clone()))
    }

    async fn query_range(&self, _range: TimeRange) -> Result<Vec<Reading>, StoreError> {
        Ok(Vec::new())
    }

    async fn query_recent(&self, _limit: usize) -> Result<Vec<Reading>, StoreError> {
        Ok(Vec::new())
    }

    async fn query_all(&self) -> Result<Vec<Reading>, StoreError> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(0)
    }

    async fn evict(&self) -> Result<Eviction, StoreError> {
        Ok(Eviction::default())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unavailable_repository_drops_appends() {
        let repo = UnavailableRepository::new("disk missing");
        let reading = Reading::idle(Utc::now(), 12_000.0, 40);

        let err = repo.append(&reading).await.unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable(ref r) if r == "disk missing"));
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(repo.latest().await.unwrap().is_none());
        assert!(!repo.is_persistent());
    }
}
