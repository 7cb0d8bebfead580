// Reading service - Pull API over stored readings
use crate::application::curve::{self, Smoothing};
use crate::application::reading_repository::ReadingRepository;
use crate::application::resampler;
use crate::application::statistics;
use crate::domain::chart::ChartSeries;
use crate::domain::error::StoreError;
use crate::domain::reading::{Reading, TimeRange};
use crate::domain::statistics::{Analysis, HealthSummary};
use std::sync::Arc;

#[derive(Clone)]
pub struct ReadingService {
    repository: Arc<dyn ReadingRepository>,
}

impl ReadingService {
    pub fn new(repository: Arc<dyn ReadingRepository>) -> Self {
        Self { repository }
    }

    pub async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        self.repository.latest().await
    }

    /// Readings inside `range`, oldest first. Reversed bounds are swapped.
    pub async fn range(&self, range: TimeRange) -> Result<Vec<Reading>, StoreError> {
        self.repository.query_range(range.normalized()).await
    }

    /// Newest first
    pub async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        self.repository.query_recent(limit).await
    }

    pub async fn all(&self) -> Result<Vec<Reading>, StoreError> {
        self.repository.query_all().await
    }

    /// Statistics over `range`, or over everything stored when `None`.
    pub async fn statistics(&self, range: Option<TimeRange>) -> Result<Analysis, StoreError> {
        let readings = match range {
            Some(range) => self.range(range).await?,
            None => self.all().await?,
        };
        Ok(statistics::analyze(&readings))
    }

    pub async fn health(&self) -> Result<Option<HealthSummary>, StoreError> {
        let readings = self.all().await?;
        Ok(statistics::summarize_health(&readings))
    }

    /// Resampled series for `window` with the power curve drawn through it.
    pub async fn chart(&self, window: TimeRange, smoothing: Smoothing) -> Result<ChartSeries, StoreError> {
        let window = window.normalized();
        let readings = self.range(window).await?;
        let series = resampler::resample(&readings, window);
        let power_curve = curve::build(&curve::power_points(&series), smoothing);

        tracing::debug!(
            "Chart over {:?}: {} stored readings -> {} buckets",
            window.duration(),
            readings.len(),
            series.len()
        );

        Ok(ChartSeries {
            window,
            bucket_width_secs: resampler::bucket_width(window.duration()).num_seconds(),
            readings: series,
            power_curve,
            polyline: None,
        })
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.repository.clear().await?;
        tracing::info!("All stored readings cleared");
        Ok(())
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.repository.count().await
    }

    pub fn is_persistent(&self) -> bool {
        self.repository.is_persistent()
    }
}
