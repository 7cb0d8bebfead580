// Reading domain model - one validated charging sample
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A validated telemetry sample.
///
/// Non-charging readings carry zero current and zero power. `idle` and
/// `charging` uphold that; code building a `Reading` field by field (or
/// deserializing one) is responsible for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub voltage_mv: f64,
    pub current_ma: f64,
    pub power_w: f64,
    pub percentage: u8,
    pub is_charging: bool,
    pub temperature_tenths_c: Option<f64>,
    pub cycle_count: Option<u32>,
    pub design_capacity_mah: Option<u32>,
    pub max_capacity_mah: Option<u32>,
    pub health_percent: Option<f64>,
}

/// Optional battery fields that never decide whether a sample is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BatteryDetails {
    pub temperature_tenths_c: Option<f64>,
    pub cycle_count: Option<u32>,
    pub design_capacity_mah: Option<u32>,
    pub max_capacity_mah: Option<u32>,
}

impl Reading {
    /// A sample taken while not charging.
    pub fn idle(timestamp: DateTime<Utc>, voltage_mv: f64, percentage: u8) -> Self {
        Self {
            timestamp,
            voltage_mv,
            current_ma: 0.0,
            power_w: 0.0,
            percentage: percentage.min(100),
            is_charging: false,
            temperature_tenths_c: None,
            cycle_count: None,
            design_capacity_mah: None,
            max_capacity_mah: None,
            health_percent: None,
        }
    }

    pub fn charging(
        timestamp: DateTime<Utc>,
        voltage_mv: f64,
        current_ma: f64,
        power_w: f64,
        percentage: u8,
    ) -> Self {
        Self {
            current_ma,
            power_w,
            is_charging: true,
            ..Self::idle(timestamp, voltage_mv, percentage)
        }
    }

    /// Attach optional battery fields, deriving health from the capacities.
    pub fn with_details(mut self, details: BatteryDetails) -> Self {
        self.temperature_tenths_c = details.temperature_tenths_c;
        self.cycle_count = details.cycle_count;
        self.design_capacity_mah = details.design_capacity_mah;
        self.max_capacity_mah = details.max_capacity_mah;
        self.health_percent = derive_health(details.design_capacity_mah, details.max_capacity_mah);
        self
    }

    pub fn details(&self) -> BatteryDetails {
        BatteryDetails {
            temperature_tenths_c: self.temperature_tenths_c,
            cycle_count: self.cycle_count,
            design_capacity_mah: self.design_capacity_mah,
            max_capacity_mah: self.max_capacity_mah,
        }
    }

    /// Charging with positive power, the only samples that feed power statistics.
    pub fn is_delivering_power(&self) -> bool {
        self.is_charging && self.power_w > 0.0
    }
}

/// `max / design * 100`, only when both are known and design is non-zero.
pub fn derive_health(design_mah: Option<u32>, max_mah: Option<u32>) -> Option<f64> {
    match (design_mah, max_mah) {
        (Some(design), Some(max)) if design > 0 => Some(max as f64 / design as f64 * 100.0),
        _ => None,
    }
}

/// Longest look-back accepted for an hour-based window (about 100 years).
pub const MAX_WINDOW_HOURS: i64 = 100 * 8766;

/// A pair of instants. `start <= end` is not enforced; call `normalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window covering the last `hours` hours up to `now`.
    ///
    /// `hours` is clamped to `1..=MAX_WINDOW_HOURS`, so any caller-supplied
    /// value yields a valid window.
    pub fn last_hours(now: DateTime<Utc>, hours: i64) -> Self {
        let hours = hours.clamp(1, MAX_WINDOW_HOURS);
        let start = Duration::try_hours(hours)
            .and_then(|span| now.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, now)
    }

    /// Swap the bounds if they arrived reversed.
    pub fn normalized(self) -> Self {
        if self.start > self.end {
            Self {
                start: self.end,
                end: self.start,
            }
        } else {
            self
        }
    }

    pub fn duration(&self) -> Duration {
        let range = self.normalized();
        range.end - range.start
    }
}
