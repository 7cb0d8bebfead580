// Statistics engine - Power aggregates and charge-curve trend markers
use crate::domain::reading::Reading;
use crate::domain::statistics::{Analysis, HealthSummary, StatisticsReport};
use std::collections::BTreeMap;

/// A decile counts as a drop when it averages below this share of the one above.
const DROP_RATIO: f64 = 0.9;

/// Aggregate the charging readings of a slice.
///
/// Only readings that are charging with positive power count. The per-decile
/// figure is the plain mean of the per-percentage means, not a mean over raw
/// samples; earlier reports were computed that way and stay comparable.
pub fn analyze(readings: &[Reading]) -> Analysis {
    let charging: Vec<&Reading> = readings.iter().filter(|r| r.is_delivering_power()).collect();
    if charging.is_empty() {
        return Analysis::NoData;
    }

    let mut max_reading = charging[0];
    let mut min_power = charging[0].power_w;
    let mut total_power = 0.0;
    for &reading in &charging {
        // Strict comparison keeps the first reading on ties
        if reading.power_w > max_reading.power_w {
            max_reading = reading;
        }
        min_power = min_power.min(reading.power_w);
        total_power += reading.power_w;
    }

    let power_by_percentage_decile = decile_averages(&charging);
    let power_drop_percentage = find_power_drop(&power_by_percentage_decile);

    Analysis::Report(StatisticsReport {
        max_power: max_reading.power_w,
        min_power,
        average_power: total_power / charging.len() as f64,
        total_count: readings.len(),
        charging_count: charging.len(),
        power_by_percentage_decile,
        max_power_percentage: Some(max_reading.percentage),
        power_drop_percentage,
    })
}

/// Two-pass fold: mean per exact percentage, then mean of those per decile.
fn decile_averages(charging: &[&Reading]) -> BTreeMap<u8, f64> {
    let mut by_percentage: BTreeMap<u8, (f64, usize)> = BTreeMap::new();
    for reading in charging {
        let entry = by_percentage.entry(reading.percentage).or_insert((0.0, 0));
        entry.0 += reading.power_w;
        entry.1 += 1;
    }

    let mut by_decile: BTreeMap<u8, (f64, usize)> = BTreeMap::new();
    for (percentage, (sum, count)) in by_percentage {
        let entry = by_decile.entry(decile_of(percentage)).or_insert((0.0, 0));
        entry.0 += sum / count as f64;
        entry.1 += 1;
    }

    by_decile
        .into_iter()
        .map(|(decile, (sum, groups))| (decile, sum / groups as f64))
        .collect()
}

fn decile_of(percentage: u8) -> u8 {
    percentage / 10 * 10
}

/// Walk deciles from full to empty; report the first one that falls more
/// than 10% below its higher neighbour.
fn find_power_drop(deciles: &BTreeMap<u8, f64>) -> Option<u8> {
    let descending: Vec<(u8, f64)> = deciles.iter().rev().map(|(d, p)| (*d, *p)).collect();

    descending
        .windows(2)
        .find(|pair| pair[1].1 < pair[0].1 * DROP_RATIO)
        .map(|pair| pair[1].0)
}

/// Health aggregates over readings that carry a derived health figure.
pub fn summarize_health(readings: &[Reading]) -> Option<HealthSummary> {
    let with_health: Vec<(&Reading, f64)> = readings
        .iter()
        .filter_map(|r| r.health_percent.map(|h| (r, h)))
        .collect();
    let (latest, current_health) = *with_health.last()?;

    let values = with_health.iter().map(|(_, h)| *h);
    let min_health = values.clone().fold(f64::INFINITY, f64::min);
    let max_health = values.clone().fold(f64::NEG_INFINITY, f64::max);
    let average_health = values.sum::<f64>() / with_health.len() as f64;

    Some(HealthSummary {
        current_health,
        average_health,
        min_health,
        max_health,
        sample_count: with_health.len(),
        cycle_count: latest.cycle_count,
        max_cycle_count: readings.iter().filter_map(|r| r.cycle_count).max(),
        design_capacity_mah: latest.design_capacity_mah,
        max_capacity_mah: latest.max_capacity_mah,
    })
}
