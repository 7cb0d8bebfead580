// Statistics domain models - aggregates derived from a reading slice
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of analysing a slice. `NoData` is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Analysis {
    NoData,
    Report(StatisticsReport),
}

impl Analysis {
    pub fn report(&self) -> Option<&StatisticsReport> {
        match self {
            Analysis::Report(report) => Some(report),
            Analysis::NoData => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsReport {
    pub max_power: f64,
    pub min_power: f64,
    pub average_power: f64,
    pub total_count: usize,
    pub charging_count: usize,
    /// Decile floor (0, 10, ..., 100) to average watts.
    pub power_by_percentage_decile: BTreeMap<u8, f64>,
    pub max_power_percentage: Option<u8>,
    pub power_drop_percentage: Option<u8>,
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Charging power statistics")?;
        writeln!(f, "=========================")?;
        writeln!(f)?;
        writeln!(f, "Power")?;
        writeln!(f, "  max power:      {:.2} W", self.max_power)?;
        writeln!(f, "  min power:      {:.2} W", self.min_power)?;
        writeln!(f, "  average power:  {:.2} W", self.average_power)?;
        writeln!(f)?;
        writeln!(f, "Samples")?;
        writeln!(f, "  total samples:     {}", self.total_count)?;
        if self.total_count > 0 {
            let share = self.charging_count as f64 / self.total_count as f64 * 100.0;
            writeln!(f, "  charging samples:  {} ({:.1}%)", self.charging_count, share)?;
        } else {
            writeln!(f, "  charging samples:  {}", self.charging_count)?;
        }
        writeln!(f)?;
        writeln!(f, "Trend")?;
        match self.max_power_percentage {
            Some(pct) => writeln!(f, "  max power at:   {}%", pct)?,
            None => writeln!(f, "  max power at:   no data")?,
        }
        match self.power_drop_percentage {
            Some(pct) => writeln!(f, "  power drop at:  {}% (more than 10% below the level above)", pct)?,
            None => writeln!(f, "  power drop at:  no clear drop")?,
        }
        writeln!(f)?;
        writeln!(f, "Average power by charge level")?;
        for (decile, power) in self.power_by_percentage_decile.iter().rev() {
            writeln!(f, "  {}: {:.2} W", decile_label(*decile), power)?;
        }
        Ok(())
    }
}

/// `"80% - 89%"`, capped at 100.
pub fn decile_label(decile: u8) -> String {
    format!("{}% - {}%", decile, (decile + 9).min(100))
}

/// Battery wear aggregated over readings that report both capacities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSummary {
    pub current_health: f64,
    pub average_health: f64,
    pub min_health: f64,
    pub max_health: f64,
    pub sample_count: usize,
    pub cycle_count: Option<u32>,
    pub max_cycle_count: Option<u32>,
    pub design_capacity_mah: Option<u32>,
    pub max_capacity_mah: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> StatisticsReport {
        let mut deciles = BTreeMap::new();
        deciles.insert(30, 40.0);
        deciles.insert(90, 10.5);
        StatisticsReport {
            max_power: 45.0,
            min_power: 5.0,
            average_power: 25.25,
            total_count: 10,
            charging_count: 8,
            power_by_percentage_decile: deciles,
            max_power_percentage: Some(35),
            power_drop_percentage: None,
        }
    }

    #[test]
    fn test_decile_label_caps_at_full() {
        assert_eq!(decile_label(0), "0% - 9%");
        assert_eq!(decile_label(90), "90% - 99%");
        assert_eq!(decile_label(100), "100% - 100%");
    }

    #[test]
    fn test_report_text_lists_deciles_high_to_low() {
        let text = sample_report().to_string();
        let high = text.find("90% - 99%: 10.50 W").unwrap();
        let low = text.find("30% - 39%: 40.00 W").unwrap();
        assert!(high < low);
        assert!(text.contains("charging samples:  8 (80.0%)"));
        assert!(text.contains("no clear drop"));
    }

    #[test]
    fn test_no_data_serializes_as_status() {
        let json = serde_json::to_value(Analysis::NoData).unwrap();
        assert_eq!(json["status"], "no_data");

        let json = serde_json::to_value(Analysis::Report(sample_report())).unwrap();
        assert_eq!(json["status"], "report");
        assert_eq!(json["max_power_percentage"], 35);
    }
}
