// Parser - Raw battery registry text to validated readings
use crate::domain::error::ParseError;
use crate::domain::reading::{BatteryDetails, Reading};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Longest digit run accepted for a voltage token; longer ones are corrupted.
const MAX_VOLTAGE_DIGITS: usize = 10;
/// Negative currents reported as unsigned 64-bit integers land above this.
const OVERFLOW_THRESHOLD_MA: f64 = 1.0e18;
const MAX_CURRENT_MA: f64 = 10_000.0;
const MAX_POWER_W: f64 = 200.0;
/// External power only counts as charging above this current.
const EXTERNAL_POWER_MIN_CURRENT_MA: f64 = 100.0;

const VOLTAGE_KEY: &str = "Voltage";
const CURRENT_KEYS: &[&str] = &["InstantAmperage", "Amperage"];
const CHARGING_KEY: &str = "IsCharging";
const EXTERNAL_POWER_KEY: &str = "ExternalConnected";
const PERCENTAGE_KEY: &str = "CurrentCapacity";
const TEMPERATURE_KEY: &str = "Temperature";
const CYCLE_COUNT_KEY: &str = "CycleCount";
const DESIGN_CAPACITY_KEY: &str = "DesignCapacity";
const MAX_CAPACITY_KEYS: &[&str] = &["AppleRawMaxCapacity", "MaxCapacity"];

/// Parse a raw blob stamped with the current time.
pub fn parse(raw: &str) -> Result<Reading, ParseError> {
    parse_at(raw, Utc::now())
}

/// Parse a raw blob into a reading taken at `timestamp`.
pub fn parse_at(raw: &str, timestamp: DateTime<Utc>) -> Result<Reading, ParseError> {
    let fields = RawFields::scan(raw);
    let result = build_reading(&fields, timestamp);

    if let Err(e) = &result {
        tracing::debug!("Rejected raw sample ({} fields): {}", fields.len(), e);
    }

    result
}

fn build_reading(fields: &RawFields<'_>, timestamp: DateTime<Utc>) -> Result<Reading, ParseError> {
    let current = fields.first_of(CURRENT_KEYS).and_then(parse_signed);
    let explicit = fields.flag(CHARGING_KEY).unwrap_or(false);
    let external = fields.flag(EXTERNAL_POWER_KEY).unwrap_or(false);
    let is_charging =
        explicit || (external && current.is_some_and(|c| c > EXTERNAL_POWER_MIN_CURRENT_MA));

    let voltage = fields
        .get(VOLTAGE_KEY)
        .and_then(parse_voltage)
        .ok_or(ParseError::MissingVoltage)?;
    let percentage = fields.get(PERCENTAGE_KEY).map(parse_percentage).unwrap_or(0);
    let details = fields.details();

    if !is_charging {
        return Ok(Reading::idle(timestamp, voltage, percentage).with_details(details));
    }

    let current = current.ok_or(ParseError::MissingCurrent)?;
    if current.abs() > OVERFLOW_THRESHOLD_MA {
        return Err(ParseError::OverflowValue {
            field: "current",
            value: current,
        });
    }
    if current.abs() > MAX_CURRENT_MA {
        return Err(ParseError::OutOfRange {
            field: "current",
            value: current,
            limit: MAX_CURRENT_MA,
        });
    }

    // mV * mA = µW
    let power = voltage * current / 1_000_000.0;
    if power.abs() > MAX_POWER_W {
        return Err(ParseError::OutOfRange {
            field: "power",
            value: power,
            limit: MAX_POWER_W,
        });
    }

    Ok(Reading::charging(timestamp, voltage, current, power, percentage).with_details(details))
}

/// Key/value pairs found in a raw blob. First occurrence of a key wins.
struct RawFields<'a> {
    pairs: HashMap<&'a str, &'a str>,
}

impl<'a> RawFields<'a> {
    fn scan(raw: &'a str) -> Self {
        let mut pairs = HashMap::new();

        for line in raw.lines() {
            // Nested dictionaries and arrays put several pairs on one line
            for fragment in line.split([',', '{', '}', '(', ')']) {
                let Some((key, value)) = fragment.split_once('=') else {
                    continue;
                };
                let key = key.trim().trim_matches('"').trim();
                let value = value.trim().trim_matches('"').trim();
                if key.is_empty() || value.is_empty() {
                    continue;
                }
                pairs.entry(key).or_insert(value);
            }
        }

        Self { pairs }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs.get(key).copied()
    }

    fn first_of(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|key| self.get(key))
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(parse_flag)
    }

    fn details(&self) -> BatteryDetails {
        BatteryDetails {
            temperature_tenths_c: self.get(TEMPERATURE_KEY).and_then(parse_signed),
            cycle_count: self.get(CYCLE_COUNT_KEY).and_then(parse_count),
            design_capacity_mah: self.get(DESIGN_CAPACITY_KEY).and_then(parse_count),
            max_capacity_mah: self.first_of(MAX_CAPACITY_KEYS).and_then(parse_count),
        }
    }
}

fn parse_voltage(token: &str) -> Option<f64> {
    let digits = token.chars().filter(char::is_ascii_digit).count();
    if digits == 0 || digits > MAX_VOLTAGE_DIGITS {
        return None;
    }
    parse_signed(token).filter(|v| *v > 0.0)
}

fn parse_signed(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_count(token: &str) -> Option<u32> {
    token.parse::<u32>().ok()
}

fn parse_percentage(token: &str) -> u8 {
    parse_signed(token)
        .map(|pct| pct.round().clamp(0.0, 100.0) as u8)
        .unwrap_or(0)
}

fn parse_flag(token: &str) -> Option<bool> {
    match token.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const REGISTRY_DUMP: &str = r#"
+-o AppleSmartBattery  <class AppleSmartBattery, id 0x100000259, registered, matched, active, busy 0 (0 ms), retain 7>
    {
      "AdapterVoltage" = 20000
      "AppleRawMaxCapacity" = 4512
      "BatteryData" = {"Voltage"=12600,"CycleCount"=1,"DesignCapacity"=1}
      "CurrentCapacity" = 62
      "CycleCount" = 187
      "DesignCapacity" = 4790
      "ExternalConnected" = Yes
      "InstantAmperage" = 2400
      "IsCharging" = Yes
      "MaxCapacity" = 100
      "Temperature" = 3051
      "Voltage" = 12450
    }
"#;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_parse_charging_scenario() {
        let raw = "Voltage=12000\nInstantAmperage=2000\nIsCharging=Yes\nCurrentCapacity=55\n";
        let reading = parse_at(raw, now()).unwrap();

        assert_eq!(reading.voltage_mv, 12000.0);
        assert_eq!(reading.current_ma, 2000.0);
        assert_eq!(reading.power_w, 24.0);
        assert_eq!(reading.percentage, 55);
        assert!(reading.is_charging);
        assert_eq!(reading.timestamp, now());
    }

    #[test]
    fn test_parse_registry_dump() {
        let reading = parse_at(REGISTRY_DUMP, now()).unwrap();

        // The nested BatteryData dictionary comes first and wins for its keys
        assert_eq!(reading.voltage_mv, 12600.0);
        assert_eq!(reading.cycle_count, Some(1));
        assert_eq!(reading.current_ma, 2400.0);
        assert_eq!(reading.percentage, 62);
        assert_eq!(reading.temperature_tenths_c, Some(3051.0));
        assert_eq!(reading.max_capacity_mah, Some(4512));
        assert!(reading.is_charging);
    }

    #[test]
    fn test_adapter_voltage_does_not_count_as_voltage() {
        let raw = "\"AdapterVoltage\" = 20000\n\"IsCharging\" = No\n";
        assert_eq!(parse_at(raw, now()), Err(ParseError::MissingVoltage));
    }

    #[test]
    fn test_not_charging_zeroes_current_and_power() {
        let raw = "\"Voltage\" = 11800\n\"InstantAmperage\" = -1450\n\"IsCharging\" = No\n\"CurrentCapacity\" = 80\n";
        let reading = parse_at(raw, now()).unwrap();

        assert!(!reading.is_charging);
        assert_eq!(reading.current_ma, 0.0);
        assert_eq!(reading.power_w, 0.0);
        assert_eq!(reading.percentage, 80);
    }

    #[test]
    fn test_external_power_needs_meaningful_current() {
        let trickle = "Voltage=12000\nInstantAmperage=50\nExternalConnected=Yes\n";
        assert!(!parse_at(trickle, now()).unwrap().is_charging);

        let charging = "Voltage=12000\nInstantAmperage=1500\nExternalConnected=Yes\n";
        let reading = parse_at(charging, now()).unwrap();
        assert!(reading.is_charging);
        assert_eq!(reading.power_w, 18.0);
    }

    #[test]
    fn test_missing_or_invalid_voltage_rejects_sample() {
        for raw in [
            "InstantAmperage=2000\nIsCharging=Yes\n",
            "Voltage=0\nInstantAmperage=2000\nIsCharging=Yes\n",
            "Voltage=-12000\nIsCharging=No\n",
            "Voltage=abc\nIsCharging=No\n",
            "Voltage=12345678901\nIsCharging=No\n",
        ] {
            assert_eq!(parse_at(raw, now()), Err(ParseError::MissingVoltage), "{raw:?}");
        }
    }

    #[test]
    fn test_charging_without_current_is_rejected() {
        let raw = "Voltage=12000\nIsCharging=Yes\n";
        assert_eq!(parse_at(raw, now()), Err(ParseError::MissingCurrent));
    }

    #[test]
    fn test_wraparound_current_is_overflow() {
        let raw = "Voltage=12000\nInstantAmperage=18446744073709550000\nIsCharging=Yes\n";
        assert!(matches!(
            parse_at(raw, now()),
            Err(ParseError::OverflowValue { field: "current", .. })
        ));
    }

    #[test]
    fn test_implausible_current_is_out_of_range() {
        for current in ["10001", "-25000", "999999"] {
            let raw = format!("Voltage=12000\nInstantAmperage={current}\nIsCharging=Yes\n");
            assert!(matches!(
                parse_at(&raw, now()),
                Err(ParseError::OutOfRange { field: "current", .. })
            ));
        }
    }

    #[test]
    fn test_implausible_power_is_out_of_range() {
        let raw = "Voltage=25000\nInstantAmperage=9000\nIsCharging=Yes\n";
        assert!(matches!(
            parse_at(raw, now()),
            Err(ParseError::OutOfRange { field: "power", .. })
        ));
    }

    #[test]
    fn test_percentage_defaults_and_clamps() {
        let absent = parse_at("Voltage=12000\n", now()).unwrap();
        assert_eq!(absent.percentage, 0);

        let over = parse_at("Voltage=12000\nCurrentCapacity=150\n", now()).unwrap();
        assert_eq!(over.percentage, 100);

        let garbage = parse_at("Voltage=12000\nCurrentCapacity=lots\n", now()).unwrap();
        assert_eq!(garbage.percentage, 0);
    }

    #[test]
    fn test_optional_fields_never_reject() {
        let raw = "Voltage=12000\nCycleCount=-3\nDesignCapacity=n/a\nMaxCapacity=4000\nTemperature=warm\n";
        let reading = parse_at(raw, now()).unwrap();

        assert_eq!(reading.cycle_count, None);
        assert_eq!(reading.design_capacity_mah, None);
        assert_eq!(reading.max_capacity_mah, Some(4000));
        assert_eq!(reading.temperature_tenths_c, None);
        assert_eq!(reading.health_percent, None);
    }

    #[test]
    fn test_health_from_raw_capacity() {
        let raw = "Voltage=12000\nDesignCapacity=5000\nAppleRawMaxCapacity=4500\nMaxCapacity=100\n";
        let reading = parse_at(raw, now()).unwrap();
        assert_eq!(reading.health_percent, Some(90.0));
    }

    #[test]
    fn test_amperage_fallback_and_flag_spellings() {
        let raw = "Voltage=12000\nAmperage=1000\nIsCharging=TRUE\n";
        let reading = parse_at(raw, now()).unwrap();
        assert!(reading.is_charging);
        assert_eq!(reading.current_ma, 1000.0);
    }
}
