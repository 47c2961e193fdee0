use std::time::Duration;

use chrono::Weekday;
use chrono_tz::Tz;
use tracing::warn;

use crate::limits::MAX_ORG_ID_LEN;

/// Engine settings. Everything has a usable default; `from_env` overrides
/// individual fields from `ROTA_*` variables.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Organization whose data and change events the engine follows.
    pub org_id: String,
    /// Zone used to derive day-keys and to resolve wall-clock input.
    pub timezone: Tz,
    pub week_starts_on: Weekday,
    /// Upper bound on a single remote write. Expiry rolls back.
    pub write_timeout: Duration,
    /// Reject edits, moves and deletes of completed/cancelled shifts.
    pub lock_finalized_shifts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            org_id: "default".into(),
            timezone: Tz::UTC,
            week_starts_on: Weekday::Mon,
            write_timeout: Duration::from_secs(10),
            lock_finalized_shifts: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(org) = lookup("ROTA_ORG") {
            if org.is_empty() || org.len() > MAX_ORG_ID_LEN {
                warn!("ignoring ROTA_ORG: must be 1..={MAX_ORG_ID_LEN} bytes");
            } else {
                config.org_id = org;
            }
        }
        if let Some(raw) = lookup("ROTA_TIMEZONE") {
            match raw.parse::<Tz>() {
                Ok(tz) => config.timezone = tz,
                Err(_) => warn!("ignoring ROTA_TIMEZONE={raw}: unknown zone"),
            }
        }
        if let Some(raw) = lookup("ROTA_WEEK_START") {
            match raw.parse::<Weekday>() {
                Ok(day) => config.week_starts_on = day,
                Err(_) => warn!("ignoring ROTA_WEEK_START={raw}: expected mon..sun"),
            }
        }
        if let Some(raw) = lookup("ROTA_WRITE_TIMEOUT_MS") {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.write_timeout = Duration::from_millis(ms),
                _ => warn!("ignoring ROTA_WRITE_TIMEOUT_MS={raw}"),
            }
        }
        if let Some(raw) = lookup("ROTA_LOCK_FINALIZED") {
            config.lock_finalized_shifts = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = EngineConfig::from_lookup(|_| None);
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.week_starts_on, Weekday::Mon);
    }

    #[test]
    fn reads_all_fields() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ROTA_ORG", "acme"),
            ("ROTA_TIMEZONE", "America/Chicago"),
            ("ROTA_WEEK_START", "sun"),
            ("ROTA_WRITE_TIMEOUT_MS", "2500"),
            ("ROTA_LOCK_FINALIZED", "true"),
        ]));
        assert_eq!(config.org_id, "acme");
        assert_eq!(config.timezone, chrono_tz::America::Chicago);
        assert_eq!(config.week_starts_on, Weekday::Sun);
        assert_eq!(config.write_timeout, Duration::from_millis(2500));
        assert!(config.lock_finalized_shifts);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("ROTA_TIMEZONE", "Mars/Olympus"),
            ("ROTA_WEEK_START", "someday"),
            ("ROTA_WRITE_TIMEOUT_MS", "0"),
            ("ROTA_ORG", ""),
        ]));
        assert_eq!(config.org_id, "default");
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.week_starts_on, Weekday::Mon);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }
}
