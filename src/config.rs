//! Balancer configuration
//!
//! Properties are read once at init from the site configuration and from each
//! table's custom properties. All recognized keys live under a common prefix;
//! unknown keys are ignored.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Common prefix for every property this balancer recognizes. A key of the
/// form `balancer.host.regex.<tableName>` set in a table's custom properties
/// defines the host regex for the pool named after that table.
pub const HOST_BALANCER_PREFIX: &str = "balancer.host.regex.";

/// Interval between out-of-bounds scans.
pub const HOST_BALANCER_OOB_PERIOD: &str = "balancer.host.regex.oob.period";

/// Interval between pool re-derivations.
pub const HOST_BALANCER_POOL_RECHECK: &str = "balancer.host.regex.pool.check";

/// When true, regexes are matched against the raw host string without name
/// resolution.
pub const HOST_BALANCER_IS_IP: &str = "balancer.host.regex.is.ip";

const DEFAULT_OOB_PERIOD: Duration = Duration::from_secs(5 * 60);
const DEFAULT_POOL_RECHECK: Duration = Duration::from_secs(60);

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid duration '{value}' for {key}")]
    InvalidDuration { key: String, value: String },
}

/// Operator-set balancer properties, immutable after init.
#[derive(Debug, Clone)]
pub struct BalancerSettings {
    /// Interval between out-of-bounds scans.
    pub oob_period: Duration,
    /// Interval between pool re-derivations.
    pub pool_recheck_period: Duration,
    /// Match regexes against the raw host string instead of the resolved name.
    pub ip_based_regex: bool,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self {
            oob_period: DEFAULT_OOB_PERIOD,
            pool_recheck_period: DEFAULT_POOL_RECHECK,
            ip_based_regex: false,
        }
    }
}

impl BalancerSettings {
    /// Read settings from a site property map. Unknown keys are ignored;
    /// a malformed duration is fatal.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();

        if let Some(value) = props.get(HOST_BALANCER_OOB_PERIOD) {
            settings.oob_period =
                parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
                    key: HOST_BALANCER_OOB_PERIOD.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = props.get(HOST_BALANCER_POOL_RECHECK) {
            settings.pool_recheck_period =
                parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
                    key: HOST_BALANCER_POOL_RECHECK.to_string(),
                    value: value.clone(),
                })?;
        }

        if let Some(value) = props.get(HOST_BALANCER_IS_IP) {
            settings.ip_based_regex = value.trim().eq_ignore_ascii_case("true");
        }

        Ok(settings)
    }
}

/// Extract the pool name from a per-table regex property key.
///
/// Returns `None` for keys outside the balancer prefix and for the reserved
/// suffixes (`oob.period`, `pool.check`, `is.ip`), which are settings, never
/// pool definitions.
pub fn host_regex_pool_name(key: &str) -> Option<&str> {
    let suffix = key.strip_prefix(HOST_BALANCER_PREFIX)?;
    if suffix.is_empty() {
        return None;
    }
    match key {
        HOST_BALANCER_OOB_PERIOD | HOST_BALANCER_POOL_RECHECK | HOST_BALANCER_IS_IP => None,
        _ => Some(suffix),
    }
}

/// Parse a duration of the form `<integer><unit>` where unit is one of
/// `s`, `m`, `h`, `d`. A bare integer is taken as milliseconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (digits, seconds_per_unit) = match value.as_bytes()[value.len() - 1] {
        b's' => (&value[..value.len() - 1], Some(1u64)),
        b'm' => (&value[..value.len() - 1], Some(60)),
        b'h' => (&value[..value.len() - 1], Some(60 * 60)),
        b'd' => (&value[..value.len() - 1], Some(24 * 60 * 60)),
        _ => (value, None),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let count: u64 = digits.parse().ok()?;

    match seconds_per_unit {
        Some(mult) => Some(Duration::from_secs(count.checked_mul(mult)?)),
        None => Some(Duration::from_millis(count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BalancerSettings::default();
        assert_eq!(settings.oob_period, Duration::from_secs(300));
        assert_eq!(settings.pool_recheck_period, Duration::from_secs(60));
        assert!(!settings.ip_based_regex);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_parse_duration_bare_integer_is_millis() {
        assert_eq!(parse_duration("1500"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("m"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("-5m"), None);
        assert_eq!(parse_duration("5 m"), None);
        assert_eq!(parse_duration("five"), None);
    }

    #[test]
    fn test_from_properties() {
        let mut props = HashMap::new();
        props.insert(HOST_BALANCER_OOB_PERIOD.to_string(), "10m".to_string());
        props.insert(HOST_BALANCER_POOL_RECHECK.to_string(), "30s".to_string());
        props.insert(HOST_BALANCER_IS_IP.to_string(), "TRUE".to_string());
        props.insert("some.unrelated.key".to_string(), "whatever".to_string());

        let settings = BalancerSettings::from_properties(&props).unwrap();
        assert_eq!(settings.oob_period, Duration::from_secs(600));
        assert_eq!(settings.pool_recheck_period, Duration::from_secs(30));
        assert!(settings.ip_based_regex);
    }

    #[test]
    fn test_from_properties_bad_duration_is_fatal() {
        let mut props = HashMap::new();
        props.insert(HOST_BALANCER_OOB_PERIOD.to_string(), "soon".to_string());

        let err = BalancerSettings::from_properties(&props).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));
    }

    #[test]
    fn test_from_properties_non_true_boolean_is_false() {
        let mut props = HashMap::new();
        props.insert(HOST_BALANCER_IS_IP.to_string(), "yes".to_string());

        let settings = BalancerSettings::from_properties(&props).unwrap();
        assert!(!settings.ip_based_regex);
    }

    #[test]
    fn test_host_regex_pool_name() {
        assert_eq!(
            host_regex_pool_name("balancer.host.regex.orders"),
            Some("orders")
        );
        assert_eq!(host_regex_pool_name("balancer.host.regex."), None);
        assert_eq!(host_regex_pool_name("balancer.host.regex.oob.period"), None);
        assert_eq!(host_regex_pool_name("balancer.host.regex.pool.check"), None);
        assert_eq!(host_regex_pool_name("balancer.host.regex.is.ip"), None);
        assert_eq!(host_regex_pool_name("table.compaction.major"), None);
    }
}
