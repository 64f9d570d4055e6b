use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

/// Server settings, read from `ROOMDESK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// Business offset used for peak classification and display.
    pub utc_offset: FixedOffset,
    pub store_timeout: Duration,
    /// JSON room catalog; the built-in rooms when unset.
    pub rooms_file: Option<PathBuf>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.var, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set keys
    /// that fail to parse are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_connections: usize = parse_or(&lookup, "ROOMDESK_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(ConfigError {
                var: "ROOMDESK_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let utc_offset = match lookup("ROOMDESK_UTC_OFFSET") {
            Some(raw) => parse_offset(&raw).map_err(|reason| ConfigError {
                var: "ROOMDESK_UTC_OFFSET",
                value: raw,
                reason,
            })?,
            None => default_offset(),
        };
        let timeout_ms: u64 = parse_or(&lookup, "ROOMDESK_STORE_TIMEOUT_MS", 5000)?;

        Ok(Self {
            bind: lookup("ROOMDESK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "ROOMDESK_PORT", 5433)?,
            data_dir: PathBuf::from(lookup("ROOMDESK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            max_connections,
            compact_threshold: parse_or(&lookup, "ROOMDESK_COMPACT_THRESHOLD", 1000)?,
            metrics_port: parse_opt(&lookup, "ROOMDESK_METRICS_PORT")?,
            utc_offset,
            store_timeout: Duration::from_millis(timeout_ms),
            rooms_file: lookup("ROOMDESK_ROOMS_FILE").map(PathBuf::from),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}

fn parse_opt<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value: raw,
        }),
    }
}

fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(lookup, var)?.unwrap_or(default))
}

/// +05:30
pub fn default_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or_else(|| Utc.fix())
}

/// Accepts `Z`, `UTC`, `+HH:MM`, `-HH:MM` and `+HHMM`.
pub fn parse_offset(raw: &str) -> Result<FixedOffset, String> {
    let s = raw.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => return Err("offset must start with + or -".into()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: u32 = hours.parse().map_err(|_| format!("bad hours in offset {s}"))?;
    let minutes: u32 = minutes.parse().map_err(|_| format!("bad minutes in offset {s}"))?;
    if hours > 23 || minutes > 59 {
        return Err(format!("offset {s} out of range"));
    }
    let seconds = (hours * 3600 + minutes * 60) as i32;
    FixedOffset::east_opt(sign * seconds).ok_or_else(|| format!("offset {s} out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]).unwrap();
        assert_eq!(c.addr(), "0.0.0.0:5433");
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.max_connections, 256);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.utc_offset.local_minus_utc(), 19_800);
        assert_eq!(c.store_timeout, Duration::from_secs(5));
        assert!(c.rooms_file.is_none());
        assert_eq!(c.wal_path(), PathBuf::from("./data/bookings.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("ROOMDESK_PORT", "6000"),
            ("ROOMDESK_BIND", "127.0.0.1"),
            ("ROOMDESK_METRICS_PORT", "9000"),
            ("ROOMDESK_UTC_OFFSET", "Z"),
            ("ROOMDESK_STORE_TIMEOUT_MS", "250"),
            ("ROOMDESK_ROOMS_FILE", "/etc/rooms.json"),
        ])
        .unwrap();
        assert_eq!(c.addr(), "127.0.0.1:6000");
        assert_eq!(c.metrics_port, Some(9000));
        assert_eq!(c.utc_offset.local_minus_utc(), 0);
        assert_eq!(c.store_timeout, Duration::from_millis(250));
        assert_eq!(c.rooms_file, Some(PathBuf::from("/etc/rooms.json")));
    }

    #[test]
    fn bad_values_are_errors() {
        let err = config(&[("ROOMDESK_PORT", "http")]).unwrap_err();
        assert_eq!(err.var, "ROOMDESK_PORT");
        assert!(config(&[("ROOMDESK_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config(&[("ROOMDESK_UTC_OFFSET", "IST")]).is_err());
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("+05:30").unwrap().local_minus_utc(), 19_800);
        assert_eq!(parse_offset("-08:00").unwrap().local_minus_utc(), -28_800);
        assert_eq!(parse_offset("+0545").unwrap().local_minus_utc(), 20_700);
        assert_eq!(parse_offset("+02").unwrap().local_minus_utc(), 7_200);
        assert_eq!(parse_offset("utc").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("+25:00").is_err());
        assert!(parse_offset("05:30").is_err());
    }
}
