//! Options - スケジューラとエンジンのチューニング
//!
//! JSON で書き、環境変数 `LOOM_*` で上書きできる。時間はすべてミリ秒。
//!
//! ```json
//! {
//!   "idle_sleep_ms": 500,
//!   "concurrent_request_workers": 8,
//!   "exception_policy": { "retry_after_ms": 10000 }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::RetryPolicy;
use crate::error::LoomError;

/// What happens to a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionPolicy {
    /// Drop the message after reporting the failure.
    #[default]
    Delete,
    /// Keep the message and make it visible again after the delay.
    RetryAfterMs(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub idle_sleep_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub concurrent_request_workers: usize,
    pub worker_replacement_timeout_ms: u64,
    /// Upper bound on one transition; added to every sleep so a sleeping
    /// request is not picked up again before it is due.
    pub max_transition_time_ms: u64,
    pub join_retry_interval_ms: u64,
    pub join_retry_timeout_ms: u64,
    pub exception_policy: ExceptionPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 1_000,
            heartbeat_interval_ms: 60_000,
            concurrent_request_workers: 16,
            worker_replacement_timeout_ms: 600_000,
            max_transition_time_ms: 30_000,
            join_retry_interval_ms: 50,
            join_retry_timeout_ms: 30_000,
            exception_policy: ExceptionPolicy::Delete,
        }
    }
}

impl Options {
    pub fn from_json_str(json: &str) -> Result<Self, LoomError> {
        let options: Options = serde_json::from_str(json)
            .map_err(|e| LoomError::Config(format!("invalid options: {e}")))?;
        options.validate()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoomError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LoomError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Apply `LOOM_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, LoomError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides looked up by `lookup` (e.g. `LOOM_IDLE_SLEEP_MS`).
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LoomError> {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, LoomError> {
            raw.trim()
                .parse()
                .map_err(|_| LoomError::Config(format!("{key}={raw:?} is not a valid number")))
        }

        let apply_u64 = |key: &str, field: &mut u64| -> Result<(), LoomError> {
            if let Some(raw) = lookup(key) {
                *field = parse(key, &raw)?;
            }
            Ok(())
        };
        apply_u64("LOOM_IDLE_SLEEP_MS", &mut self.idle_sleep_ms)?;
        apply_u64("LOOM_HEARTBEAT_INTERVAL_MS", &mut self.heartbeat_interval_ms)?;
        apply_u64(
            "LOOM_WORKER_REPLACEMENT_TIMEOUT_MS",
            &mut self.worker_replacement_timeout_ms,
        )?;
        apply_u64("LOOM_MAX_TRANSITION_TIME_MS", &mut self.max_transition_time_ms)?;
        apply_u64("LOOM_JOIN_RETRY_INTERVAL_MS", &mut self.join_retry_interval_ms)?;
        apply_u64("LOOM_JOIN_RETRY_TIMEOUT_MS", &mut self.join_retry_timeout_ms)?;

        if let Some(raw) = lookup("LOOM_CONCURRENT_REQUEST_WORKERS") {
            self.concurrent_request_workers = parse("LOOM_CONCURRENT_REQUEST_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("LOOM_EXCEPTION_RETRY_AFTER_MS") {
            self.exception_policy = match raw.trim() {
                "" | "delete" => ExceptionPolicy::Delete,
                ms => ExceptionPolicy::RetryAfterMs(parse("LOOM_EXCEPTION_RETRY_AFTER_MS", ms)?),
            };
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, LoomError> {
        if self.concurrent_request_workers == 0 {
            return Err(LoomError::Config(
                "concurrent_request_workers must be at least 1".into(),
            ));
        }
        if self.join_retry_interval_ms > self.join_retry_timeout_ms {
            return Err(LoomError::Config(format!(
                "join_retry_interval_ms ({}) exceeds join_retry_timeout_ms ({})",
                self.join_retry_interval_ms, self.join_retry_timeout_ms
            )));
        }
        Ok(self)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn worker_replacement_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_replacement_timeout_ms)
    }

    pub fn max_transition_time(&self) -> Duration {
        Duration::from_millis(self.max_transition_time_ms)
    }

    pub fn join_retry(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.join_retry_interval_ms),
            Duration::from_millis(self.join_retry_timeout_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    #[test]
    fn empty_object_gives_defaults() {
        assert_eq!(Options::from_json_str("{}").unwrap(), Options::default());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let options = Options::from_json_str(
            r#"{"idle_sleep_ms": 5, "exception_policy": {"retry_after_ms": 250}}"#,
        )
        .unwrap();
        assert_eq!(options.idle_sleep(), Duration::from_millis(5));
        assert_eq!(options.exception_policy, ExceptionPolicy::RetryAfterMs(250));
        assert_eq!(options.concurrent_request_workers, 16);
    }

    #[test]
    fn exception_policy_accepts_plain_delete() {
        let options = Options::from_json_str(r#"{"exception_policy": "delete"}"#).unwrap();
        assert_eq!(options.exception_policy, ExceptionPolicy::Delete);
    }

    #[rstest]
    #[case::malformed("{")]
    #[case::zero_workers(r#"{"concurrent_request_workers": 0}"#)]
    #[case::retry_interval_too_long(r#"{"join_retry_interval_ms": 10, "join_retry_timeout_ms": 5}"#)]
    #[case::unknown_policy(r#"{"exception_policy": "explode"}"#)]
    fn invalid_options_are_config_errors(#[case] json: &str) {
        assert!(matches!(Options::from_json_str(json), Err(LoomError::Config(_))));
    }

    #[test]
    fn overrides_replace_fields() {
        let env: HashMap<&str, &str> = [
            ("LOOM_IDLE_SLEEP_MS", "20"),
            ("LOOM_CONCURRENT_REQUEST_WORKERS", "3"),
            ("LOOM_EXCEPTION_RETRY_AFTER_MS", "1000"),
        ]
        .into_iter()
        .collect();
        let options = Options::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(options.idle_sleep_ms, 20);
        assert_eq!(options.concurrent_request_workers, 3);
        assert_eq!(options.exception_policy, ExceptionPolicy::RetryAfterMs(1000));
        assert_eq!(options.heartbeat_interval_ms, 60_000);
    }

    #[test]
    fn non_numeric_override_is_rejected() {
        let err = Options::default()
            .with_overrides(|k| (k == "LOOM_IDLE_SLEEP_MS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("LOOM_IDLE_SLEEP_MS"));
    }

    #[test]
    fn join_retry_uses_fixed_backoff() {
        let policy = Options::default().join_retry();
        assert_eq!(policy.next_delay(1), Duration::from_millis(50));
        assert_eq!(policy.next_delay(5), Duration::from_millis(50));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }
}
