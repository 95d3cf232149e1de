//! Process-wide environment configuration. Read once at startup
//! into one flat struct with typed defaults — the small, fixed set of
//! variables here doesn't warrant a layered-sources configuration crate;
//! see DESIGN.md for that decision.

use std::time::Duration;

use cdp_core::backpressure::BackpressureThresholds;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub log_level: String,
    pub parse_buffer_size: Option<u64>,
    pub queue_drain_grace_period: Duration,
    pub input_drain_timeout: Duration,
    pub health_check_interval: Duration,
    pub metrics_port: u16,
    pub metrics_path: String,
    pub metrics_name_prefix: String,
    pub backpressure_interval: Duration,
    pub backpressure_thresholds: BackpressureThresholds,
    pub dead_letter_target: Option<String>,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            parse_buffer_size: env_opt_parse("PARSE_BUFFER_SIZE"),
            queue_drain_grace_period: Duration::from_secs_f64(env_parse(
                "QUEUE_DRAIN_GRACE_PERIOD",
                0.1,
            )),
            input_drain_timeout: Duration::from_secs_f64(env_parse("INPUT_DRAIN_TIMEOUT", 5.0)),
            health_check_interval: Duration::from_secs_f64(env_parse(
                "HEALTH_CHECK_INTERVAL",
                1.0,
            )),
            metrics_port: env_parse("METRICS_PORT", 9090),
            metrics_path: std::env::var("METRICS_PATH").unwrap_or_else(|_| "/metrics".to_string()),
            metrics_name_prefix: std::env::var("METRICS_NAME_PREFIX")
                .unwrap_or_else(|_| "cdp".to_string()),
            backpressure_interval: Duration::from_secs_f64(env_parse("BACKPRESSURE_INTERVAL", 1.0)),
            backpressure_thresholds: BackpressureThresholds {
                rss_bytes: env_opt_parse("BACKPRESSURE_RSS"),
                heap_total_bytes: env_opt_parse("BACKPRESSURE_HEAP_TOTAL"),
                heap_used_bytes: env_opt_parse("BACKPRESSURE_HEAP_USED"),
                queued_events: env_opt_parse("BACKPRESSURE_QUEUED_EVENTS"),
            },
            dead_letter_target: std::env::var("DEAD_LETTER_TARGET").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_with_no_environment_set() {
        // Doesn't touch process env (parallel test runs would race), just
        // checks the parse helpers fall back correctly on a missing var.
        assert_eq!(env_parse::<u16>("CDP_TEST_DOES_NOT_EXIST", 9090), 9090);
        assert_eq!(env_opt_parse::<u64>("CDP_TEST_DOES_NOT_EXIST"), None);
    }
}
