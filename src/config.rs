//! Runtime configuration, read from the environment with `dotenvy` loading
//! a `.env` file first if present. Every field has the default named in
//! the external-interfaces configuration table.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub metrics_port: u16,
    pub redis_url: Option<String>,

    pub segment_gap: Duration,
    pub target_ttl: Duration,
    pub delta_ttl: Duration,
    pub formation_ttl: Duration,
    pub session_ttl: Duration,
    pub delta_max_per_target: usize,

    pub recognize_interval: Duration,
    pub min_interval: Duration,
    pub min_change_threshold: f64,
    pub sampling_step: Duration,
    pub persistence_threshold: f64,
    pub min_formation_duration: Duration,
    pub min_track_points: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics_port: 9090,
            redis_url: None,

            segment_gap: Duration::from_secs(120),
            target_ttl: Duration::from_secs(86_400),
            delta_ttl: Duration::from_secs(604_800),
            formation_ttl: Duration::from_secs(604_800),
            session_ttl: Duration::from_secs(3_600),
            delta_max_per_target: 10_000,

            recognize_interval: Duration::from_secs(5),
            min_interval: Duration::from_secs(5),
            min_change_threshold: 0.1,
            sampling_step: Duration::from_secs(10),
            persistence_threshold: 0.6,
            min_formation_duration: Duration::from_secs(30),
            min_track_points: 3,
        }
    }
}

impl Config {
    /// Loads a `.env` file (if present) then overlays every recognised
    /// environment variable on top of the defaults.
    pub fn from_env() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {}", err);
        }

        let mut config = Self::default();
        let mut env_secs = |key: &str, field: &mut Duration| {
            if let Some(v) = env_u64(key) {
                *field = Duration::from_secs(v);
            }
        };

        if let Ok(v) = std::env::var("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = env_u64("METRICS_PORT") {
            config.metrics_port = v as u16;
        }
        config.redis_url = std::env::var("REDIS_URL").ok();

        env_secs("SEGMENT_GAP", &mut config.segment_gap);
        env_secs("TARGET_TTL", &mut config.target_ttl);
        env_secs("DELTA_TTL", &mut config.delta_ttl);
        env_secs("FORMATION_TTL", &mut config.formation_ttl);
        env_secs("SESSION_TTL", &mut config.session_ttl);
        if let Some(v) = env_u64("DELTA_MAX_PER_TARGET") {
            config.delta_max_per_target = v as usize;
        }

        env_secs("RECOGNIZE_INTERVAL", &mut config.recognize_interval);
        env_secs("MIN_INTERVAL", &mut config.min_interval);
        if let Some(v) = env_f64("MIN_CHANGE_THRESHOLD") {
            config.min_change_threshold = v;
        }
        env_secs("SAMPLING_STEP", &mut config.sampling_step);
        if let Some(v) = env_f64("PERSISTENCE_THRESHOLD") {
            config.persistence_threshold = v;
        }
        env_secs("MIN_FORMATION_DURATION", &mut config.min_formation_duration);
        if let Some(v) = env_u64("MIN_TRACK_POINTS") {
            config.min_track_points = v as usize;
        }

        config
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults_match_configuration_table() {
        let config = Config::default();
        assert_eq!(config.segment_gap, Duration::from_secs(120));
        assert_eq!(config.target_ttl, Duration::from_secs(86_400));
        assert_eq!(config.delta_max_per_target, 10_000);
        assert_eq!(config.min_track_points, 3);
    }

    #[test]
    #[serial]
    fn env_override_is_applied() {
        unsafe {
            std::env::set_var("MIN_TRACK_POINTS", "7");
        }
        let config = Config::from_env();
        assert_eq!(config.min_track_points, 7);
        unsafe {
            std::env::remove_var("MIN_TRACK_POINTS");
        }
    }
}
