//! Environment / config surface (design notes §6).

/// Recognised environment/config keys, with the documented defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub default_action_timeout_s: u64,
    pub periodic_interval_s: u64,
    pub periodic_interval_max_s: u64,
    pub workers_per_engine: usize,
    pub lock_retention_s: u64,
    pub engine_life_check_timeout_s: u64,
    pub max_update_parallel: usize,
    pub listen_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_action_timeout_s: 3600,
            periodic_interval_s: 60,
            periodic_interval_max_s: 3600,
            workers_per_engine: 16,
            lock_retention_s: 600,
            engine_life_check_timeout_s: 10,
            max_update_parallel: 4,
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    /// Load from `ENGINE_*`-prefixed environment variables, falling back to
    /// [`Config::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_action_timeout_s: env_u64(
                "ENGINE_DEFAULT_ACTION_TIMEOUT",
                defaults.default_action_timeout_s,
            ),
            periodic_interval_s: env_u64(
                "ENGINE_PERIODIC_INTERVAL",
                defaults.periodic_interval_s,
            ),
            periodic_interval_max_s: env_u64(
                "ENGINE_PERIODIC_INTERVAL_MAX",
                defaults.periodic_interval_max_s,
            ),
            workers_per_engine: env_u64("ENGINE_WORKERS_PER_ENGINE", defaults.workers_per_engine as u64)
                as usize,
            lock_retention_s: env_u64("ENGINE_LOCK_RETENTION_S", defaults.lock_retention_s),
            engine_life_check_timeout_s: env_u64(
                "ENGINE_LIFE_CHECK_TIMEOUT",
                defaults.engine_life_check_timeout_s,
            ),
            max_update_parallel: env_u64(
                "ENGINE_MAX_UPDATE_PARALLEL",
                defaults.max_update_parallel as u64,
            ) as usize,
            listen_addr: std::env::var("ENGINE_LISTEN_ADDR")
                .unwrap_or(defaults.listen_addr),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.default_action_timeout_s, 3600);
        assert_eq!(cfg.workers_per_engine, 16);
        assert_eq!(cfg.lock_retention_s, 600);
    }
}
