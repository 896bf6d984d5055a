//! Gate policy configuration loaded from environment variables.
//!
//! All settings have defaults so the gate works with zero configuration.
//! These are tunable policy parameters, not invariants: deployments adjust
//! them per traffic profile.

/// Tunable windows and thresholds for the gating layer.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Trailing window within which an identical message is treated as a
    /// probable client retry and absorbed.
    /// Env: `PALAVER_DEDUP_WINDOW_SECS`
    /// Default: `5`
    pub dedup_window_secs: i64,

    /// Minutes of silence after which an `online` presence record is swept
    /// to `offline`.  Consumed by the external scheduler that drives
    /// `Database::sweep_idle`; the tracker itself has no timers.
    /// Env: `PALAVER_PRESENCE_IDLE_MINUTES`
    /// Default: `5`
    pub presence_idle_minutes: i64,

    /// Minimum spacing between messages from one sender (the message-burst
    /// cooldown claimed on every delivery).
    /// Env: `PALAVER_MESSAGE_COOLDOWN_SECS`
    /// Default: `2`
    pub message_cooldown_secs: i64,

    /// Minimum spacing between story posts per user.  The default works out
    /// to five posts per hour.  Consumed by the story-posting endpoint,
    /// which gates on it via [`crate::RequestGate`] and `set_cooldown`.
    /// Env: `PALAVER_STORY_COOLDOWN_SECS`
    /// Default: `720`
    pub story_cooldown_secs: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 5,
            presence_idle_minutes: 5,
            message_cooldown_secs: 2,
            story_cooldown_secs: 720,
        }
    }
}

impl PolicyConfig {
    /// Build the configuration from the environment, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dedup_window_secs: env_i64("PALAVER_DEDUP_WINDOW_SECS", defaults.dedup_window_secs),
            presence_idle_minutes: env_i64(
                "PALAVER_PRESENCE_IDLE_MINUTES",
                defaults.presence_idle_minutes,
            ),
            message_cooldown_secs: env_i64(
                "PALAVER_MESSAGE_COOLDOWN_SECS",
                defaults.message_cooldown_secs,
            ),
            story_cooldown_secs: env_i64("PALAVER_STORY_COOLDOWN_SECS", defaults.story_cooldown_secs),
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %value, "unparseable env override, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PolicyConfig::default();
        assert_eq!(config.dedup_window_secs, 5);
        assert_eq!(config.presence_idle_minutes, 5);
        assert_eq!(config.story_cooldown_secs, 720);
    }

    #[test]
    fn env_override_and_fallback() {
        std::env::set_var("PALAVER_DEDUP_WINDOW_SECS", "9");
        std::env::set_var("PALAVER_STORY_COOLDOWN_SECS", "not-a-number");

        let config = PolicyConfig::from_env();
        assert_eq!(config.dedup_window_secs, 9);
        assert_eq!(config.story_cooldown_secs, 720);

        std::env::remove_var("PALAVER_DEDUP_WINDOW_SECS");
        std::env::remove_var("PALAVER_STORY_COOLDOWN_SECS");
    }
}
