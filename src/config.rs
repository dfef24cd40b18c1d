use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    /// When set, delegation instructions are posted here instead of being
    /// kept in the local `instructions` table.
    pub instruction_sink_url: Option<String>,
    pub max_recurrence_occurrences: u32,
    pub default_duration_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "randevu.db".to_string(),
            instruction_sink_url: None,
            max_recurrence_occurrences: 366,
            default_duration_minutes: 30,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            instruction_sink_url: env::var("INSTRUCTION_SINK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            max_recurrence_occurrences: env::var("MAX_RECURRENCE_OCCURRENCES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_recurrence_occurrences),
            default_duration_minutes: env::var("DEFAULT_DURATION_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.default_duration_minutes),
        }
    }
}
