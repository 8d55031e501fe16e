//! Environment-driven configuration for the session orchestrator.

use crate::media::StreamConstraints;
use eloquence_core::agent::{AgentKind, Phase};
use std::collections::HashMap;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Statically configured direct agent identifiers, keyed by classification
/// and phase. Used whenever issuance answers `directUse` or fails outright.
#[derive(Debug, Clone, Default)]
pub struct DirectAgentTable {
    entries: HashMap<(AgentKind, Phase), String>,
}

const DIRECT_AGENT_VARS: &[(AgentKind, Phase, &str)] = &[
    (AgentKind::Press, Phase::Conversation, "ELOQUENCE_PRESS_AGENT_ID"),
    (AgentKind::Assembly, Phase::Conversation, "ELOQUENCE_ASSEMBLY_AGENT_ID"),
    (AgentKind::Investors, Phase::Conversation, "ELOQUENCE_INVESTORS_AGENT_ID"),
    (
        AgentKind::Statement,
        Phase::Declaration,
        "ELOQUENCE_STATEMENT_DECLARATION_AGENT_ID",
    ),
    (
        AgentKind::Statement,
        Phase::Questions,
        "ELOQUENCE_STATEMENT_QUESTIONS_AGENT_ID",
    ),
];

impl DirectAgentTable {
    pub fn insert(&mut self, kind: AgentKind, phase: Phase, agent_id: impl Into<String>) {
        self.entries.insert((kind, phase), agent_id.into());
    }

    pub fn resolve(&self, kind: AgentKind, phase: Phase) -> Option<&str> {
        self.entries.get(&(kind, phase)).map(String::as_str)
    }

    fn from_env() -> Self {
        let mut table = Self::default();
        for (kind, phase, var) in DIRECT_AGENT_VARS {
            if let Ok(agent_id) = std::env::var(var) {
                table.insert(*kind, *phase, agent_id);
            }
        }
        table
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_base: String,
    pub convai_ws_base: String,
    pub direct_agents: DirectAgentTable,
    pub log_level: Level,
    pub constraints: StreamConstraints,
}

const DEFAULT_CONVAI_WS_BASE: &str = "wss://api.elevenlabs.io/v1/convai/conversation";

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base = std::env::var("ELOQUENCE_API_BASE")
            .map_err(|_| ConfigError::MissingVar("ELOQUENCE_API_BASE".to_string()))?;

        let convai_ws_base = std::env::var("ELOQUENCE_CONVAI_WS_URL")
            .unwrap_or_else(|_| DEFAULT_CONVAI_WS_BASE.to_string());

        let direct_agents = DirectAgentTable::from_env();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let mut constraints = StreamConstraints::default();
        constraints.width = parse_var("ELOQUENCE_CAPTURE_WIDTH", constraints.width)?;
        constraints.height = parse_var("ELOQUENCE_CAPTURE_HEIGHT", constraints.height)?;
        constraints.frame_rate = parse_var("ELOQUENCE_CAPTURE_FPS", constraints.frame_rate)?;

        Ok(Self {
            api_base,
            convai_ws_base,
            direct_agents,
            log_level,
            constraints,
        })
    }
}

fn parse_var(var: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<u32>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("ELOQUENCE_API_BASE");
            env::remove_var("ELOQUENCE_CONVAI_WS_URL");
            env::remove_var("RUST_LOG");
            env::remove_var("ELOQUENCE_CAPTURE_WIDTH");
            env::remove_var("ELOQUENCE_CAPTURE_HEIGHT");
            env::remove_var("ELOQUENCE_CAPTURE_FPS");
            for (_, _, var) in DIRECT_AGENT_VARS {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("ELOQUENCE_API_BASE", "https://app.example/api");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.api_base, "https://app.example/api");
        assert_eq!(config.convai_ws_base, DEFAULT_CONVAI_WS_BASE);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.constraints, StreamConstraints::default());
        assert_eq!(
            config
                .direct_agents
                .resolve(AgentKind::Press, Phase::Conversation),
            None
        );
    }

    #[test]
    #[serial]
    fn test_config_missing_api_base() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "ELOQUENCE_API_BASE"),
            _ => panic!("Expected MissingVar for ELOQUENCE_API_BASE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("ELOQUENCE_API_BASE", "https://custom.example/api");
            env::set_var("ELOQUENCE_CONVAI_WS_URL", "wss://custom.example/convai");
            env::set_var("RUST_LOG", "debug");
            env::set_var("ELOQUENCE_CAPTURE_WIDTH", "640");
            env::set_var("ELOQUENCE_CAPTURE_HEIGHT", "480");
            env::set_var("ELOQUENCE_CAPTURE_FPS", "24");
            env::set_var("ELOQUENCE_PRESS_AGENT_ID", "agent_press_1");
            env::set_var("ELOQUENCE_STATEMENT_QUESTIONS_AGENT_ID", "agent_sq_1");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.convai_ws_base, "wss://custom.example/convai");
        assert_eq!(config.log_level, Level::DEBUG);
        assert_eq!(config.constraints.width, 640);
        assert_eq!(config.constraints.height, 480);
        assert_eq!(config.constraints.frame_rate, 24);
        assert_eq!(
            config
                .direct_agents
                .resolve(AgentKind::Press, Phase::Conversation),
            Some("agent_press_1")
        );
        assert_eq!(
            config
                .direct_agents
                .resolve(AgentKind::Statement, Phase::Questions),
            Some("agent_sq_1")
        );
        assert_eq!(
            config
                .direct_agents
                .resolve(AgentKind::Statement, Phase::Declaration),
            None
        );
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_capture_dimension() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("ELOQUENCE_CAPTURE_WIDTH", "wide");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "ELOQUENCE_CAPTURE_WIDTH"),
            _ => panic!("Expected InvalidValue for ELOQUENCE_CAPTURE_WIDTH"),
        }
    }

    #[test]
    fn direct_agent_table_resolves_by_kind_and_phase() {
        let mut table = DirectAgentTable::default();
        table.insert(AgentKind::Statement, Phase::Declaration, "agent_decl");
        table.insert(AgentKind::Statement, Phase::Questions, "agent_q");
        assert_eq!(
            table.resolve(AgentKind::Statement, Phase::Declaration),
            Some("agent_decl")
        );
        assert_eq!(
            table.resolve(AgentKind::Statement, Phase::Questions),
            Some("agent_q")
        );
        assert_eq!(table.resolve(AgentKind::Press, Phase::Conversation), None);
    }
}
