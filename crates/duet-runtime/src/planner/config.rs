//! Planner configuration.

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Planner identity and the defaults stamped onto the script node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct PlannerConfig {
    /// Version recorded in every planned graph's metadata
    #[cfg_attr(
        feature = "config",
        arg(long = "planner-version", env = "PLANNER_VERSION", default_value = "unknown")
    )]
    pub planner_version: String,

    /// Base URL of the script generation endpoint
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-endpoint", env = "LLM_ENDPOINT", default_value = "http://127.0.0.1:11434")
    )]
    pub llm_endpoint: String,

    /// Model used for script generation
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-model", env = "LLM_MODEL", default_value = "llama3")
    )]
    pub llm_model: String,

    /// Sampling temperature for script generation
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-temperature", env = "LLM_TEMPERATURE", default_value_t = 0.4)
    )]
    pub llm_temperature: f64,

    /// Default script tone
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-tone", env = "LLM_TONE", default_value = "casual")
    )]
    pub llm_tone: String,

    /// Default script persona
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-persona", env = "LLM_PERSONA", default_value = "default")
    )]
    pub llm_persona: String,

    /// Default narration length in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-length-secs", env = "LLM_LENGTH_SECS", default_value_t = 20)
    )]
    pub llm_length_secs: u32,

    /// Script generation timeout in milliseconds
    #[cfg_attr(
        feature = "config",
        arg(long = "llm-timeout-ms", env = "LLM_TIMEOUT_MS", default_value_t = 20_000)
    )]
    pub llm_timeout_ms: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            planner_version: "unknown".to_string(),
            llm_endpoint: "http://127.0.0.1:11434".to_string(),
            llm_model: "llama3".to_string(),
            llm_temperature: 0.4,
            llm_tone: "casual".to_string(),
            llm_persona: "default".to_string(),
            llm_length_secs: 20,
            llm_timeout_ms: 20_000,
        }
    }
}

impl PlannerConfig {
    /// Set the planner version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.planner_version = version.into();
        self
    }

    /// Set the script generation endpoint.
    pub fn with_llm_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.llm_endpoint = endpoint.into();
        self
    }

    /// Set the script generation model.
    pub fn with_llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.llm_endpoint.trim().is_empty() {
            return Err("LLM endpoint cannot be empty".to_string());
        }
        if self.llm_model.trim().is_empty() {
            return Err("LLM model cannot be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err("LLM temperature must be between 0 and 2".to_string());
        }
        if self.llm_timeout_ms == 0 {
            return Err("LLM timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Default parameters of the script node.
    pub(crate) fn script_params(&self) -> Map<String, Value> {
        let params = json!({
            "tone": self.llm_tone,
            "length": self.llm_length_secs,
            "persona": self.llm_persona,
            "model": self.llm_model,
            "temperature": self.llm_temperature,
            "endpoint": self.llm_endpoint,
            "timeoutMs": self.llm_timeout_ms,
        });
        match params {
            Value::Object(params) => params,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(PlannerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_endpoint() {
        let config = PlannerConfig::default().with_llm_endpoint(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn script_params_carry_llm_defaults() {
        let params = PlannerConfig::default().script_params();
        assert_eq!(params["model"], "llama3");
        assert_eq!(params["length"], 20);
        assert_eq!(params["timeoutMs"], 20_000);
    }
}
