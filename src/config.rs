use crate::error::{Result, SimulationError};
use crate::ranking::TieBreak;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 120;

/// Operational settings of the simulation core.
///
/// Every section has defaults, so an empty JSON object is a valid configuration.
/// The accounting rules themselves (tax rate, cost-of-goods clamp) are fixed and live in
/// [`crate::calculator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub generation: GenerationSettings,
    pub prompt: PromptLimits,
    pub fallback: FallbackSettings,
    pub ranking: RankingSettings,
    /// Cash endowment of the synthetic stage-0 snapshot.
    pub initial_cash: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            generation: GenerationSettings::default(),
            prompt: PromptLimits::default(),
            fallback: FallbackSettings::default(),
            ranking: RankingSettings::default(),
            initial_cash: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// Fixed wait before the single rate-limit retry.
    pub rate_limit_wait_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.2,
            request_timeout_secs: 180,
            rate_limit_wait_secs: DEFAULT_RATE_LIMIT_WAIT_SECS,
        }
    }
}

impl GenerationSettings {
    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.rate_limit_wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    /// Character ceiling applied to business-plan text before prompting.
    pub business_text_char_limit: usize,
    /// Only the first K question/answer pairs are forwarded.
    pub max_answers: usize,
    /// Character ceiling of each answer.
    pub answer_char_limit: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            business_text_char_limit: 4000,
            max_answers: 10,
            answer_char_limit: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Flat revenue figure each team receives when the distribution cannot be parsed.
    pub baseline_revenue: i64,
    /// Maximum relative deviation from the baseline (0.05 = ±5%).
    pub revenue_spread: f64,
    /// Cost-of-goods percentage used by the fallback estimate.
    pub cogs_rate: i64,
    /// Number of follow-up questions per stage.
    pub question_count: usize,
    /// Character ceiling of the digest taken from raw business text.
    pub digest_char_limit: usize,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            baseline_revenue: 10_000_000,
            revenue_spread: 0.05,
            cogs_rate: 30,
            question_count: 10,
            digest_char_limit: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub tie_break: TieBreak,
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimulationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_cash < 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "initial_cash must be non-negative, got {}",
                self.initial_cash
            )));
        }
        if self.fallback.baseline_revenue <= 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "fallback.baseline_revenue must be positive, got {}",
                self.fallback.baseline_revenue
            )));
        }
        if !(0.0..=0.5).contains(&self.fallback.revenue_spread) {
            return Err(SimulationError::InvalidConfig(format!(
                "fallback.revenue_spread {} must be between 0.0 and 0.5",
                self.fallback.revenue_spread
            )));
        }
        if !(10..=80).contains(&self.fallback.cogs_rate) {
            return Err(SimulationError::InvalidConfig(format!(
                "fallback.cogs_rate {} must be between 10 and 80",
                self.fallback.cogs_rate
            )));
        }
        if self.fallback.question_count == 0 {
            return Err(SimulationError::InvalidConfig(
                "fallback.question_count must be at least 1".to_string(),
            ));
        }
        if self.prompt.business_text_char_limit == 0 {
            return Err(SimulationError::InvalidConfig(
                "prompt.business_text_char_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
