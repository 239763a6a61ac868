use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// What a single transport attempt returned: the text of every choice, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    pub choices: Vec<String>,
}

impl CompletionResponse {
    pub fn single(text: impl Into<String>) -> Self {
        Self {
            choices: vec![text.into()],
        }
    }
}

// --- Chat-completions wire format ---

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(text.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

// --- Response shapes the generation service is asked to emit ---

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevenueDistributionPayload {
    #[schemars(description = "One or two sentences explaining how revenue was distributed")]
    pub distribution_logic: String,

    #[schemars(description = "Exactly one entry per team listed in the request")]
    pub teams: Vec<TeamAllocationPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeamAllocationPayload {
    #[schemars(description = "The team code exactly as given in the request")]
    pub team_code: i64,

    #[schemars(description = "Allocated revenue for this stage, a positive integer")]
    pub allocated_revenue: i64,

    #[schemars(description = "Short justification for the allocation")]
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExpenseClassificationPayload {
    #[schemars(description = "One entry per expense line, in the order given")]
    pub classifications: Vec<ClassifiedExpensePayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedExpensePayload {
    #[schemars(description = "The expense line text exactly as given")]
    pub source_text: String,

    #[schemars(description = "One of the listed category labels")]
    pub category: String,

    #[schemars(description = "Monthly amount as a non-negative integer")]
    pub monthly_amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummaryPayload {
    #[schemars(description = "Industry / business type in a few words")]
    pub business_type: String,

    #[schemars(description = "Core technology or know-how")]
    #[serde(default)]
    pub technology: String,

    #[schemars(description = "How the business earns money")]
    #[serde(default)]
    pub revenue_model: String,

    #[serde(default)]
    pub strengths: Vec<String>,

    #[serde(default)]
    pub weaknesses: Vec<String>,

    #[schemars(description = "Compressed digest of the plan, at most five sentences")]
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuestionSetPayload {
    pub questions: Vec<QuestionPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuestionPayload {
    #[schemars(description = "1-based question number")]
    pub number: i64,
    pub question: String,
}
