//! Deterministic substitutes for every response shape.
//!
//! Used whenever a generated response cannot be parsed or validated. Every method is
//! total: any well-formed input yields a record set of the same shape the parser would
//! have produced, and identical inputs yield identical output.

use crate::config::FallbackSettings;
use crate::llm::parser::RevenueDistribution;
use crate::llm::prompts::stage_context;
use crate::llm::types::GroupSummaryPayload;
use crate::llm::utils::truncate_chars;
use crate::ranking::AllocationDraft;
use crate::schema::{
    ClassifiedExpense, EventId, ExpenseCategory, FinancialEstimate, StageKey, TeamId,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Categories an unclassifiable total is split across.
pub const FALLBACK_CATEGORIES: [ExpenseCategory; 2] =
    [ExpenseCategory::Labor, ExpenseCategory::Other];

const GENERIC_QUESTIONS: &[&str] = &[
    "What measurable progress did you make since the last stage?",
    "Who exactly is your target customer, and how did you validate that?",
    "How will you acquire your next 100 customers, and at what cost?",
    "What is your pricing, and how did you arrive at it?",
    "Which competitors do customers compare you with, and why would they choose you?",
    "What are your three largest monthly costs, and how will they change?",
    "What is the biggest risk to your plan right now?",
    "Which key hires or partners do you need next?",
    "How long can you operate with your current cash?",
    "What milestone will you reach before the next stage?",
    "What did customers criticize most, and what did you change?",
    "How do you protect your technology or know-how?",
];

pub struct FallbackComputer {
    settings: FallbackSettings,
}

impl FallbackComputer {
    pub fn new(settings: FallbackSettings) -> Self {
        Self { settings }
    }

    /// Splits the total evenly across the two fallback categories; the odd unit goes
    /// to the second one so the sum stays exact.
    pub fn expense_classification(&self, total_expense: i64) -> Vec<ClassifiedExpense> {
        let first = total_expense / 2;
        let second = total_expense - first;
        FALLBACK_CATEGORIES
            .iter()
            .zip([first, second])
            .map(|(category, amount)| ClassifiedExpense {
                source_text: format!("Unclassified expenses ({})", category.label()),
                category: *category,
                monthly_amount: amount,
            })
            .collect()
    }

    pub fn financial_estimate(&self, total_expense: i64) -> FinancialEstimate {
        FinancialEstimate {
            sgna_expenses: total_expense.max(0),
            rnd_expenses: 0,
            cogs: 0,
            cogs_rate: self.settings.cogs_rate,
            tangible_assets: 0,
            intangible_assets: 0,
            inventory_assets: 0,
            accounts_payable: 0,
            borrowings: 0,
            non_operating_income: 0,
            fs_score: 50,
        }
    }

    /// Baseline revenue for every team, varied by a bounded, seeded spread.
    pub fn revenue_distribution(
        &self,
        event_id: EventId,
        stage: u32,
        team_ids: &[TeamId],
    ) -> RevenueDistribution {
        let spread = self.settings.revenue_spread;
        let baseline = self.settings.baseline_revenue as f64;

        let drafts = team_ids
            .iter()
            .map(|&team_id| {
                let variance = seeded_variance(event_id, stage, team_id, spread);
                let amount = (baseline * (1.0 + variance)).round().max(1.0) as i64;
                AllocationDraft {
                    key: StageKey::new(event_id, team_id, stage),
                    allocated_amount: amount,
                    rationale: "Baseline allocation (generated distribution unavailable)"
                        .to_string(),
                }
            })
            .collect();

        RevenueDistribution {
            logic: format!(
                "Baseline revenue of {} per team with up to ±{:.0}% variation",
                self.settings.baseline_revenue,
                spread * 100.0
            ),
            drafts,
        }
    }

    pub fn group_summary(&self, business_text: &str) -> GroupSummaryPayload {
        let trimmed = business_text.trim();
        let digest = if trimmed.is_empty() {
            "No business plan text was available.".to_string()
        } else {
            truncate_chars(trimmed, self.settings.digest_char_limit).to_string()
        };
        GroupSummaryPayload {
            business_type: "Unclassified".to_string(),
            technology: String::new(),
            revenue_model: String::new(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            digest,
        }
    }

    pub fn questions(&self, stage: u32) -> Vec<String> {
        let (next_stage, _) = stage_context(stage.saturating_add(1));
        (0..self.settings.question_count)
            .map(|i| {
                let base = GENERIC_QUESTIONS[i % GENERIC_QUESTIONS.len()];
                if i == 0 {
                    format!("[{}] {}", next_stage, base)
                } else {
                    base.to_string()
                }
            })
            .collect()
    }
}

/// Relative deviation in `[-spread, spread]`, stable for a given (event, stage, team).
fn seeded_variance(event_id: EventId, stage: u32, team_id: TeamId, spread: f64) -> f64 {
    if spread <= 0.0 {
        return 0.0;
    }
    let seed = (event_id as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add((stage as u64).wrapping_mul(0xBF58_476D_1CE4_E5B9))
        .wrapping_add((team_id as u64).wrapping_mul(0x94D0_49BB_1331_11EB));
    let mut rng = StdRng::seed_from_u64(seed);
    match Normal::new(0.0, spread / 2.0) {
        Ok(normal) => normal.sample(&mut rng).clamp(-spread, spread),
        Err(_) => 0.0,
    }
}
