use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type EventId = i64;
pub type TeamId = i64;

/// Identifies one unit of simulated progress: a team's state in one stage of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageKey {
    pub event_id: EventId,
    pub team_id: TeamId,
    pub stage: u32,
}

impl StageKey {
    pub fn new(event_id: EventId, team_id: TeamId, stage: u32) -> Self {
        Self {
            event_id,
            team_id,
            stage,
        }
    }

    /// Key of the same team in the preceding stage, if there is one.
    pub fn previous(&self) -> Option<StageKey> {
        if self.stage <= 1 {
            None
        } else {
            Some(StageKey::new(self.event_id, self.team_id, self.stage - 1))
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event {} / team {} / stage {}",
            self.event_id, self.team_id, self.stage
        )
    }
}

/// Complete per-stage financial statements of one team.
///
/// Balance identities hold by construction (see [`crate::calculator::FinancialCalculator`]):
/// - `total_assets == cash + tangible_assets + intangible_assets + inventory_assets`
/// - `total_assets == total_liabilities_and_equity`
/// - `net_income == taxable_income - tax`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialSnapshot {
    pub key: StageKey,

    // Assets
    pub cash: i64,
    pub tangible_assets: i64,
    pub intangible_assets: i64,
    pub inventory_assets: i64,
    pub total_assets: i64,

    // Liabilities & equity
    pub accounts_payable: i64,
    pub borrowings: i64,
    pub total_liabilities: i64,
    pub capital_stock: i64,
    pub total_liabilities_and_equity: i64,

    // Income statement
    pub revenue: i64,
    pub cost_of_goods: i64,
    pub gross_profit: i64,
    pub sgna_expense: i64,
    pub rnd_expense: i64,
    pub operating_income: i64,
    pub non_operating_income: i64,
    pub taxable_income: i64,
    pub tax: i64,
    pub net_income: i64,

    /// Bounded 0..=100 blend of profit margin and return on assets.
    pub health_score: u8,
}

/// Closed set of expense categories a classification may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpenseCategory {
    Labor,
    Rent,
    Marketing,
    #[serde(rename = "R&D")]
    ResearchAndDevelopment,
    Materials,
    Outsourcing,
    Utilities,
    Other,
}

/// Income-statement line an expense category rolls up into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingLine {
    SellingGeneralAdministrative,
    ResearchAndDevelopment,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 8] = [
        ExpenseCategory::Labor,
        ExpenseCategory::Rent,
        ExpenseCategory::Marketing,
        ExpenseCategory::ResearchAndDevelopment,
        ExpenseCategory::Materials,
        ExpenseCategory::Outsourcing,
        ExpenseCategory::Utilities,
        ExpenseCategory::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ExpenseCategory::Labor => "Labor",
            ExpenseCategory::Rent => "Rent",
            ExpenseCategory::Marketing => "Marketing",
            ExpenseCategory::ResearchAndDevelopment => "R&D",
            ExpenseCategory::Materials => "Materials",
            ExpenseCategory::Outsourcing => "Outsourcing",
            ExpenseCategory::Utilities => "Utilities",
            ExpenseCategory::Other => "Other",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExpenseCategory::Labor => "salaries, wages, contractor fees for staff",
            ExpenseCategory::Rent => "office, lab or store rent and leases",
            ExpenseCategory::Marketing => "advertising, promotion, events",
            ExpenseCategory::ResearchAndDevelopment => "prototyping, experiments, product R&D",
            ExpenseCategory::Materials => "raw materials, parts, consumables",
            ExpenseCategory::Outsourcing => "external development or service vendors",
            ExpenseCategory::Utilities => "power, internet, cloud hosting, telecom",
            ExpenseCategory::Other => "anything that fits no other category",
        }
    }

    /// Case-insensitive lookup by label. Unknown labels coerce to `Other`.
    pub fn from_label(label: &str) -> ExpenseCategory {
        let needle = label.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(needle))
            .unwrap_or(ExpenseCategory::Other)
    }

    pub fn operating_line(&self) -> OperatingLine {
        match self {
            ExpenseCategory::ResearchAndDevelopment => OperatingLine::ResearchAndDevelopment,
            _ => OperatingLine::SellingGeneralAdministrative,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedExpense {
    pub source_text: String,
    pub category: ExpenseCategory,
    pub monthly_amount: i64,
}

/// The classified expense lines of one StageKey. Amounts sum to `total_expense`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseClassification {
    pub key: StageKey,
    pub total_expense: i64,
    pub items: Vec<ClassifiedExpense>,
    pub from_fallback: bool,
}

impl ExpenseClassification {
    pub fn sum(&self) -> i64 {
        self.items.iter().map(|i| i.monthly_amount).sum()
    }

    pub fn sum_for(&self, line: OperatingLine) -> i64 {
        self.items
            .iter()
            .filter(|i| i.category.operating_line() == line)
            .map(|i| i.monthly_amount)
            .sum()
    }
}

/// Structured estimation inputs produced by the generation service.
/// Serialized in the exact flat camelCase integer form the service is asked to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinancialEstimate {
    #[schemars(description = "Monthly selling, general and administrative expenses")]
    pub sgna_expenses: i64,

    #[schemars(description = "Monthly research and development expenses")]
    pub rnd_expenses: i64,

    #[schemars(description = "Estimated monthly cost of goods sold")]
    pub cogs: i64,

    #[schemars(description = "Cost of goods as an integer percentage of revenue (10-80)")]
    pub cogs_rate: i64,

    #[schemars(description = "Tangible assets: equipment, machinery, facilities")]
    pub tangible_assets: i64,

    #[schemars(description = "Intangible assets: patents, software, brand")]
    pub intangible_assets: i64,

    #[schemars(description = "Inventory held at the end of the stage")]
    pub inventory_assets: i64,

    #[schemars(description = "Accounts payable")]
    pub accounts_payable: i64,

    #[schemars(description = "Outstanding loans and borrowings")]
    pub borrowings: i64,

    #[schemars(description = "Non-operating income (may be negative)")]
    pub non_operating_income: i64,

    #[schemars(description = "Overall financial soundness score from 0 to 100")]
    pub fs_score: i64,
}

/// A stored FinancialEstimate tied to its StageKey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub key: StageKey,
    pub estimate: FinancialEstimate,
    pub from_fallback: bool,
}

/// Opaque batch identifier shared by all teams ranked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DistributionGroup(pub Uuid);

impl DistributionGroup {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DistributionGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DistributionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueAllocation {
    pub key: StageKey,
    pub group: DistributionGroup,
    pub allocated_amount: i64,
    /// 1-based position after sorting the group by amount, descending.
    pub rank: u32,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

/// Compressed semantic profile of a team's plan; the only thing later prompts see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: StageKey,
    pub business_type: String,
    pub technology: String,
    pub revenue_model: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub digest: String,
    pub from_fallback: bool,
}

/// Follow-up questions put to a team for the stage after `key.stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    pub key: StageKey,
    pub questions: Vec<String>,
    pub from_fallback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_coercion() {
        assert_eq!(ExpenseCategory::from_label("labor"), ExpenseCategory::Labor);
        assert_eq!(
            ExpenseCategory::from_label(" r&d "),
            ExpenseCategory::ResearchAndDevelopment
        );
        assert_eq!(
            ExpenseCategory::from_label("Catering"),
            ExpenseCategory::Other
        );
    }

    #[test]
    fn test_previous_key() {
        assert_eq!(StageKey::new(1, 2, 1).previous(), None);
        assert_eq!(
            StageKey::new(1, 2, 3).previous(),
            Some(StageKey::new(1, 2, 2))
        );
    }

    #[test]
    fn test_estimate_wire_names() {
        let json = r#"{"sgnaExpenses":1,"rndExpenses":2,"cogs":3,"cogsRate":30,
            "tangibleAssets":4,"intangibleAssets":5,"inventoryAssets":6,
            "accountsPayable":7,"borrowings":8,"nonOperatingIncome":-9,"fsScore":70,
            "extra":"ignored"}"#;
        let estimate: FinancialEstimate = serde_json::from_str(json).unwrap();
        assert_eq!(estimate.cogs_rate, 30);
        assert_eq!(estimate.non_operating_income, -9);
    }

    #[test]
    fn test_classification_rollup() {
        let classification = ExpenseClassification {
            key: StageKey::new(1, 1, 1),
            total_expense: 600,
            items: vec![
                ClassifiedExpense {
                    source_text: "Engineers".to_string(),
                    category: ExpenseCategory::Labor,
                    monthly_amount: 300,
                },
                ClassifiedExpense {
                    source_text: "Prototype parts".to_string(),
                    category: ExpenseCategory::ResearchAndDevelopment,
                    monthly_amount: 200,
                },
                ClassifiedExpense {
                    source_text: "Ads".to_string(),
                    category: ExpenseCategory::Marketing,
                    monthly_amount: 100,
                },
            ],
            from_fallback: false,
        };
        assert_eq!(classification.sum(), 600);
        assert_eq!(
            classification.sum_for(OperatingLine::SellingGeneralAdministrative),
            400
        );
        assert_eq!(
            classification.sum_for(OperatingLine::ResearchAndDevelopment),
            200
        );
    }
}
