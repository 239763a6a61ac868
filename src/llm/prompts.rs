// Prompt templates for every response shape the pipeline requests.
//
// Builders are pure: identical inputs always produce byte-identical prompts.

use crate::config::PromptLimits;
use crate::llm::types::{
    ExpenseClassificationPayload, GroupSummaryPayload, QuestionSetPayload,
    RevenueDistributionPayload,
};
use crate::llm::utils::truncate_chars;
use crate::schema::{ExpenseCategory, FinancialEstimate, GroupSummary, TeamId};
use schemars::JsonSchema;

const ROLE_FRAMING: &str = "You are the evaluation engine of a multi-stage startup competition. \
Teams submit business plans and answer follow-up questions every stage. You act as a seasoned \
venture analyst and CFO: conservative with numbers, concrete in wording, and you never invent \
facts the team did not provide.";

const OUTPUT_RULES: &str = "## OUTPUT RULES\n\
1. Return ONE JSON object and nothing else.\n\
2. Use exactly the field names of the example; every number is an integer (no decimals, no units, no separators).\n\
3. Do not wrap the JSON in commentary.";

/// Static context per stage number. Stages past the table reuse the last entry.
const STAGE_CONTEXTS: &[(&str, &str)] = &[
    (
        "Idea validation",
        "The team has a business idea and an initial plan. Judge problem/solution fit and how realistic the first costs are.",
    ),
    (
        "Prototype",
        "The team is building a first product version. Development spend dominates; revenue is small or experimental.",
    ),
    (
        "Market entry",
        "The team launches to first customers. Marketing and sales costs rise; early revenue appears.",
    ),
    (
        "Growth",
        "The team scales acquisition and operations. Unit economics and repeat revenue matter most.",
    ),
    (
        "Scale-up",
        "The team expands to new markets or products. Profitability, financing and asset base are scrutinized.",
    ),
];

const ESTIMATE_EXAMPLE: &str = r#"{
  "sgnaExpenses": 3500000,
  "rndExpenses": 1500000,
  "cogs": 2400000,
  "cogsRate": 30,
  "tangibleAssets": 8000000,
  "intangibleAssets": 2000000,
  "inventoryAssets": 500000,
  "accountsPayable": 1200000,
  "borrowings": 5000000,
  "nonOperatingIncome": 0,
  "fsScore": 62
}"#;

const REVENUE_EXAMPLE: &str = r#"{
  "distributionLogic": "Teams with validated demand and paying pilots received the largest share.",
  "teams": [
    {"teamCode": 3, "allocatedRevenue": 14000000, "reason": "Two paying pilot customers"},
    {"teamCode": 7, "allocatedRevenue": 9000000, "reason": "Strong waitlist, no sales yet"}
  ]
}"#;

const CLASSIFICATION_EXAMPLE: &str = r#"{
  "classifications": [
    {"sourceText": "Two backend developers", "category": "Labor", "monthlyAmount": 6000000},
    {"sourceText": "Shared office in Seongsu", "category": "Rent", "monthlyAmount": 1500000}
  ]
}"#;

const SUMMARY_EXAMPLE: &str = r#"{
  "businessType": "B2B SaaS for restaurant inventory",
  "technology": "Computer-vision stock counting",
  "revenueModel": "Monthly subscription per store",
  "strengths": ["Working prototype", "Founder ran restaurants for 8 years"],
  "weaknesses": ["No paying customers yet"],
  "digest": "Camera-based inventory tracking for small restaurants, sold as a subscription."
}"#;

const QUESTION_EXAMPLE: &str = r#"{
  "questions": [
    {"number": 1, "question": "How many pilot customers converted to paid plans?"},
    {"number": 2, "question": "What is your customer acquisition cost per store?"}
  ]
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    GroupSummary,
    ExpenseClassification,
    FinancialEstimate,
    RevenueDistribution,
    FollowUpQuestions,
}

impl PromptKind {
    /// Heading that opens the task section of the prompt.
    pub fn title(&self) -> &'static str {
        match self {
            PromptKind::GroupSummary => "BUSINESS PROFILE SUMMARY",
            PromptKind::ExpenseClassification => "EXPENSE CLASSIFICATION",
            PromptKind::FinancialEstimate => "FINANCIAL ESTIMATION",
            PromptKind::RevenueDistribution => "REVENUE DISTRIBUTION",
            PromptKind::FollowUpQuestions => "FOLLOW-UP QUESTIONS",
        }
    }
}

/// What the revenue prompt knows about one competing team.
#[derive(Debug, Clone, Copy)]
pub struct TeamBrief<'a> {
    pub team_id: TeamId,
    pub summary: Option<&'a GroupSummary>,
    pub estimate: Option<&'a FinancialEstimate>,
}

pub struct PromptBuilder {
    limits: PromptLimits,
    question_count: usize,
}

impl PromptBuilder {
    pub fn new(limits: PromptLimits, question_count: usize) -> Self {
        Self {
            limits,
            question_count,
        }
    }

    /// Compresses raw business-plan text into a GroupSummary. The only prompt that
    /// sees the plan itself.
    pub fn group_summary(
        &self,
        stage: u32,
        business_text: &str,
        answers: &[(String, String)],
    ) -> String {
        let text = truncate_chars(business_text, self.limits.business_text_char_limit);
        let mut prompt = self.header(PromptKind::GroupSummary, stage);
        prompt.push_str("## BUSINESS PLAN\n");
        prompt.push_str(if text.trim().is_empty() {
            "(no business plan text was submitted)"
        } else {
            text
        });
        prompt.push_str("\n\n");
        prompt.push_str(&self.answers_section(answers));
        prompt.push_str(
            "## INSTRUCTIONS\n\
             Condense the plan into a profile later stages can rely on without the original text. \
             Keep strengths and weaknesses to at most three items each and the digest to at most five sentences.\n\n",
        );
        prompt.push_str(&output_section::<GroupSummaryPayload>(SUMMARY_EXAMPLE));
        prompt
    }

    pub fn expense_classification(
        &self,
        stage: u32,
        memory: &[GroupSummary],
        expense_lines: &[String],
        total_expense: i64,
    ) -> String {
        let mut prompt = self.header(PromptKind::ExpenseClassification, stage);
        prompt.push_str(&memory_section(memory));

        prompt.push_str("## CATEGORY OPTIONS\n");
        for category in ExpenseCategory::ALL {
            prompt.push_str(&format!(
                "- \"{}\": {}\n",
                category.label(),
                category.description()
            ));
        }
        prompt.push('\n');

        prompt.push_str("## EXPENSE LINES\n");
        for (idx, line) in expense_lines.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", idx + 1, line.trim()));
        }
        prompt.push_str(&format!(
            "\nTotal monthly expense reported by the team: {}\n\n",
            total_expense
        ));

        prompt.push_str(&format!(
            "## INSTRUCTIONS\n\
             Return exactly {} classifications, one per expense line, in the same order. \
             Copy each line into `sourceText`, pick exactly one category label from the options, \
             and split the total so the `monthlyAmount` values add up to exactly {}.\n\n",
            expense_lines.len(),
            total_expense
        ));
        prompt.push_str(&output_section::<ExpenseClassificationPayload>(
            CLASSIFICATION_EXAMPLE,
        ));
        prompt
    }

    pub fn financial_estimate(
        &self,
        stage: u32,
        memory: &[GroupSummary],
        answers: &[(String, String)],
        total_expense: i64,
    ) -> String {
        let mut prompt = self.header(PromptKind::FinancialEstimate, stage);
        prompt.push_str(&memory_section(memory));
        prompt.push_str(&self.answers_section(answers));
        prompt.push_str(&format!(
            "## INSTRUCTIONS\n\
             Estimate this team's financial position at the end of the stage. \
             Its reported monthly expense is {}; `sgnaExpenses` + `rndExpenses` should be close to it. \
             `cogsRate` is cost of goods as a percentage of revenue, between 10 and 80. \
             `fsScore` rates overall financial soundness from 0 to 100.\n\n",
            total_expense
        ));
        prompt.push_str(&output_section::<FinancialEstimate>(ESTIMATE_EXAMPLE));
        prompt
    }

    pub fn revenue_distribution(&self, stage: u32, teams: &[TeamBrief<'_>]) -> String {
        let mut prompt = self.header(PromptKind::RevenueDistribution, stage);
        prompt.push_str("## COMPETING TEAMS\n");
        for team in teams {
            prompt.push_str(&format!("### Team code {}\n", team.team_id));
            match team.summary {
                Some(summary) => prompt.push_str(&summary_lines(summary)),
                None => prompt.push_str("- (no profile available)\n"),
            }
            if let Some(estimate) = team.estimate {
                prompt.push_str(&format!(
                    "- Monthly SG&A {} / R&D {} / cost-of-goods rate {}%\n",
                    estimate.sgna_expenses, estimate.rnd_expenses, estimate.cogs_rate
                ));
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            "## INSTRUCTIONS\n\
             The market can absorb a limited amount of revenue this stage. Allocate revenue to all {} teams \
             according to how convincing their product, market and execution are. \
             Return exactly one entry per team code listed above, each with a positive integer `allocatedRevenue`.\n\n",
            teams.len()
        ));
        prompt.push_str(&output_section::<RevenueDistributionPayload>(
            REVENUE_EXAMPLE,
        ));
        prompt
    }

    pub fn follow_up_questions(
        &self,
        stage: u32,
        memory: &[GroupSummary],
        answers: &[(String, String)],
    ) -> String {
        let mut prompt = self.header(PromptKind::FollowUpQuestions, stage);
        prompt.push_str(&memory_section(memory));
        prompt.push_str(&self.answers_section(answers));
        let (next_name, _) = stage_context(stage.saturating_add(1));
        prompt.push_str(&format!(
            "## INSTRUCTIONS\n\
             Write exactly {} questions the team must answer before the next stage ({}). \
             Number them 1 to {}. Each question must be specific to this team and answerable in a paragraph.\n\n",
            self.question_count, next_name, self.question_count
        ));
        prompt.push_str(&output_section::<QuestionSetPayload>(QUESTION_EXAMPLE));
        prompt
    }

    fn header(&self, kind: PromptKind, stage: u32) -> String {
        let (name, description) = stage_context(stage);
        format!(
            "{}\n\n## STAGE {}: {}\n{}\n\n## TASK: {}\n\n",
            ROLE_FRAMING,
            stage,
            name,
            description,
            kind.title()
        )
    }

    fn answers_section(&self, answers: &[(String, String)]) -> String {
        let mut section = String::from("## PRIOR ANSWERS\n");
        if answers.is_empty() {
            section.push_str("(none)\n\n");
            return section;
        }
        for (idx, (question, answer)) in answers.iter().take(self.limits.max_answers).enumerate() {
            section.push_str(&format!(
                "Q{}. {}\nA{}. {}\n",
                idx + 1,
                question.trim(),
                idx + 1,
                truncate_chars(answer.trim(), self.limits.answer_char_limit)
            ));
        }
        section.push('\n');
        section
    }
}

pub fn stage_context(stage: u32) -> (&'static str, &'static str) {
    let idx = (stage.max(1) as usize - 1).min(STAGE_CONTEXTS.len() - 1);
    STAGE_CONTEXTS[idx]
}

fn memory_section(memory: &[GroupSummary]) -> String {
    let mut section = String::from("## TEAM PROFILE\n");
    if memory.is_empty() {
        section.push_str("(no profile recorded yet)\n\n");
        return section;
    }
    for summary in memory {
        section.push_str(&format!("### As of stage {}\n", summary.key.stage));
        section.push_str(&summary_lines(summary));
    }
    section.push('\n');
    section
}

fn summary_lines(summary: &GroupSummary) -> String {
    let mut lines = format!(
        "- Business: {}\n- Technology: {}\n- Revenue model: {}\n",
        summary.business_type, summary.technology, summary.revenue_model
    );
    if !summary.strengths.is_empty() {
        lines.push_str(&format!("- Strengths: {}\n", summary.strengths.join("; ")));
    }
    if !summary.weaknesses.is_empty() {
        lines.push_str(&format!("- Weaknesses: {}\n", summary.weaknesses.join("; ")));
    }
    lines.push_str(&format!("- Digest: {}\n", summary.digest));
    lines
}

fn output_section<T: JsonSchema>(example: &str) -> String {
    let schema = serde_json::to_string_pretty(&schemars::schema_for!(T)).unwrap_or_default();
    format!(
        "{}\n\n## OUTPUT EXAMPLE\n{}\n\n## OUTPUT SCHEMA\n{}\n",
        OUTPUT_RULES, example, schema
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StageKey;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(PromptLimits::default(), 10)
    }

    fn answers(n: usize) -> Vec<(String, String)> {
        (1..=n)
            .map(|i| (format!("Question {}", i), format!("Answer {}", i)))
            .collect()
    }

    fn summary(stage: u32) -> GroupSummary {
        GroupSummary {
            key: StageKey::new(1, 4, stage),
            business_type: "Pet food subscription".to_string(),
            technology: "Diet recommendation model".to_string(),
            revenue_model: "Subscription".to_string(),
            strengths: vec!["Vet partnerships".to_string()],
            weaknesses: vec![],
            digest: "Personalized pet food delivered monthly.".to_string(),
            from_fallback: false,
        }
    }

    #[test]
    fn test_prompts_are_deterministic() {
        let b = builder();
        let a1 = b.group_summary(2, "We sell pet food.", &answers(3));
        let a2 = b.group_summary(2, "We sell pet food.", &answers(3));
        assert_eq!(a1, a2);

        let memory = vec![summary(1)];
        let lines = vec!["Rent".to_string(), "Salaries".to_string()];
        assert_eq!(
            b.expense_classification(2, &memory, &lines, 1000),
            b.expense_classification(2, &memory, &lines, 1000)
        );
    }

    #[test]
    fn test_follow_up_prompt_for_last_possible_stage() {
        let prompt = builder().follow_up_questions(u32::MAX, &[], &[]);
        assert!(prompt.contains("next stage (Scale-up)"));
    }

    #[test]
    fn test_stage_context_lookup() {
        let b = builder();
        assert!(b.group_summary(1, "x", &[]).contains("Idea validation"));
        assert!(b.group_summary(3, "x", &[]).contains("Market entry"));
        assert!(b.group_summary(42, "x", &[]).contains("Scale-up"));
        assert_eq!(stage_context(0).0, "Idea validation");
    }

    #[test]
    fn test_only_first_answers_are_forwarded() {
        let b = builder();
        let prompt = b.group_summary(1, "plan", &answers(15));
        assert!(prompt.contains("Question 10"));
        assert!(!prompt.contains("Question 11"));
    }

    #[test]
    fn test_business_text_is_capped() {
        let limits = PromptLimits {
            business_text_char_limit: 5,
            ..PromptLimits::default()
        };
        let b = PromptBuilder::new(limits, 10);
        let prompt = b.group_summary(1, "ABCDEFGHIJ", &[]);
        assert!(prompt.contains("ABCDE"));
        assert!(!prompt.contains("ABCDEF"));
    }

    #[test]
    fn test_classification_lists_every_category() {
        let prompt = builder().expense_classification(1, &[], &["Ads".to_string()], 10);
        for category in ExpenseCategory::ALL {
            assert!(prompt.contains(&format!("\"{}\"", category.label())));
        }
        assert!(prompt.contains(PromptKind::ExpenseClassification.title()));
        assert!(prompt.contains("\"monthlyAmount\""));
    }

    #[test]
    fn test_later_prompts_use_memory_not_plan_text() {
        let memory = vec![summary(1)];
        let prompt = builder().financial_estimate(2, &memory, &[], 5000);
        assert!(prompt.contains("Personalized pet food delivered monthly."));
        assert!(!prompt.contains("## BUSINESS PLAN"));
        assert!(prompt.contains("\"cogsRate\""));
    }

    #[test]
    fn test_revenue_prompt_lists_team_codes() {
        let s = summary(2);
        let teams = vec![
            TeamBrief {
                team_id: 11,
                summary: Some(&s),
                estimate: None,
            },
            TeamBrief {
                team_id: 12,
                summary: None,
                estimate: None,
            },
        ];
        let prompt = builder().revenue_distribution(2, &teams);
        assert!(prompt.contains("Team code 11"));
        assert!(prompt.contains("Team code 12"));
        assert!(prompt.contains("all 2 teams"));
    }
}
