//! Turns free-text generation output into validated records.
//!
//! Every shape goes through the same three steps: extract the embedded JSON object,
//! decode it against the shape's wire type, then run the shape's own cardinality and
//! range checks. Out-of-set categories are coerced; out-of-bounds numbers are not.

use crate::error::{ParseError, ParseErrorKind, ResponseError, ValidationError};
use crate::llm::types::{
    ExpenseClassificationPayload, GroupSummaryPayload, QuestionSetPayload,
    RevenueDistributionPayload,
};
use crate::llm::utils::extract_json_object;
use crate::ranking::AllocationDraft;
use crate::schema::{
    ClassifiedExpense, EventId, ExpenseCategory, FinancialEstimate, StageKey, TeamId,
};
use serde::de::DeserializeOwned;
use std::collections::HashSet;

/// Upper bound for any money figure the service may return.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// A data shape the service can be asked for.
pub trait ResponseShape {
    /// Wire form decoded from the JSON span.
    type Payload: DeserializeOwned;
    /// Validated records handed to the pipeline.
    type Output;

    fn validate(&self, payload: Self::Payload) -> Result<Self::Output, ResponseError>;
}

pub fn parse<S: ResponseShape>(raw: &str, shape: &S) -> Result<S::Output, ResponseError> {
    let span = extract_json_object(raw)
        .ok_or_else(|| ParseError::no_json(format!("no JSON object in {} chars", raw.len())))?;
    let payload: S::Payload = serde_json::from_str(span)
        .map_err(|e| ParseError::new(ParseErrorKind::Malformed, e.to_string()))?;
    shape.validate(payload)
}

fn check_range(field: &str, value: i64, min: i64, max: i64) -> Result<(), ParseError> {
    if value < min || value > max {
        Err(ParseError::out_of_range(field, value, min, max))
    } else {
        Ok(())
    }
}

/// Flat integer estimate object.
pub struct EstimateShape;

impl ResponseShape for EstimateShape {
    type Payload = FinancialEstimate;
    type Output = FinancialEstimate;

    fn validate(&self, payload: FinancialEstimate) -> Result<FinancialEstimate, ResponseError> {
        let money = [
            ("sgnaExpenses", payload.sgna_expenses),
            ("rndExpenses", payload.rnd_expenses),
            ("cogs", payload.cogs),
            ("tangibleAssets", payload.tangible_assets),
            ("intangibleAssets", payload.intangible_assets),
            ("inventoryAssets", payload.inventory_assets),
            ("accountsPayable", payload.accounts_payable),
            ("borrowings", payload.borrowings),
        ];
        for (field, value) in money {
            check_range(field, value, 0, MAX_AMOUNT)?;
        }
        check_range(
            "nonOperatingIncome",
            payload.non_operating_income,
            -MAX_AMOUNT,
            MAX_AMOUNT,
        )?;
        check_range("cogsRate", payload.cogs_rate, 0, 100)?;
        check_range("fsScore", payload.fs_score, 0, 100)?;
        Ok(payload)
    }
}

/// Expense lines mapped onto the closed category set, summing to the reported total.
pub struct ExpenseShape<'a> {
    pub expense_lines: &'a [String],
    pub total_expense: i64,
}

impl ResponseShape for ExpenseShape<'_> {
    type Payload = ExpenseClassificationPayload;
    type Output = Vec<ClassifiedExpense>;

    fn validate(
        &self,
        payload: ExpenseClassificationPayload,
    ) -> Result<Vec<ClassifiedExpense>, ResponseError> {
        let expected = self.expense_lines.len();
        if payload.classifications.len() != expected {
            return Err(
                ParseError::cardinality(expected, payload.classifications.len(), "classifications")
                    .into(),
            );
        }

        let mut items = Vec::with_capacity(expected);
        for (entry, line) in payload.classifications.into_iter().zip(self.expense_lines) {
            check_range("monthlyAmount", entry.monthly_amount, 0, MAX_AMOUNT)?;
            let source_text = if entry.source_text.trim().is_empty() {
                line.clone()
            } else {
                entry.source_text
            };
            items.push(ClassifiedExpense {
                source_text,
                category: ExpenseCategory::from_label(&entry.category),
                monthly_amount: entry.monthly_amount,
            });
        }

        let actual: i64 = items.iter().map(|i| i.monthly_amount).sum();
        if actual != self.total_expense {
            return Err(ValidationError::TotalMismatch {
                expected: self.total_expense,
                actual,
            }
            .into());
        }

        Ok(items)
    }
}

/// One allocation per requested team, keyed into the stage being distributed.
pub struct RevenueShape<'a> {
    pub event_id: EventId,
    pub stage: u32,
    pub team_ids: &'a [TeamId],
}

/// Validated distribution: the overall logic plus one draft per team.
#[derive(Debug, Clone)]
pub struct RevenueDistribution {
    pub logic: String,
    pub drafts: Vec<AllocationDraft>,
}

impl ResponseShape for RevenueShape<'_> {
    type Payload = RevenueDistributionPayload;
    type Output = RevenueDistribution;

    fn validate(
        &self,
        payload: RevenueDistributionPayload,
    ) -> Result<RevenueDistribution, ResponseError> {
        if payload.teams.len() != self.team_ids.len() {
            return Err(
                ParseError::cardinality(self.team_ids.len(), payload.teams.len(), "teams").into(),
            );
        }

        let requested: HashSet<TeamId> = self.team_ids.iter().copied().collect();
        let mut seen = HashSet::with_capacity(payload.teams.len());
        let mut drafts = Vec::with_capacity(payload.teams.len());

        for team in payload.teams {
            if !requested.contains(&team.team_code) {
                return Err(ValidationError::UnknownTeam(team.team_code).into());
            }
            if !seen.insert(team.team_code) {
                return Err(ValidationError::DuplicateTeam(team.team_code).into());
            }
            check_range("allocatedRevenue", team.allocated_revenue, 1, MAX_AMOUNT)?;
            drafts.push(AllocationDraft {
                key: StageKey::new(self.event_id, team.team_code, self.stage),
                allocated_amount: team.allocated_revenue,
                rationale: team.reason.trim().to_string(),
            });
        }

        Ok(RevenueDistribution {
            logic: payload.distribution_logic.trim().to_string(),
            drafts,
        })
    }
}

pub struct SummaryShape;

impl ResponseShape for SummaryShape {
    type Payload = GroupSummaryPayload;
    type Output = GroupSummaryPayload;

    fn validate(&self, payload: GroupSummaryPayload) -> Result<GroupSummaryPayload, ResponseError> {
        if payload.business_type.trim().is_empty() {
            return Err(ValidationError::EmptyField("businessType").into());
        }
        if payload.digest.trim().is_empty() {
            return Err(ValidationError::EmptyField("digest").into());
        }
        Ok(payload)
    }
}

pub struct QuestionShape {
    pub expected: usize,
}

impl ResponseShape for QuestionShape {
    type Payload = QuestionSetPayload;
    type Output = Vec<String>;

    fn validate(&self, payload: QuestionSetPayload) -> Result<Vec<String>, ResponseError> {
        let mut questions = payload.questions;
        if questions.len() != self.expected {
            return Err(ParseError::cardinality(self.expected, questions.len(), "questions").into());
        }
        if questions.iter().any(|q| q.question.trim().is_empty()) {
            return Err(ValidationError::EmptyField("question").into());
        }
        questions.sort_by_key(|q| q.number);
        Ok(questions
            .into_iter()
            .map(|q| q.question.trim().to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: ResponseError) -> Option<ParseErrorKind> {
        err.parse_kind()
    }

    const ESTIMATE: &str = r#"Here you go:
```json
{"sgnaExpenses": 3000, "rndExpenses": 1000, "cogs": 500, "cogsRate": 25,
 "tangibleAssets": 100, "intangibleAssets": 0, "inventoryAssets": 0,
 "accountsPayable": 0, "borrowings": 0, "nonOperatingIncome": -50, "fsScore": 71}
```"#;

    #[test]
    fn test_estimate_from_fenced_response() {
        let estimate = parse(ESTIMATE, &EstimateShape).unwrap();
        assert_eq!(estimate.cogs_rate, 25);
        assert_eq!(estimate.fs_score, 71);
    }

    #[test]
    fn test_estimate_no_json() {
        let err = parse("I cannot help with that.", &EstimateShape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::NoJsonFound));
    }

    #[test]
    fn test_estimate_missing_field_is_malformed() {
        let err = parse(r#"{"sgnaExpenses": 1}"#, &EstimateShape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::Malformed));
    }

    #[test]
    fn test_estimate_float_is_malformed() {
        let raw = ESTIMATE.replace("\"cogs\": 500", "\"cogs\": 500.5");
        let err = parse(&raw, &EstimateShape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::Malformed));
    }

    #[test]
    fn test_estimate_out_of_range() {
        let raw = ESTIMATE.replace("\"fsScore\": 71", "\"fsScore\": 250");
        let err = parse(&raw, &EstimateShape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::OutOfRange));
    }

    fn team_entries(codes: &[i64]) -> String {
        let teams: Vec<String> = codes
            .iter()
            .map(|c| {
                format!(
                    r#"{{"teamCode": {}, "allocatedRevenue": {}, "reason": "r{}"}}"#,
                    c,
                    c * 1000,
                    c
                )
            })
            .collect();
        format!(
            r#"{{"distributionLogic": "by traction", "teams": [{}]}}"#,
            teams.join(",")
        )
    }

    #[test]
    fn test_revenue_distribution() {
        let ids = [1, 2, 3];
        let shape = RevenueShape {
            event_id: 4,
            stage: 2,
            team_ids: &ids,
        };
        let result = parse(&team_entries(&[3, 1, 2]), &shape).unwrap();
        assert_eq!(result.logic, "by traction");
        assert_eq!(result.drafts.len(), 3);
        assert_eq!(result.drafts[0].key, StageKey::new(4, 3, 2));
        assert_eq!(result.drafts[0].allocated_amount, 3000);
    }

    #[test]
    fn test_revenue_cardinality_mismatch() {
        let ids: Vec<i64> = (1..=10).collect();
        let shape = RevenueShape {
            event_id: 1,
            stage: 1,
            team_ids: &ids,
        };
        let err = parse(&team_entries(&[1, 2, 3, 4, 5, 6, 7, 8]), &shape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::CardinalityMismatch));
    }

    #[test]
    fn test_revenue_unknown_and_duplicate_team() {
        let ids = [1, 2];
        let shape = RevenueShape {
            event_id: 1,
            stage: 1,
            team_ids: &ids,
        };
        let err = parse(&team_entries(&[1, 9]), &shape).unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Validation(ValidationError::UnknownTeam(9))
        ));
        let err = parse(&team_entries(&[2, 2]), &shape).unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Validation(ValidationError::DuplicateTeam(2))
        ));
    }

    #[test]
    fn test_revenue_must_be_positive() {
        let ids = [1];
        let shape = RevenueShape {
            event_id: 1,
            stage: 1,
            team_ids: &ids,
        };
        let raw = r#"{"distributionLogic": "x", "teams": [{"teamCode": 1, "allocatedRevenue": 0, "reason": ""}]}"#;
        let err = parse(raw, &shape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::OutOfRange));
    }

    #[test]
    fn test_expense_category_coerced_to_other() {
        let lines = vec!["Team lunch".to_string(), "Engineers".to_string()];
        let shape = ExpenseShape {
            expense_lines: &lines,
            total_expense: 1500,
        };
        let raw = r#"{"classifications": [
            {"sourceText": "Team lunch", "category": "Meals", "monthlyAmount": 500},
            {"sourceText": "", "category": "labor", "monthlyAmount": 1000}
        ]}"#;
        let items = parse(raw, &shape).unwrap();
        assert_eq!(items[0].category, ExpenseCategory::Other);
        assert_eq!(items[1].category, ExpenseCategory::Labor);
        assert_eq!(items[1].source_text, "Engineers");
    }

    #[test]
    fn test_expense_total_mismatch() {
        let lines = vec!["Rent".to_string()];
        let shape = ExpenseShape {
            expense_lines: &lines,
            total_expense: 1500,
        };
        let raw = r#"{"classifications": [{"sourceText": "Rent", "category": "Rent", "monthlyAmount": 1400}]}"#;
        let err = parse(raw, &shape).unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Validation(ValidationError::TotalMismatch {
                expected: 1500,
                actual: 1400
            })
        ));
    }

    #[test]
    fn test_questions_exact_count() {
        let shape = QuestionShape { expected: 3 };
        let raw = r#"{"questions": [
            {"number": 2, "question": "Second?"},
            {"number": 1, "question": "First?"},
            {"number": 3, "question": "Third?"}
        ]}"#;
        assert_eq!(
            parse(raw, &shape).unwrap(),
            vec!["First?", "Second?", "Third?"]
        );

        let short = r#"{"questions": [{"number": 1, "question": "Only one?"}]}"#;
        let err = parse(short, &shape).unwrap_err();
        assert_eq!(kind(err), Some(ParseErrorKind::CardinalityMismatch));
    }

    #[test]
    fn test_summary_requires_digest() {
        let raw = r#"{"businessType": "Fintech", "digest": "  "}"#;
        let err = parse(raw, &SummaryShape).unwrap_err();
        assert!(matches!(
            err,
            ResponseError::Validation(ValidationError::EmptyField("digest"))
        ));
    }
}
