//! The two regenerate-and-overwrite operations.
//!
//! Each run holds the [`ConcurrencyGuard`] mutex of its [`ResourceCategory`] for its whole
//! duration (a stage regeneration also holds the team-analysis mutex), generates every response it needs, substitutes fallbacks for anything that
//! cannot be understood, and only then hands one [`WriteBatch`] to the store. A
//! [`GenerationError`](crate::error::GenerationError) aborts the run before anything is
//! written.

use crate::calculator::{verify_snapshot, FinancialCalculator};
use crate::config::SimulationConfig;
use crate::error::{Result, SimulationError};
use crate::fallback::FallbackComputer;
use crate::guard::{ConcurrencyGuard, ResourceCategory};
use crate::llm::client::{CompletionTransport, GenerationClient};
use crate::llm::parser::{
    parse, EstimateShape, ExpenseShape, QuestionShape, ResponseShape, RevenueShape, SummaryShape,
    MAX_AMOUNT,
};
use crate::llm::prompts::{PromptBuilder, PromptKind, TeamBrief};
use crate::ranking::RankingEngine;
use crate::schema::{
    DistributionGroup, EstimateRecord, EventId, ExpenseClassification, FinancialSnapshot,
    GroupSummary, QuestionSet, RevenueAllocation, StageKey, TeamId,
};
use crate::store::{StageStore, WriteBatch};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Everything one team submitted for one stage.
#[derive(Debug, Clone)]
pub struct TeamStageInput {
    pub key: StageKey,
    /// Extracted business-plan text.
    pub business_text: String,
    /// Question/answer pairs in the order they were asked.
    pub answers: Vec<(String, String)>,
    /// One free-text description per reported expense.
    pub expense_lines: Vec<String>,
    /// Total monthly expense the team reported.
    pub total_expense: i64,
}

#[derive(Debug, Clone)]
pub struct TeamStageOutcome {
    pub summary: GroupSummary,
    pub classification: ExpenseClassification,
    pub estimate: EstimateRecord,
    pub questions: QuestionSet,
    /// Shapes whose generated response was replaced by a fallback.
    pub fallbacks: Vec<PromptKind>,
}

#[derive(Debug, Clone)]
pub struct StageSummaryOutcome {
    pub group: DistributionGroup,
    pub distribution_logic: String,
    /// Ordered by rank.
    pub allocations: Vec<RevenueAllocation>,
    /// In the same order as `allocations`.
    pub snapshots: Vec<FinancialSnapshot>,
    pub revenue_from_fallback: bool,
}

pub struct RegenerationPipeline<T> {
    client: GenerationClient<T>,
    store: Arc<dyn StageStore>,
    guard: Arc<ConcurrencyGuard>,
    prompts: PromptBuilder,
    fallback: FallbackComputer,
    calculator: FinancialCalculator,
    ranking: RankingEngine,
    question_count: usize,
}

impl<T: CompletionTransport> RegenerationPipeline<T> {
    pub fn new(
        transport: T,
        store: Arc<dyn StageStore>,
        guard: Arc<ConcurrencyGuard>,
        config: &SimulationConfig,
    ) -> Result<Self> {
        let client = GenerationClient::new(transport, &config.generation);
        Self::with_client(client, store, guard, config)
    }

    pub fn with_client(
        client: GenerationClient<T>,
        store: Arc<dyn StageStore>,
        guard: Arc<ConcurrencyGuard>,
        config: &SimulationConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client,
            store,
            guard,
            prompts: PromptBuilder::new(config.prompt.clone(), config.fallback.question_count),
            fallback: FallbackComputer::new(config.fallback.clone()),
            calculator: FinancialCalculator::new(config.initial_cash),
            ranking: RankingEngine::new(config.ranking.tie_break),
            question_count: config.fallback.question_count,
        })
    }

    pub fn client(&self) -> &GenerationClient<T> {
        &self.client
    }

    pub fn store(&self) -> &Arc<dyn StageStore> {
        &self.store
    }

    /// Regenerates a team's summary, expense classification, financial estimate and
    /// next-stage questions, replacing whatever was stored for `input.key`.
    pub async fn analyze_team_stage(&self, input: TeamStageInput) -> Result<TeamStageOutcome> {
        self.guard
            .with_lock(ResourceCategory::TeamStageAnalysis, || {
                self.run_team_stage(input)
            })
            .await
    }

    /// Distributes revenue across `team_ids`, ranks it into a fresh distribution group and
    /// recomputes every team's snapshot for `stage`. Any allocation previously stored for
    /// the stage is replaced, including those of teams no longer listed.
    ///
    /// Also holds the team-analysis category, since the snapshots read what analysis writes.
    pub async fn regenerate_stage_summary(
        &self,
        event_id: EventId,
        stage: u32,
        team_ids: &[TeamId],
    ) -> Result<StageSummaryOutcome> {
        self.guard
            .with_locks(
                &[
                    ResourceCategory::StageSummaryRegeneration,
                    ResourceCategory::TeamStageAnalysis,
                ],
                || self.run_stage_summary(event_id, stage, team_ids),
            )
            .await
    }

    async fn run_team_stage(&self, input: TeamStageInput) -> Result<TeamStageOutcome> {
        let key = input.key;
        if key.stage == 0 {
            return Err(SimulationError::InvalidInput(format!(
                "stage numbers start at 1 ({})",
                key
            )));
        }
        if !(0..=MAX_AMOUNT).contains(&input.total_expense) {
            return Err(SimulationError::InvalidInput(format!(
                "total expense must be between 0 and {}, got {} for {}",
                MAX_AMOUNT, input.total_expense, key
            )));
        }

        info!("Analyzing {}", key);
        let mut fallbacks = Vec::new();
        let mut memory = self
            .store
            .summary_history(key.event_id, key.team_id, key.stage)?;

        let prompt = self
            .prompts
            .group_summary(key.stage, &input.business_text, &input.answers);
        let (profile, fell_back) = self
            .resolve(PromptKind::GroupSummary, key, &prompt, &SummaryShape, || {
                self.fallback.group_summary(&input.business_text)
            })
            .await?;
        note(&mut fallbacks, PromptKind::GroupSummary, fell_back);
        let summary = GroupSummary {
            key,
            business_type: profile.business_type,
            technology: profile.technology,
            revenue_model: profile.revenue_model,
            strengths: profile.strengths,
            weaknesses: profile.weaknesses,
            digest: profile.digest,
            from_fallback: fell_back,
        };
        memory.push(summary.clone());

        let prompt = self.prompts.expense_classification(
            key.stage,
            &memory,
            &input.expense_lines,
            input.total_expense,
        );
        let shape = ExpenseShape {
            expense_lines: &input.expense_lines,
            total_expense: input.total_expense,
        };
        let (items, fell_back) = self
            .resolve(PromptKind::ExpenseClassification, key, &prompt, &shape, || {
                self.fallback.expense_classification(input.total_expense)
            })
            .await?;
        note(&mut fallbacks, PromptKind::ExpenseClassification, fell_back);
        let classification = ExpenseClassification {
            key,
            total_expense: input.total_expense,
            items,
            from_fallback: fell_back,
        };

        let prompt = self.prompts.financial_estimate(
            key.stage,
            &memory,
            &input.answers,
            input.total_expense,
        );
        let (estimate, fell_back) = self
            .resolve(PromptKind::FinancialEstimate, key, &prompt, &EstimateShape, || {
                self.fallback.financial_estimate(input.total_expense)
            })
            .await?;
        note(&mut fallbacks, PromptKind::FinancialEstimate, fell_back);
        let estimate = EstimateRecord {
            key,
            estimate,
            from_fallback: fell_back,
        };

        let prompt = self
            .prompts
            .follow_up_questions(key.stage, &memory, &input.answers);
        let shape = QuestionShape {
            expected: self.question_count,
        };
        let (questions, fell_back) = self
            .resolve(PromptKind::FollowUpQuestions, key, &prompt, &shape, || {
                self.fallback.questions(key.stage)
            })
            .await?;
        note(&mut fallbacks, PromptKind::FollowUpQuestions, fell_back);
        let questions = QuestionSet {
            key,
            questions,
            from_fallback: fell_back,
        };

        let batch = WriteBatch {
            summaries: vec![summary.clone()],
            classifications: vec![classification.clone()],
            estimates: vec![estimate.clone()],
            questions: vec![questions.clone()],
            ..WriteBatch::default()
        };
        self.store.commit(&batch)?;

        info!(
            "Stored analysis for {} ({} of 4 shapes from fallback)",
            key,
            fallbacks.len()
        );

        Ok(TeamStageOutcome {
            summary,
            classification,
            estimate,
            questions,
            fallbacks,
        })
    }

    async fn run_stage_summary(
        &self,
        event_id: EventId,
        stage: u32,
        team_ids: &[TeamId],
    ) -> Result<StageSummaryOutcome> {
        if stage == 0 {
            return Err(SimulationError::InvalidInput(
                "stage numbers start at 1".to_string(),
            ));
        }
        if team_ids.is_empty() {
            return Err(SimulationError::InvalidInput(format!(
                "no teams to distribute revenue to in event {} stage {}",
                event_id, stage
            )));
        }
        let mut unique = HashSet::with_capacity(team_ids.len());
        if let Some(dup) = team_ids.iter().find(|id| !unique.insert(**id)) {
            return Err(SimulationError::InvalidInput(format!(
                "team {} listed more than once",
                dup
            )));
        }

        info!(
            "Regenerating stage summary for event {} stage {} ({} teams)",
            event_id,
            stage,
            team_ids.len()
        );

        // Read once: the prompt and the snapshots must see the same inputs.
        let mut summaries = Vec::with_capacity(team_ids.len());
        let mut estimates = Vec::with_capacity(team_ids.len());
        let mut classifications = HashMap::with_capacity(team_ids.len());
        for &team_id in team_ids {
            let key = StageKey::new(event_id, team_id, stage);
            summaries.push(self.store.summary(&key)?);
            estimates.push(self.store.estimate(&key)?);
            if let Some(classification) = self.store.classification(&key)? {
                classifications.insert(team_id, classification);
            }
        }
        let stored_estimates: HashMap<TeamId, &EstimateRecord> = team_ids
            .iter()
            .zip(&estimates)
            .filter_map(|(&team_id, record)| record.as_ref().map(|r| (team_id, r)))
            .collect();
        let briefs: Vec<TeamBrief<'_>> = team_ids
            .iter()
            .zip(summaries.iter().zip(&estimates))
            .map(|(&team_id, (summary, estimate))| TeamBrief {
                team_id,
                summary: summary.as_ref(),
                estimate: estimate.as_ref().map(|r| &r.estimate),
            })
            .collect();

        let prompt = self.prompts.revenue_distribution(stage, &briefs);
        let shape = RevenueShape {
            event_id,
            stage,
            team_ids,
        };
        let scope = format!("event {} / stage {}", event_id, stage);
        let (distribution, revenue_from_fallback) = self
            .resolve(PromptKind::RevenueDistribution, &scope, &prompt, &shape, || {
                self.fallback.revenue_distribution(event_id, stage, team_ids)
            })
            .await?;

        let group = DistributionGroup::new();
        let allocations = self.ranking.rank(distribution.drafts, group);

        let mut snapshots = Vec::with_capacity(allocations.len());
        for allocation in &allocations {
            let team_id = allocation.key.team_id;
            snapshots.push(self.snapshot_for(
                allocation,
                classifications.get(&team_id),
                stored_estimates.get(&team_id).copied(),
            )?);
        }

        let batch = WriteBatch {
            allocations: allocations.clone(),
            snapshots: snapshots.clone(),
            allocation_scopes: vec![(event_id, stage)],
            ..WriteBatch::default()
        };
        self.store.commit(&batch)?;

        info!(
            "Stored {} allocations and snapshots in distribution group {}",
            allocations.len(),
            group
        );

        Ok(StageSummaryOutcome {
            group,
            distribution_logic: distribution.logic,
            allocations,
            snapshots,
            revenue_from_fallback,
        })
    }

    fn snapshot_for(
        &self,
        allocation: &RevenueAllocation,
        classification: Option<&ExpenseClassification>,
        estimate: Option<&EstimateRecord>,
    ) -> Result<FinancialSnapshot> {
        let key = allocation.key;
        let previous = match key.previous() {
            Some(prev) => {
                let found = self.store.snapshot(&prev)?;
                if found.is_none() {
                    debug!("No snapshot for {}; starting from the initial endowment", prev);
                }
                found
            }
            None => None,
        };

        if classification.is_none() {
            debug!("No expense classification for {}; expenses treated as zero", key);
        }
        let estimate = match estimate {
            Some(record) => record.estimate.clone(),
            None => {
                let total = classification.map_or(0, |c| c.total_expense);
                debug!("No estimate for {}; using the default estimate", key);
                self.fallback.financial_estimate(total)
            }
        };

        let snapshot = self.calculator.compute(
            key,
            previous.as_ref(),
            allocation.allocated_amount,
            classification,
            &estimate,
        )?;
        verify_snapshot(&snapshot)?;
        Ok(snapshot)
    }

    /// Generates, then parses; anything the parser rejects is replaced by `fallback()`.
    /// Only generation failures propagate.
    async fn resolve<S, F>(
        &self,
        kind: PromptKind,
        scope: impl std::fmt::Display,
        prompt: &str,
        shape: &S,
        fallback: F,
    ) -> Result<(S::Output, bool)>
    where
        S: ResponseShape,
        F: FnOnce() -> S::Output,
    {
        let raw = self.client.generate(prompt).await.map_err(|e| {
            warn!("{} generation failed for {}: {}", kind.title(), scope, e);
            e
        })?;

        match parse(&raw, shape) {
            Ok(output) => Ok((output, false)),
            Err(e) => {
                warn!(
                    "{} response for {} rejected ({}); using fallback",
                    kind.title(),
                    scope,
                    e
                );
                Ok((fallback(), true))
            }
        }
    }
}

fn note(fallbacks: &mut Vec<PromptKind>, kind: PromptKind, fell_back: bool) {
    if fell_back {
        fallbacks.push(kind);
    }
}
