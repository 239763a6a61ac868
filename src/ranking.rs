use crate::schema::{DistributionGroup, RevenueAllocation, StageKey};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

/// How allocations with equal amounts are ordered relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TieBreak {
    /// Equal amounts are ordered by ascending team id.
    #[default]
    TeamCode,
    /// Equal amounts keep the order they were supplied in (stable sort only).
    InsertionOrder,
}

/// An allocation before it has been ranked into a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationDraft {
    pub key: StageKey,
    pub allocated_amount: i64,
    pub rationale: String,
}

pub struct RankingEngine {
    tie_break: TieBreak,
}

impl RankingEngine {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Sorts the drafts by amount, descending, and assigns ranks `1..=N` into `group`.
    pub fn rank(
        &self,
        drafts: Vec<AllocationDraft>,
        group: DistributionGroup,
    ) -> Vec<RevenueAllocation> {
        let mut drafts = drafts;
        match self.tie_break {
            TieBreak::TeamCode => drafts.sort_by(|a, b| {
                b.allocated_amount
                    .cmp(&a.allocated_amount)
                    .then(a.key.team_id.cmp(&b.key.team_id))
            }),
            TieBreak::InsertionOrder => {
                drafts.sort_by(|a, b| b.allocated_amount.cmp(&a.allocated_amount))
            }
        }

        let created_at = Utc::now();
        let ranked: Vec<RevenueAllocation> = drafts
            .into_iter()
            .enumerate()
            .map(|(idx, draft)| RevenueAllocation {
                key: draft.key,
                group,
                allocated_amount: draft.allocated_amount,
                rank: (idx + 1) as u32,
                rationale: draft.rationale,
                created_at,
            })
            .collect();

        debug!(
            "Ranked {} allocations into distribution group {}",
            ranked.len(),
            group
        );
        ranked
    }
}
