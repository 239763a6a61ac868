use dotenv::dotenv;
use std::sync::Arc;
use venture_sim::{
    ChatCompletionsTransport, ConcurrencyGuard, RegenerationPipeline, SimulationConfig,
    SqliteStore, StageKey, TeamStageInput,
};

const TEAMS: [(i64, &str); 3] = [
    (
        101,
        "StockSense: camera-based inventory tracking for small restaurants. \
         A shelf camera counts ingredients nightly and drafts supplier orders. \
         Sold as a monthly subscription per location.",
    ),
    (
        102,
        "GreenLoop: refillable packaging for cosmetics brands. We run collection \
         points in pharmacies, wash containers centrally and charge brands per refill.",
    ),
    (
        103,
        "TutorMatch: marketplace pairing university students with high-school pupils \
         for exam preparation. We take a 15% commission on every booked session.",
    ),
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = match std::env::var("VENTURE_SIM_CONFIG") {
        Ok(path) => SimulationConfig::from_path(path)?,
        Err(_) => SimulationConfig::default(),
    };

    println!("Venture Sim: regenerate stage 1 for {} teams", TEAMS.len());
    println!("═══════════════════════════════════════════════════════════════\n");

    let transport = ChatCompletionsTransport::from_env(&config.generation)?;
    let store = Arc::new(SqliteStore::open("venture_sim_demo.db")?);
    let pipeline = RegenerationPipeline::new(
        transport,
        store,
        Arc::new(ConcurrencyGuard::new()),
        &config,
    )?;

    for (team_id, plan) in TEAMS {
        let input = TeamStageInput {
            key: StageKey::new(1, team_id, 1),
            business_text: plan.to_string(),
            answers: vec![(
                "What did you build so far?".to_string(),
                "A working prototype tested with three pilot customers.".to_string(),
            )],
            expense_lines: vec![
                "Founder and one developer salaries".to_string(),
                "Shared office desk".to_string(),
                "Prototype hardware and cloud hosting".to_string(),
            ],
            total_expense: 6_000_000,
        };

        let outcome = pipeline.analyze_team_stage(input).await?;
        println!(
            "Team {}: {} ({} fallbacks)",
            team_id,
            outcome.summary.business_type,
            outcome.fallbacks.len()
        );
        for item in &outcome.classification.items {
            println!(
                "   {:<12} {:>12}  {}",
                item.category.label(),
                item.monthly_amount,
                item.source_text
            );
        }
    }

    let team_ids: Vec<i64> = TEAMS.iter().map(|(id, _)| *id).collect();
    let outcome = pipeline.regenerate_stage_summary(1, 1, &team_ids).await?;

    println!("\nDistribution group {}", outcome.group);
    println!("Logic: {}\n", outcome.distribution_logic);
    for (allocation, snapshot) in outcome.allocations.iter().zip(&outcome.snapshots) {
        println!(
            "#{} team {:<5} revenue {:>12}  net income {:>12}  cash {:>12}  score {:>3}",
            allocation.rank,
            allocation.key.team_id,
            allocation.allocated_amount,
            snapshot.net_income,
            snapshot.cash,
            snapshot.health_score
        );
    }

    Ok(())
}
