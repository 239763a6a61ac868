use crate::error::{Result, SimulationError};
use crate::schema::{
    ExpenseClassification, FinancialEstimate, FinancialSnapshot, OperatingLine, StageKey,
};
use log::debug;

/// Flat corporate tax rate applied to positive pre-tax income.
pub const TAX_RATE: f64 = 0.22;
pub const COGS_RATIO_MIN: f64 = 0.10;
pub const COGS_RATIO_MAX: f64 = 0.80;

const MARGIN_WEIGHT: f64 = 0.6;
const ROA_WEIGHT: f64 = 0.4;

/// Derives a complete per-stage snapshot from revenue, classified expenses, the
/// estimation inputs and the prior stage's snapshot.
pub struct FinancialCalculator {
    initial_cash: i64,
}

impl FinancialCalculator {
    pub fn new(initial_cash: i64) -> Self {
        Self { initial_cash }
    }

    /// Synthetic snapshot standing in for "stage 0": the cash endowment and nothing else.
    pub fn bootstrap(&self, key: StageKey) -> FinancialSnapshot {
        let cash = self.initial_cash;
        FinancialSnapshot {
            key: StageKey::new(key.event_id, key.team_id, 0),
            cash,
            tangible_assets: 0,
            intangible_assets: 0,
            inventory_assets: 0,
            total_assets: cash,
            accounts_payable: 0,
            borrowings: 0,
            total_liabilities: 0,
            capital_stock: cash,
            total_liabilities_and_equity: cash,
            revenue: 0,
            cost_of_goods: 0,
            gross_profit: 0,
            sgna_expense: 0,
            rnd_expense: 0,
            operating_income: 0,
            non_operating_income: 0,
            taxable_income: 0,
            tax: 0,
            net_income: 0,
            health_score: 0,
        }
    }

    pub fn compute(
        &self,
        key: StageKey,
        previous: Option<&FinancialSnapshot>,
        revenue: i64,
        classification: Option<&ExpenseClassification>,
        estimate: &FinancialEstimate,
    ) -> Result<FinancialSnapshot> {
        let bootstrap;
        let previous = match previous {
            Some(snapshot) => snapshot,
            None => {
                bootstrap = self.bootstrap(key);
                &bootstrap
            }
        };
        let overflow = |field: &'static str| SimulationError::ArithmeticOverflow { key, field };

        let (sgna_expense, rnd_expense) = match classification {
            Some(c) => (
                line_total(c, OperatingLine::SellingGeneralAdministrative)
                    .ok_or_else(|| overflow("sgna_expense"))?,
                line_total(c, OperatingLine::ResearchAndDevelopment)
                    .ok_or_else(|| overflow("rnd_expense"))?,
            ),
            None => (0, 0),
        };
        let expense_total = sgna_expense
            .checked_add(rnd_expense)
            .ok_or_else(|| overflow("expense_total"))?;

        let cash = previous
            .cash
            .checked_sub(expense_total)
            .ok_or_else(|| overflow("cash"))?;

        let cogs_ratio = clamp_cogs_ratio(estimate.cogs_rate as f64 / 100.0);
        let cost_of_goods = (revenue as f64 * cogs_ratio).round() as i64;
        let gross_profit = revenue
            .checked_sub(cost_of_goods)
            .ok_or_else(|| overflow("gross_profit"))?;
        let operating_income = gross_profit
            .checked_sub(sgna_expense)
            .and_then(|v| v.checked_sub(rnd_expense))
            .ok_or_else(|| overflow("operating_income"))?;

        let non_operating_income = estimate.non_operating_income;
        let taxable_income = operating_income
            .checked_add(non_operating_income)
            .ok_or_else(|| overflow("taxable_income"))?;
        let tax = if taxable_income > 0 {
            (taxable_income as f64 * TAX_RATE).round() as i64
        } else {
            0
        };
        let net_income = taxable_income
            .checked_sub(tax)
            .ok_or_else(|| overflow("net_income"))?;

        let tangible_assets = estimate.tangible_assets;
        let intangible_assets = estimate.intangible_assets;
        let inventory_assets = estimate.inventory_assets;
        let total_assets =
            checked_total([cash, tangible_assets, intangible_assets, inventory_assets])
                .ok_or_else(|| overflow("total_assets"))?;

        let accounts_payable = estimate.accounts_payable;
        let borrowings = estimate.borrowings;
        let total_liabilities = accounts_payable
            .checked_add(borrowings)
            .ok_or_else(|| overflow("total_liabilities"))?;
        let capital_stock = total_assets
            .checked_sub(total_liabilities)
            .ok_or_else(|| overflow("capital_stock"))?;

        let health_score = health_score(net_income, revenue, total_assets);

        debug!(
            "Computed snapshot for {}: revenue={} net_income={} total_assets={} score={}",
            key, revenue, net_income, total_assets, health_score
        );

        Ok(FinancialSnapshot {
            key,
            cash,
            tangible_assets,
            intangible_assets,
            inventory_assets,
            total_assets,
            accounts_payable,
            borrowings,
            total_liabilities,
            capital_stock,
            total_liabilities_and_equity: total_liabilities + capital_stock,
            revenue,
            cost_of_goods,
            gross_profit,
            sgna_expense,
            rnd_expense,
            operating_income,
            non_operating_income,
            taxable_income,
            tax,
            net_income,
            health_score,
        })
    }
}

fn checked_total(values: impl IntoIterator<Item = i64>) -> Option<i64> {
    values
        .into_iter()
        .try_fold(0i64, |acc, value| acc.checked_add(value))
}

fn line_total(classification: &ExpenseClassification, line: OperatingLine) -> Option<i64> {
    checked_total(
        classification
            .items
            .iter()
            .filter(|item| item.category.operating_line() == line)
            .map(|item| item.monthly_amount),
    )
}

pub fn clamp_cogs_ratio(ratio: f64) -> f64 {
    if ratio.is_nan() {
        return COGS_RATIO_MIN;
    }
    ratio.clamp(COGS_RATIO_MIN, COGS_RATIO_MAX)
}

/// Weighted blend of profit margin and return on assets, mapped onto 0..=100
/// with 50 as break-even.
pub fn health_score(net_income: i64, revenue: i64, total_assets: i64) -> u8 {
    let margin = if revenue > 0 {
        (net_income as f64 / revenue as f64).clamp(-1.0, 1.0)
    } else {
        0.0
    };
    let roa = if total_assets > 0 {
        (net_income as f64 / total_assets as f64).clamp(-1.0, 1.0)
    } else {
        0.0
    };

    let blended = 50.0 + 50.0 * (MARGIN_WEIGHT * margin + ROA_WEIGHT * roa);
    blended.round().clamp(0.0, 100.0) as u8
}

/// Checks the balance identities of a snapshot.
pub fn verify_snapshot(snapshot: &FinancialSnapshot) -> Result<()> {
    let asset_sum = checked_total([
        snapshot.cash,
        snapshot.tangible_assets,
        snapshot.intangible_assets,
        snapshot.inventory_assets,
    ]);

    if asset_sum != Some(snapshot.total_assets)
        || snapshot.total_assets != snapshot.total_liabilities_and_equity
    {
        return Err(SimulationError::AccountingEquationViolation {
            key: snapshot.key,
            assets: snapshot.total_assets,
            liabilities_and_equity: snapshot.total_liabilities_and_equity,
        });
    }

    if snapshot.net_income != snapshot.taxable_income - snapshot.tax
        || (snapshot.taxable_income <= 0 && snapshot.tax != 0)
    {
        return Err(SimulationError::IncomeStatementViolation {
            key: snapshot.key,
            details: format!(
                "taxable_income={} tax={} net_income={}",
                snapshot.taxable_income, snapshot.tax, snapshot.net_income
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ClassifiedExpense, ExpenseCategory};

    fn estimate(cogs_rate: i64) -> FinancialEstimate {
        FinancialEstimate {
            sgna_expenses: 0,
            rnd_expenses: 0,
            cogs: 0,
            cogs_rate,
            tangible_assets: 0,
            intangible_assets: 0,
            inventory_assets: 0,
            accounts_payable: 0,
            borrowings: 0,
            non_operating_income: 0,
            fs_score: 50,
        }
    }

    fn classification(key: StageKey, labor: i64, rnd: i64) -> ExpenseClassification {
        ExpenseClassification {
            key,
            total_expense: labor + rnd,
            items: vec![
                ClassifiedExpense {
                    source_text: "Staff".to_string(),
                    category: ExpenseCategory::Labor,
                    monthly_amount: labor,
                },
                ClassifiedExpense {
                    source_text: "Prototype".to_string(),
                    category: ExpenseCategory::ResearchAndDevelopment,
                    monthly_amount: rnd,
                },
            ],
            from_fallback: false,
        }
    }

    #[test]
    fn test_first_stage_from_bootstrap() {
        let calc = FinancialCalculator::new(100_000_000);
        let key = StageKey::new(1, 7, 1);
        let expenses = classification(key, 4_000_000, 1_000_000);
        let snapshot = calc
            .compute(key, None, 10_000_000, Some(&expenses), &estimate(30))
            .unwrap();

        assert_eq!(snapshot.cash, 95_000_000);
        assert_eq!(snapshot.cost_of_goods, 3_000_000);
        assert_eq!(snapshot.gross_profit, 7_000_000);
        assert_eq!(snapshot.sgna_expense, 4_000_000);
        assert_eq!(snapshot.rnd_expense, 1_000_000);
        assert_eq!(snapshot.operating_income, 2_000_000);
        assert_eq!(snapshot.taxable_income, 2_000_000);
        assert_eq!(snapshot.tax, 440_000);
        assert_eq!(snapshot.net_income, 1_560_000);
        assert_eq!(snapshot.total_assets, 95_000_000);
        assert_eq!(snapshot.capital_stock, 95_000_000);
        assert_eq!(snapshot.health_score, 55);
        verify_snapshot(&snapshot).unwrap();
    }

    #[test]
    fn test_cash_carries_from_previous_stage() {
        let calc = FinancialCalculator::new(100_000_000);
        let first_key = StageKey::new(1, 7, 1);
        let first = calc.compute(
            first_key,
            None,
            0,
            Some(&classification(first_key, 1_000, 0)),
            &estimate(30),
        ).unwrap();
        let second_key = StageKey::new(1, 7, 2);
        let second = calc.compute(
            second_key,
            Some(&first),
            0,
            Some(&classification(second_key, 2_000, 500)),
            &estimate(30),
        ).unwrap();
        assert_eq!(second.cash, 100_000_000 - 1_000 - 2_500);
    }

    #[test]
    fn test_no_tax_on_loss() {
        let calc = FinancialCalculator::new(1_000);
        let key = StageKey::new(1, 1, 1);
        let snapshot = calc.compute(
            key,
            None,
            100,
            Some(&classification(key, 500, 0)),
            &estimate(30),
        ).unwrap();
        assert_eq!(snapshot.taxable_income, 100 - 30 - 500);
        assert_eq!(snapshot.tax, 0);
        assert_eq!(snapshot.net_income, snapshot.taxable_income);
        verify_snapshot(&snapshot).unwrap();
    }

    #[test]
    fn test_cogs_ratio_is_clamped() {
        let calc = FinancialCalculator::new(0);
        let key = StageKey::new(1, 1, 1);
        let low = calc.compute(key, None, 1_000, None, &estimate(2)).unwrap();
        assert_eq!(low.cost_of_goods, 100);
        let high = calc.compute(key, None, 1_000, None, &estimate(95)).unwrap();
        assert_eq!(high.cost_of_goods, 800);
    }

    #[test]
    fn test_balance_identity_with_liabilities() {
        let calc = FinancialCalculator::new(50_000);
        let key = StageKey::new(3, 4, 1);
        let mut inputs = estimate(40);
        inputs.tangible_assets = 12_345;
        inputs.intangible_assets = 6_789;
        inputs.inventory_assets = 1_111;
        inputs.accounts_payable = 9_000;
        inputs.borrowings = 80_000;
        inputs.non_operating_income = -2_500;
        let snapshot = calc.compute(
            key,
            None,
            77_777,
            Some(&classification(key, 3_000, 1_234)),
            &inputs,
        ).unwrap();

        assert_eq!(
            snapshot.total_assets,
            snapshot.cash
                + snapshot.tangible_assets
                + snapshot.intangible_assets
                + snapshot.inventory_assets
        );
        assert_eq!(snapshot.total_liabilities, 89_000);
        assert_eq!(snapshot.total_assets, snapshot.total_liabilities_and_equity);
        assert!(snapshot.capital_stock < 0);
        verify_snapshot(&snapshot).unwrap();
    }

    #[test]
    fn test_health_score_bounds() {
        assert_eq!(health_score(0, 0, 0), 50);
        assert_eq!(health_score(1_000, 1_000, 1_000), 100);
        assert_eq!(health_score(-5_000, 1_000, 1_000), 0);
    }

    #[test]
    fn test_verify_detects_broken_identity() {
        let calc = FinancialCalculator::new(1_000);
        let mut snapshot = calc.bootstrap(StageKey::new(1, 1, 1));
        snapshot.cash += 1;
        assert!(matches!(
            verify_snapshot(&snapshot),
            Err(SimulationError::AccountingEquationViolation { .. })
        ));
    }

    #[test]
    fn test_huge_expenses_report_overflow() {
        let calc = FinancialCalculator::new(100_000_000);
        let key = StageKey::new(1, 7, 2);
        let mut previous = calc.bootstrap(key);
        previous.cash = -5_000_000_000_000_000_000;
        let result = calc.compute(
            key,
            Some(&previous),
            0,
            Some(&classification(key, 5_000_000_000_000_000_000, 0)),
            &estimate(30),
        );
        assert!(matches!(
            result,
            Err(SimulationError::ArithmeticOverflow { field: "cash", .. })
        ));
    }
}
