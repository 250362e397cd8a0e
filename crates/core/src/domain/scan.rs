use crate::domain::score::{Outcome, ScoreResult, StrategyKind, Verdict};
use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRun {
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub strategy: StrategyKind,
    pub items: Vec<ScanItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanItem {
    pub rank: i32,
    pub ticker: String,
    pub label: String,
    pub score: Option<i16>,
    pub verdict: Option<Verdict>,
    pub reasons: Vec<String>,
}

impl ScanRun {
    /// Ranks `results` and numbers them from 1.
    pub fn from_results(
        as_of_date: NaiveDate,
        generated_at: DateTime<Utc>,
        strategy: StrategyKind,
        mut results: Vec<ScoreResult>,
    ) -> Self {
        rank_results(&mut results);
        let items = results
            .into_iter()
            .enumerate()
            .map(|(idx, r)| ScanItem {
                rank: idx as i32 + 1,
                label: r.label().to_string(),
                score: r.score().map(i16::from),
                verdict: r.verdict(),
                ticker: r.ticker,
                reasons: r.reasons,
            })
            .collect();

        Self {
            as_of_date,
            generated_at,
            strategy,
            items,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.items.is_empty(), "scan run must contain at least one item");

        let mut seen_ranks = BTreeSet::<i32>::new();
        let mut seen_tickers = BTreeSet::<&str>::new();
        for item in &self.items {
            ensure!(!item.ticker.trim().is_empty(), "ticker must be non-empty");
            ensure!(
                seen_tickers.insert(item.ticker.as_str()),
                "duplicate ticker: {}",
                item.ticker
            );
            ensure!(seen_ranks.insert(item.rank), "duplicate rank: {}", item.rank);
            if let Some(score) = item.score {
                ensure!((0..=100).contains(&score), "score out of range: {score}");
            }
        }

        // Ranks must be contiguous 1..=len.
        for rank in 1..=self.items.len() as i32 {
            if !seen_ranks.contains(&rank) {
                bail!("missing rank {rank} in scan run");
            }
        }
        Ok(())
    }
}

/// Available results first, then by score (descending) or verdict
/// (BUY, NEUTRAL, SELL), then by ticker.
pub fn rank_results(results: &mut [ScoreResult]) {
    results.sort_by(|a, b| {
        sort_key(a)
            .cmp(&sort_key(b))
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
}

fn sort_key(r: &ScoreResult) -> (u8, i32) {
    match &r.outcome {
        Outcome::Score { score, .. } => (0, -i32::from(*score)),
        Outcome::Verdict { verdict } => (0, verdict_order(*verdict)),
        Outcome::NotFound => (1, 0),
    }
}

fn verdict_order(v: Verdict) -> i32 {
    match v {
        Verdict::Buy => 0,
        Verdict::Neutral => 1,
        Verdict::Sell => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::score::Band;
    use chrono::TimeZone;

    fn scored(ticker: &str, score: u8) -> ScoreResult {
        ScoreResult {
            ticker: ticker.to_string(),
            strategy: StrategyKind::Fundamentals,
            outcome: Outcome::Score {
                score,
                band: Band::from_score(score),
            },
            reasons: vec![],
        }
    }

    fn signal(ticker: &str, verdict: Verdict) -> ScoreResult {
        ScoreResult {
            ticker: ticker.to_string(),
            strategy: StrategyKind::Technical,
            outcome: Outcome::Verdict { verdict },
            reasons: vec!["x".to_string()],
        }
    }

    #[test]
    fn ranks_scores_descending_with_missing_last() {
        let mut results = vec![
            ScoreResult::not_found("ZZZ", StrategyKind::Fundamentals),
            scored("B", 55),
            scored("A", 55),
            scored("C", 90),
        ];
        rank_results(&mut results);
        let order: Vec<_> = results.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(order, vec!["C", "A", "B", "ZZZ"]);
    }

    #[test]
    fn ranks_buy_before_neutral_before_sell() {
        let mut results = vec![
            signal("S", Verdict::Sell),
            signal("N", Verdict::Neutral),
            signal("B", Verdict::Buy),
        ];
        rank_results(&mut results);
        let order: Vec<_> = results.iter().map(|r| r.ticker.as_str()).collect();
        assert_eq!(order, vec!["B", "N", "S"]);
    }

    #[test]
    fn from_results_numbers_ranks_contiguously() {
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let generated_at = Utc.with_ymd_and_hms(2026, 1, 27, 11, 0, 0).unwrap();
        let run = ScanRun::from_results(
            as_of,
            generated_at,
            StrategyKind::Fundamentals,
            vec![scored("A", 20), scored("B", 80)],
        );
        run.validate().unwrap();
        assert_eq!(run.items[0].ticker, "B");
        assert_eq!(run.items[0].rank, 1);
        assert_eq!(run.items[0].label, "Strong Buy");
        assert_eq!(run.items[1].score, Some(20));
    }

    #[test]
    fn verdict_runs_leave_missing_tickers_unscored() {
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let run = ScanRun::from_results(
            as_of,
            Utc::now(),
            StrategyKind::Technical,
            vec![
                ScoreResult::not_found("GONE", StrategyKind::Technical),
                signal("B", Verdict::Buy),
            ],
        );
        run.validate().unwrap();
        assert_eq!(run.items[1].ticker, "GONE");
        assert!(run.items.iter().all(|i| i.score.is_none()));
        assert_eq!(run.items[1].label, "Not Found");
    }

    #[test]
    fn validate_rejects_duplicate_tickers() {
        let as_of = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        let mut run = ScanRun::from_results(
            as_of,
            Utc::now(),
            StrategyKind::Fundamentals,
            vec![scored("A", 20), scored("B", 80)],
        );
        run.items[1].ticker = run.items[0].ticker.clone();
        assert!(run.validate().is_err());
    }
}
