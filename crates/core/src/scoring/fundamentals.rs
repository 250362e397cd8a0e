use crate::domain::score::{Band, Outcome, ScoreResult, StrategyKind};
use crate::domain::snapshot::{keys, MarketSnapshot};
use crate::scoring::Strategy;

pub const MAX_SCORE: u8 = 100;

#[derive(Debug, Clone, Copy)]
enum Threshold {
    Above(f64),
    Below(f64),
    /// Exclusive on both ends.
    Between(f64, f64),
}

impl Threshold {
    fn fires(self, value: f64) -> bool {
        match self {
            Threshold::Above(t) => value > t,
            Threshold::Below(t) => value < t,
            Threshold::Between(lo, hi) => value > lo && value < hi,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    key: &'static str,
    threshold: Threshold,
    weight: u8,
    reason: &'static str,
}

const RULES: [Rule; 6] = [
    Rule {
        key: keys::RETURN_ON_EQUITY,
        threshold: Threshold::Above(0.15),
        weight: 20,
        reason: "High efficiency",
    },
    Rule {
        key: keys::GROSS_MARGINS,
        threshold: Threshold::Above(0.40),
        weight: 20,
        reason: "Strong brand/margins",
    },
    Rule {
        key: keys::DIVIDEND_YIELD,
        threshold: Threshold::Above(0.015),
        weight: 15,
        reason: "Pays dividends",
    },
    Rule {
        key: keys::INSTITUTIONAL_HOLDING_PCT,
        threshold: Threshold::Above(0.40),
        weight: 15,
        reason: "Institutional trust",
    },
    Rule {
        key: keys::BETA,
        threshold: Threshold::Below(1.2),
        weight: 10,
        reason: "Low volatility",
    },
    Rule {
        // A non-positive P/E means losses, not a bargain.
        key: keys::TRAILING_PE,
        threshold: Threshold::Between(0.0, 25.0),
        weight: 20,
        reason: "Good valuation",
    },
];

/// Weighted fundamentals rules: each rule that fires adds its weight and
/// its reason. Absent fields never fire.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fundamentals;

impl Strategy for Fundamentals {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fundamentals
    }

    fn evaluate(&self, snapshot: &MarketSnapshot) -> ScoreResult {
        let mut total: u32 = 0;
        let mut reasons = Vec::new();
        for rule in &RULES {
            let fired = snapshot
                .indicator(rule.key)
                .is_some_and(|v| rule.threshold.fires(v));
            if fired {
                total += u32::from(rule.weight);
                reasons.push(rule.reason.to_string());
            }
        }

        let score = total.min(u32::from(MAX_SCORE)) as u8;
        ScoreResult {
            ticker: snapshot.ticker.clone(),
            strategy: StrategyKind::Fundamentals,
            outcome: Outcome::Score {
                score,
                band: Band::from_score(score),
            },
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score_of(r: &ScoreResult) -> u8 {
        r.score().unwrap()
    }

    fn full_house() -> MarketSnapshot {
        MarketSnapshot::new("INFY.NS", 1500.0)
            .with_indicator(keys::RETURN_ON_EQUITY, 0.30)
            .with_indicator(keys::GROSS_MARGINS, 0.55)
            .with_indicator(keys::DIVIDEND_YIELD, 0.02)
            .with_indicator(keys::INSTITUTIONAL_HOLDING_PCT, 0.60)
            .with_indicator(keys::BETA, 0.8)
            .with_indicator(keys::TRAILING_PE, 22.0)
    }

    #[test]
    fn all_rules_sum_to_one_hundred() {
        let r = Fundamentals.evaluate(&full_house());
        assert_eq!(score_of(&r), 100);
        assert_eq!(r.label(), "Strong Buy");
        assert_eq!(
            r.reasons,
            vec![
                "High efficiency",
                "Strong brand/margins",
                "Pays dividends",
                "Institutional trust",
                "Low volatility",
                "Good valuation",
            ]
        );
    }

    #[test]
    fn empty_snapshot_scores_zero() {
        let r = Fundamentals.evaluate(&MarketSnapshot::new("X", 10.0));
        assert_eq!(score_of(&r), 0);
        assert!(r.reasons.is_empty());
        assert_eq!(r.label(), "Avoid");
    }

    #[test]
    fn thresholds_are_strict() {
        let snap = MarketSnapshot::new("X", 10.0)
            .with_indicator(keys::RETURN_ON_EQUITY, 0.15)
            .with_indicator(keys::GROSS_MARGINS, 0.40)
            .with_indicator(keys::DIVIDEND_YIELD, 0.015)
            .with_indicator(keys::INSTITUTIONAL_HOLDING_PCT, 0.40)
            .with_indicator(keys::BETA, 1.2)
            .with_indicator(keys::TRAILING_PE, 25.0);
        let r = Fundamentals.evaluate(&snap);
        assert_eq!(score_of(&r), 0);
        assert!(r.reasons.is_empty());
    }

    #[test]
    fn negative_pe_is_not_good_valuation() {
        let snap = MarketSnapshot::new("X", 10.0).with_indicator(keys::TRAILING_PE, -4.0);
        assert_eq!(score_of(&Fundamentals.evaluate(&snap)), 0);

        let snap = MarketSnapshot::new("X", 10.0).with_indicator(keys::TRAILING_PE, 0.0);
        assert_eq!(score_of(&Fundamentals.evaluate(&snap)), 0);
    }

    #[test]
    fn score_is_sum_of_fired_weights_and_reasons_match() {
        let snap = MarketSnapshot::new("X", 10.0)
            .with_indicator(keys::RETURN_ON_EQUITY, 0.2)
            .with_indicator(keys::BETA, 1.0)
            .with_indicator(keys::DIVIDEND_YIELD, 0.001);
        let r = Fundamentals.evaluate(&snap);
        assert_eq!(score_of(&r), 30);
        assert_eq!(r.reasons, vec!["High efficiency", "Low volatility"]);
        assert_eq!(r.label(), "Avoid");
    }

    #[test]
    fn hold_band() {
        let snap = MarketSnapshot::new("X", 10.0)
            .with_indicator(keys::RETURN_ON_EQUITY, 0.2)
            .with_indicator(keys::GROSS_MARGINS, 0.5)
            .with_indicator(keys::TRAILING_PE, 12.0);
        let r = Fundamentals.evaluate(&snap);
        assert_eq!(score_of(&r), 60);
        assert_eq!(r.label(), "Hold");
    }

    #[test]
    fn every_subset_stays_in_range_and_matches_weights() {
        let fired_values = [0.3, 0.5, 0.02, 0.5, 0.5, 10.0];
        let idle_values = [0.0, 0.0, 0.0, 0.0, 2.0, 40.0];
        for mask in 0u32..64 {
            let mut snap = MarketSnapshot::new("X", 10.0);
            let mut expected = 0u32;
            for (i, rule) in RULES.iter().enumerate() {
                let on = mask & (1 << i) != 0;
                let v = if on { fired_values[i] } else { idle_values[i] };
                snap = snap.with_indicator(rule.key, v);
                if on {
                    expected += u32::from(rule.weight);
                }
            }
            let r = Fundamentals.evaluate(&snap);
            assert_eq!(u32::from(score_of(&r)), expected);
            assert!(score_of(&r) <= MAX_SCORE);
            assert_eq!(r.reasons.len() as u32, mask.count_ones());
        }
    }
}
