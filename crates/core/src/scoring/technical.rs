use crate::domain::score::{Outcome, ScoreResult, StrategyKind, Verdict};
use crate::domain::snapshot::{keys, MarketSnapshot};
use crate::scoring::Strategy;

pub const INSUFFICIENT_DATA: &str = "Insufficient data";
pub const NO_CLEAR_SETUP: &str = "No clear setup";

/// Priority-ordered RSI / trend / MACD rules. The first rule that matches
/// decides the verdict.
#[derive(Debug, Clone, Copy)]
pub struct TechnicalRules {
    kind: StrategyKind,
    /// Indicator compared against price for the uptrend check.
    pub trend_key: &'static str,
    pub min_samples: usize,
    pub oversold_below: f64,
    pub overbought_above: f64,
}

impl TechnicalRules {
    pub const fn long_term() -> Self {
        Self {
            kind: StrategyKind::Technical,
            trend_key: keys::SMA_200,
            min_samples: 200,
            oversold_below: 30.0,
            overbought_above: 70.0,
        }
    }

    /// Intraday / short timeframes: `ema20` replaces the 200-day average.
    pub const fn short_term() -> Self {
        Self {
            kind: StrategyKind::TechnicalShort,
            trend_key: keys::EMA_20,
            min_samples: 35,
            oversold_below: 30.0,
            overbought_above: 70.0,
        }
    }

    fn decide(&self, s: &MarketSnapshot) -> (Verdict, &'static str) {
        if s.sample_count < self.min_samples {
            return (Verdict::Neutral, INSUFFICIENT_DATA);
        }

        let rsi = s.indicator(keys::RSI);
        let trend = s.indicator(self.trend_key);

        if let (Some(rsi), Some(trend)) = (rsi, trend) {
            if rsi < self.oversold_below && s.price > trend {
                return (Verdict::Buy, "Oversold in uptrend");
            }
        }
        if rsi.is_some_and(|rsi| rsi > self.overbought_above) {
            return (Verdict::Sell, "Overbought");
        }

        if let Some(cross) = macd_cross(s) {
            return cross;
        }

        (Verdict::Neutral, NO_CLEAR_SETUP)
    }
}

impl Default for TechnicalRules {
    fn default() -> Self {
        Self::long_term()
    }
}

fn macd_cross(s: &MarketSnapshot) -> Option<(Verdict, &'static str)> {
    let macd = s.indicator(keys::MACD)?;
    let signal = s.indicator(keys::MACD_SIGNAL)?;
    let prev_macd = s.indicator(keys::PREV_MACD)?;
    let prev_signal = s.indicator(keys::PREV_MACD_SIGNAL)?;

    if macd > signal && prev_macd <= prev_signal {
        Some((Verdict::Buy, "MACD bullish crossover"))
    } else if macd < signal && prev_macd >= prev_signal {
        Some((Verdict::Sell, "MACD bearish crossover"))
    } else {
        None
    }
}

impl Strategy for TechnicalRules {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn evaluate(&self, snapshot: &MarketSnapshot) -> ScoreResult {
        let (verdict, reason) = self.decide(snapshot);
        verdict_result(snapshot, self.kind, verdict, reason)
    }
}

/// Single-indicator variant: RSI bands only.
#[derive(Debug, Clone, Copy)]
pub struct RsiOnly {
    pub oversold_below: f64,
    pub overbought_above: f64,
}

impl RsiOnly {
    pub const fn standard() -> Self {
        Self {
            oversold_below: 35.0,
            overbought_above: 65.0,
        }
    }
}

impl Default for RsiOnly {
    fn default() -> Self {
        Self::standard()
    }
}

impl Strategy for RsiOnly {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rsi
    }

    fn evaluate(&self, snapshot: &MarketSnapshot) -> ScoreResult {
        let (verdict, reason) = match snapshot.indicator(keys::RSI) {
            Some(rsi) if rsi < self.oversold_below => (Verdict::Buy, "RSI oversold"),
            Some(rsi) if rsi > self.overbought_above => (Verdict::Sell, "RSI overbought"),
            _ => (Verdict::Neutral, NO_CLEAR_SETUP),
        };
        verdict_result(snapshot, StrategyKind::Rsi, verdict, reason)
    }
}

fn verdict_result(
    snapshot: &MarketSnapshot,
    kind: StrategyKind,
    verdict: Verdict,
    reason: &str,
) -> ScoreResult {
    ScoreResult {
        ticker: snapshot.ticker.clone(),
        strategy: kind,
        outcome: Outcome::Verdict { verdict },
        reasons: vec![reason.to_string()],
    }
}
