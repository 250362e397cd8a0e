use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Fundamentals,
    Technical,
    /// Technical rules with `ema20` as the trend line, for short timeframes.
    TechnicalShort,
    Rsi,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Fundamentals => "fundamentals",
            StrategyKind::Technical => "technical",
            StrategyKind::TechnicalShort => "technical_short",
            StrategyKind::Rsi => "rsi",
        }
    }

    /// Whether the strategy scores indicators derived from price history
    /// rather than a quote snapshot.
    pub fn needs_history(self) -> bool {
        !matches!(self, StrategyKind::Fundamentals)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fundamentals" | "fundamental" => Ok(StrategyKind::Fundamentals),
            "technical" => Ok(StrategyKind::Technical),
            "technical_short" | "short" => Ok(StrategyKind::TechnicalShort),
            "rsi" => Ok(StrategyKind::Rsi),
            other => anyhow::bail!("unknown strategy: {other}"),
        }
    }
}

/// Verdict banding of a fundamentals score. Ordered `Avoid < Hold < StrongBuy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Band {
    Avoid,
    Hold,
    StrongBuy,
}

impl Band {
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=u8::MAX => Band::StrongBuy,
            50..=79 => Band::Hold,
            _ => Band::Avoid,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::Avoid => "Avoid",
            Band::Hold => "Hold",
            Band::StrongBuy => "Strong Buy",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Buy,
    Sell,
    Neutral,
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Buy => "BUY",
            Verdict::Sell => "SELL",
            Verdict::Neutral => "NEUTRAL",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Verdict::Buy),
            "SELL" => Some(Verdict::Sell),
            "NEUTRAL" | "HOLD" => Some(Verdict::Neutral),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Score { score: u8, band: Band },
    Verdict { verdict: Verdict },
    /// The snapshot could not be fetched; nothing was scored.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub ticker: String,
    pub strategy: StrategyKind,
    pub outcome: Outcome,
    pub reasons: Vec<String>,
}

impl ScoreResult {
    pub fn not_found(ticker: impl Into<String>, strategy: StrategyKind) -> Self {
        Self {
            ticker: ticker.into(),
            strategy,
            outcome: Outcome::NotFound,
            reasons: Vec::new(),
        }
    }

    /// Numeric score. Verdict strategies have none, even when the ticker
    /// was not found; for fundamentals `NotFound` counts as zero.
    pub fn score(&self) -> Option<u8> {
        match &self.outcome {
            Outcome::Score { score, .. } => Some(*score),
            Outcome::NotFound => (!self.strategy.needs_history()).then_some(0),
            Outcome::Verdict { .. } => None,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match &self.outcome {
            Outcome::Verdict { verdict } => Some(*verdict),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.outcome, Outcome::NotFound)
    }

    pub fn label(&self) -> &'static str {
        match &self.outcome {
            Outcome::Score { band, .. } => band.label(),
            Outcome::Verdict { verdict } => verdict.label(),
            Outcome::NotFound => "Not Found",
        }
    }
}
