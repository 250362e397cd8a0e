pub mod fundamentals;
pub mod indicators;
pub mod technical;

use crate::domain::score::{ScoreResult, StrategyKind};
use crate::domain::snapshot::MarketSnapshot;

pub use fundamentals::Fundamentals;
pub use technical::{RsiOnly, TechnicalRules};

/// A scoring rule set. Pure: the same snapshot always yields the same result.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn evaluate(&self, snapshot: &MarketSnapshot) -> ScoreResult;
}

static FUNDAMENTALS: Fundamentals = Fundamentals;
static TECHNICAL: TechnicalRules = TechnicalRules::long_term();
static TECHNICAL_SHORT: TechnicalRules = TechnicalRules::short_term();
static RSI_ONLY: RsiOnly = RsiOnly::standard();

pub fn strategy_for(kind: StrategyKind) -> &'static dyn Strategy {
    match kind {
        StrategyKind::Fundamentals => &FUNDAMENTALS,
        StrategyKind::Technical => &TECHNICAL,
        StrategyKind::TechnicalShort => &TECHNICAL_SHORT,
        StrategyKind::Rsi => &RSI_ONLY,
    }
}

pub fn evaluate(kind: StrategyKind, snapshot: &MarketSnapshot) -> ScoreResult {
    strategy_for(kind).evaluate(snapshot)
}
