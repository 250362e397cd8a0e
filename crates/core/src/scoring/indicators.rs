//! Price-history indicators used by the technical strategies.

use crate::domain::snapshot::{keys, Bar, MarketSnapshot};

pub const RSI_WINDOW: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential moving average over the whole series, seeded with the first
/// value (no bias adjustment).
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// RSI over the last `window` changes, using plain averages of gains and
/// losses. A window with no losses reads 100; a flat window reads 50.
pub fn rsi(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in (values.len() - window)..values.len() {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / window as f64;
    let avg_loss = losses / window as f64;
    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line (fast EMA minus slow EMA) and its signal line.
pub fn macd_series(values: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let fast = ema_series(values, MACD_FAST);
    let slow = ema_series(values, MACD_SLOW);
    let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema_series(&macd, MACD_SIGNAL);
    (macd, signal)
}

/// Builds a snapshot from a price history, latest bar last. Indicators that
/// need more samples than available are left out.
pub fn technical_snapshot(ticker: &str, bars: &[Bar]) -> Option<MarketSnapshot> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let price = *closes.last()?;

    let mut snap = MarketSnapshot::new(ticker, price).with_sample_count(closes.len());

    if let Some(v) = rsi(&closes, RSI_WINDOW) {
        snap = snap.with_indicator(keys::RSI, v);
    }

    let (macd, signal) = macd_series(&closes);
    let n = macd.len();
    snap = snap
        .with_indicator(keys::MACD, macd[n - 1])
        .with_indicator(keys::MACD_SIGNAL, signal[n - 1]);
    if n >= 2 {
        snap = snap
            .with_indicator(keys::PREV_MACD, macd[n - 2])
            .with_indicator(keys::PREV_MACD_SIGNAL, signal[n - 2]);
    }

    if let Some(v) = sma(&closes, 50) {
        snap = snap.with_indicator(keys::SMA_50, v);
    }
    if let Some(v) = sma(&closes, 200) {
        snap = snap.with_indicator(keys::SMA_200, v);
    }
    if closes.len() >= 20 {
        if let Some(v) = ema_series(&closes, 20).last() {
            snap = snap.with_indicator(keys::EMA_20, *v);
        }
    }

    Some(snap)
}
