//! Cash balance and positions of one paper-trading account.
//!
//! Every operation is all-or-nothing: a rejected buy or sell leaves the
//! account exactly as it was. Persisting the result is the caller's job.

use anyhow::ensure;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Average cost is kept to this many decimal places.
pub const AVERAGE_COST_DP: u32 = 8;
/// Quote prices are rounded to this many decimal places before trading.
pub const PRICE_DP: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("price must be positive (got {0})")]
    InvalidPrice(Decimal),
    #[error("insufficient funds: cost {cost} exceeds cash balance {available}")]
    InsufficientFunds { cost: Decimal, available: Decimal },
    #[error("insufficient shares of {ticker}: requested {requested}, held {held}")]
    InsufficientShares {
        ticker: String,
        requested: u64,
        held: u64,
    },
    #[error("no open position in {0}")]
    NoPosition(String),
    #[error("trade value out of range")]
    Overflow,
}

impl LedgerError {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerError::InvalidQuantity => "invalid_quantity",
            LedgerError::InvalidPrice(_) => "invalid_price",
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::InsufficientShares { .. } => "insufficient_shares",
            LedgerError::NoPosition(_) => "no_position",
            LedgerError::Overflow => "overflow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_cost: Decimal,
}

impl Position {
    /// `None` when the valuation does not fit in a `Decimal`.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Option<Decimal> {
        current_price
            .checked_sub(self.average_cost)?
            .checked_mul(Decimal::from(self.quantity))
    }

    pub fn market_value(&self, current_price: Decimal) -> Option<Decimal> {
        Decimal::from(self.quantity).checked_mul(current_price)
    }
}

/// Persisted as `{"cashBalance": n, "positions": {"T": {"quantity": q, "averageCost": c}}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(with = "rust_decimal::serde::float")]
    pub cash_balance: Decimal,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub side: Side,
    pub ticker: String,
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cash_balance: Decimal,
    /// Position after the trade; `None` once it is closed.
    pub position: Option<Position>,
    /// `(price - averageCost) * quantity` for sells. Reported, not stored.
    #[serde(with = "rust_decimal::serde::float_option")]
    pub realized_pnl: Option<Decimal>,
}

impl Account {
    pub fn open(starting_balance: Decimal) -> Self {
        Self {
            cash_balance: starting_balance,
            positions: BTreeMap::new(),
        }
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    /// Checks a loaded account before it is traded against.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.cash_balance >= Decimal::ZERO,
            "cash balance must be non-negative (got {})",
            self.cash_balance
        );
        for (ticker, pos) in &self.positions {
            ensure!(!ticker.trim().is_empty(), "position ticker must be non-empty");
            ensure!(pos.quantity > 0, "position {ticker} has zero quantity");
            ensure!(
                pos.average_cost > Decimal::ZERO,
                "position {ticker} has non-positive average cost"
            );
        }
        Ok(())
    }

    pub fn buy(
        &mut self,
        ticker: &str,
        quantity: u64,
        price: Decimal,
    ) -> Result<TradeReceipt, LedgerError> {
        check_order(quantity, price)?;
        let cost = trade_value(quantity, price)?;
        if cost > self.cash_balance {
            return Err(LedgerError::InsufficientFunds {
                cost,
                available: self.cash_balance,
            });
        }

        let next = match self.positions.get(ticker) {
            Some(old) => {
                let total_qty = old
                    .quantity
                    .checked_add(quantity)
                    .ok_or(LedgerError::Overflow)?;
                let old_cost = trade_value(old.quantity, old.average_cost)?;
                let total_cost = old_cost.checked_add(cost).ok_or(LedgerError::Overflow)?;
                let average = (total_cost / Decimal::from(total_qty))
                    .round_dp_with_strategy(AVERAGE_COST_DP, RoundingStrategy::MidpointAwayFromZero);
                Position {
                    quantity: total_qty,
                    average_cost: average,
                }
            }
            None => Position {
                quantity,
                average_cost: price,
            },
        };

        // All checks passed; mutate.
        self.cash_balance -= cost;
        self.positions.insert(ticker.to_string(), next.clone());

        Ok(TradeReceipt {
            side: Side::Buy,
            ticker: ticker.to_string(),
            quantity,
            price,
            value: cost,
            cash_balance: self.cash_balance,
            position: Some(next),
            realized_pnl: None,
        })
    }

    pub fn sell(
        &mut self,
        ticker: &str,
        quantity: u64,
        price: Decimal,
    ) -> Result<TradeReceipt, LedgerError> {
        check_order(quantity, price)?;
        let held = self
            .positions
            .get(ticker)
            .ok_or_else(|| LedgerError::NoPosition(ticker.to_string()))?;
        if quantity > held.quantity {
            return Err(LedgerError::InsufficientShares {
                ticker: ticker.to_string(),
                requested: quantity,
                held: held.quantity,
            });
        }

        let proceeds = trade_value(quantity, price)?;
        let realized = price
            .checked_sub(held.average_cost)
            .and_then(|d| d.checked_mul(Decimal::from(quantity)))
            .ok_or(LedgerError::Overflow)?;
        let remaining = held.quantity - quantity;
        let average_cost = held.average_cost;

        self.cash_balance = self
            .cash_balance
            .checked_add(proceeds)
            .ok_or(LedgerError::Overflow)?;
        let position = if remaining == 0 {
            self.positions.remove(ticker);
            None
        } else {
            let pos = Position {
                quantity: remaining,
                average_cost,
            };
            self.positions.insert(ticker.to_string(), pos.clone());
            Some(pos)
        };

        Ok(TradeReceipt {
            side: Side::Sell,
            ticker: ticker.to_string(),
            quantity,
            price,
            value: proceeds,
            cash_balance: self.cash_balance,
            position,
            realized_pnl: Some(realized),
        })
    }

    /// Unrealized P&L per open position. Tickers missing from `prices`, or
    /// whose valuation overflows, are reported without one.
    pub fn report(&self, prices: &HashMap<String, Decimal>) -> PortfolioReport {
        let mut holdings = Vec::with_capacity(self.positions.len());
        let mut total = Decimal::ZERO;
        let mut market_value = Decimal::ZERO;
        let mut complete = true;

        for (ticker, pos) in &self.positions {
            let valued = prices.get(ticker).copied().and_then(|p| {
                let pnl = pos.unrealized_pnl(p)?;
                let next_total = total.checked_add(pnl)?;
                let next_value = market_value.checked_add(pos.market_value(p)?)?;
                Some((p, pnl, next_total, next_value))
            });
            let (current_price, unrealized_pnl) = match valued {
                Some((p, pnl, next_total, next_value)) => {
                    total = next_total;
                    market_value = next_value;
                    (Some(p), Some(pnl))
                }
                None => {
                    complete = false;
                    (None, None)
                }
            };
            holdings.push(Holding {
                ticker: ticker.clone(),
                quantity: pos.quantity,
                average_cost: pos.average_cost,
                current_price,
                unrealized_pnl,
            });
        }

        PortfolioReport {
            cash_balance: self.cash_balance,
            holdings,
            market_value,
            total_unrealized_pnl: total,
            complete,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub ticker: String,
    pub quantity: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_cost: Decimal,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub current_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub unrealized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortfolioReport {
    #[serde(with = "rust_decimal::serde::float")]
    pub cash_balance: Decimal,
    pub holdings: Vec<Holding>,
    /// Market value of the holdings that could be priced.
    #[serde(with = "rust_decimal::serde::float")]
    pub market_value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_unrealized_pnl: Decimal,
    /// False when at least one holding could not be priced.
    pub complete: bool,
}

/// Converts a quote price into a trade price.
pub fn price_from_f64(price: f64) -> Option<Decimal> {
    let d = Decimal::from_f64(price)?;
    Some(d.round_dp_with_strategy(PRICE_DP, RoundingStrategy::MidpointAwayFromZero))
}

fn check_order(quantity: u64, price: Decimal) -> Result<(), LedgerError> {
    if quantity == 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    if price <= Decimal::ZERO {
        return Err(LedgerError::InvalidPrice(price));
    }
    Ok(())
}

fn trade_value(quantity: u64, price: Decimal) -> Result<Decimal, LedgerError> {
    Decimal::from(quantity)
        .checked_mul(price)
        .ok_or(LedgerError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn fresh() -> Account {
        Account::open(dec!(1000000))
    }

    #[test]
    fn first_buy_opens_position_at_price() {
        let mut acct = fresh();
        let receipt = acct.buy("RELIANCE.NS", 10, dec!(2456.35)).unwrap();
        assert_eq!(receipt.value, dec!(24563.5));
        assert_eq!(acct.cash_balance, dec!(975436.5));
        let pos = acct.position("RELIANCE.NS").unwrap();
        assert_eq!(pos.quantity, 10);
        assert_eq!(pos.average_cost, dec!(2456.35));
    }

    #[test]
    fn second_buy_recomputes_average_cost() {
        let mut acct = fresh();
        acct.buy("X", 10, dec!(100)).unwrap();
        acct.buy("X", 10, dec!(200)).unwrap();
        let pos = acct.position("X").unwrap();
        assert_eq!(pos.quantity, 20);
        assert_eq!(pos.average_cost, dec!(150));
        assert_eq!(acct.cash_balance, dec!(997000));
    }

    #[test]
    fn average_cost_is_rounded() {
        let mut acct = fresh();
        acct.buy("X", 1, dec!(10)).unwrap();
        acct.buy("X", 2, dec!(10.01)).unwrap();
        // 30.02 / 3
        assert_eq!(acct.position("X").unwrap().average_cost, dec!(10.00666667));
    }

    #[test]
    fn insufficient_funds_leaves_account_untouched() {
        let mut acct = Account::open(dec!(1000));
        let before = acct.clone();
        let err = acct.buy("X", 100, dec!(50)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                cost: dec!(5000),
                available: dec!(1000)
            }
        );
        assert_eq!(acct, before);
        assert!(acct.position("X").is_none());
    }

    #[test]
    fn buy_spending_entire_balance_is_allowed() {
        let mut acct = Account::open(dec!(1000));
        acct.buy("X", 10, dec!(100)).unwrap();
        assert_eq!(acct.cash_balance, Decimal::ZERO);
    }

    #[test]
    fn rejects_zero_quantity_and_non_positive_price() {
        let mut acct = fresh();
        assert_eq!(acct.buy("X", 0, dec!(1)), Err(LedgerError::InvalidQuantity));
        assert_eq!(
            acct.buy("X", 1, dec!(0)),
            Err(LedgerError::InvalidPrice(dec!(0)))
        );
        acct.buy("X", 1, dec!(1)).unwrap();
        assert_eq!(acct.sell("X", 0, dec!(1)), Err(LedgerError::InvalidQuantity));
        assert_eq!(
            acct.sell("X", 1, dec!(-3)),
            Err(LedgerError::InvalidPrice(dec!(-3)))
        );
    }

    #[test]
    fn buy_then_sell_round_trips_cash_and_removes_position() {
        let mut acct = fresh();
        let before = acct.cash_balance;
        acct.buy("TCS.NS", 7, dec!(3512.45)).unwrap();
        let receipt = acct.sell("TCS.NS", 7, dec!(3512.45)).unwrap();
        assert_eq!(acct.cash_balance, before);
        assert!(acct.positions.is_empty());
        assert_eq!(receipt.position, None);
        assert_eq!(receipt.realized_pnl, Some(Decimal::ZERO));
    }

    #[test]
    fn partial_sell_keeps_average_cost() {
        let mut acct = fresh();
        acct.buy("X", 10, dec!(100)).unwrap();
        acct.buy("X", 10, dec!(200)).unwrap();
        let receipt = acct.sell("X", 5, dec!(180)).unwrap();
        assert_eq!(receipt.realized_pnl, Some(dec!(150)));
        let pos = acct.position("X").unwrap();
        assert_eq!(pos.quantity, 15);
        assert_eq!(pos.average_cost, dec!(150));
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let mut acct = fresh();
        let before = acct.clone();
        assert_eq!(
            acct.sell("Y", 1, dec!(100)),
            Err(LedgerError::NoPosition("Y".to_string()))
        );
        assert_eq!(acct, before);
    }

    #[test]
    fn oversell_is_rejected() {
        let mut acct = fresh();
        acct.buy("X", 3, dec!(10)).unwrap();
        let before = acct.clone();
        let err = acct.sell("X", 4, dec!(10)).unwrap_err();
        assert_eq!(err.kind(), "insufficient_shares");
        assert_eq!(acct, before);
    }

    #[test]
    fn report_values_open_positions() {
        let mut acct = fresh();
        acct.buy("A", 10, dec!(100)).unwrap();
        acct.buy("B", 5, dec!(20)).unwrap();

        let prices = HashMap::from([("A".to_string(), dec!(110))]);
        let report = acct.report(&prices);
        assert_eq!(report.holdings.len(), 2);
        assert_eq!(report.holdings[0].unrealized_pnl, Some(dec!(100)));
        assert_eq!(report.holdings[1].current_price, None);
        assert_eq!(report.total_unrealized_pnl, dec!(100));
        assert_eq!(report.market_value, dec!(1100));
        assert!(!report.complete);
    }

    #[test]
    fn report_leaves_overflowing_valuations_unpriced() {
        let mut acct = fresh();
        acct.buy("X", 1_000_000, dec!(1)).unwrap();
        acct.buy("Y", 1, dec!(10)).unwrap();

        let huge = price_from_f64(1e25).unwrap();
        let prices = HashMap::from([("X".to_string(), huge), ("Y".to_string(), dec!(12))]);
        let report = acct.report(&prices);

        let x = &report.holdings[0];
        assert_eq!(x.ticker, "X");
        assert_eq!(x.current_price, None);
        assert_eq!(x.unrealized_pnl, None);
        assert_eq!(report.holdings[1].unrealized_pnl, Some(dec!(2)));
        assert_eq!(report.total_unrealized_pnl, dec!(2));
        assert_eq!(report.market_value, dec!(12));
        assert!(!report.complete);
    }

    #[test]
    fn persisted_shape_round_trips() {
        let mut acct = fresh();
        acct.buy("RELIANCE.NS", 10, dec!(2456.35)).unwrap();
        acct.buy("RELIANCE.NS", 5, dec!(2500)).unwrap();

        let v = serde_json::to_value(&acct).unwrap();
        assert!(v["cashBalance"].is_number());
        assert_eq!(v["positions"]["RELIANCE.NS"]["quantity"], json!(15));
        assert!(v["positions"]["RELIANCE.NS"]["averageCost"].is_number());

        let back: Account = serde_json::from_value(v).unwrap();
        assert_eq!(back, acct);
    }

    #[test]
    fn parses_hand_written_account() {
        let v = json!({
            "cashBalance": 1000000.0,
            "positions": {"TCS.NS": {"quantity": 3, "averageCost": 3500.5}}
        });
        let acct: Account = serde_json::from_value(v).unwrap();
        acct.validate().unwrap();
        assert_eq!(acct.cash_balance, dec!(1000000));
        assert_eq!(acct.position("TCS.NS").unwrap().average_cost, dec!(3500.5));
    }

    #[test]
    fn validate_rejects_zero_quantity_residue() {
        let v = json!({
            "cashBalance": 10.0,
            "positions": {"X": {"quantity": 0, "averageCost": 1.0}}
        });
        let acct: Account = serde_json::from_value(v).unwrap();
        assert!(acct.validate().is_err());
    }

    #[test]
    fn quote_prices_are_rounded() {
        assert_eq!(price_from_f64(2456.35), Some(dec!(2456.35)));
        assert_eq!(price_from_f64(10.123456), Some(dec!(10.1235)));
    }
}
