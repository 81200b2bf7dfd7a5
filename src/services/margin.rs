//! Margin, cost-basis and PnL arithmetic.
//!
//! Pure functions with no owned state, shared by the ledger and the read
//! side of the API.

use crate::types::{AccountType, Asset, PortfolioSummary, PositionView};
use std::collections::HashMap;

/// Remaining quantity below which a position counts as fully closed.
pub const DUST_EPSILON: f64 = 1e-6;

/// Cash needed to open `notional` at `leverage`.
pub fn margin_required(notional: f64, leverage: f64) -> f64 {
    notional / leverage
}

/// Portion of `notional` financed by synthetic debt.
pub fn borrowed_amount(notional: f64, leverage: f64) -> f64 {
    notional - margin_required(notional, leverage)
}

pub fn position_value(position: &Asset, current_price: f64) -> f64 {
    position.quantity * current_price
}

pub fn unrealized_pnl(position: &Asset, current_price: f64) -> f64 {
    position_value(position, current_price) - position.cost_basis()
}

/// Unrealized PnL as a percentage of cost basis; `None` when the basis is 0.
pub fn pnl_percent(position: &Asset, current_price: f64) -> Option<f64> {
    let basis = position.cost_basis();
    if basis == 0.0 || !basis.is_finite() {
        return None;
    }
    Some(unrealized_pnl(position, current_price) / basis * 100.0)
}

/// Position value minus the debt carried against it.
pub fn net_equity(position: &Asset, current_price: f64) -> f64 {
    position_value(position, current_price) - position.borrowed
}

/// Cash plus the net equity of every position. Positions without a price
/// in `prices` are valued at zero.
pub fn total_net_worth<'a, I>(balance: f64, positions: I, prices: &HashMap<String, f64>) -> f64
where
    I: IntoIterator<Item = &'a Asset>,
{
    balance
        + positions
            .into_iter()
            .map(|p| net_equity(p, price_of(prices, &p.symbol)))
            .sum::<f64>()
}

pub fn buying_power(balance: f64, leverage: f64) -> f64 {
    balance * leverage
}

/// Weighted-average entry price after adding `quantity` at `price`.
pub fn weighted_average_price(old_quantity: f64, old_avg_price: f64, quantity: f64, price: f64) -> f64 {
    let new_quantity = old_quantity + quantity;
    if new_quantity == 0.0 {
        return 0.0;
    }
    (old_quantity * old_avg_price + quantity * price) / new_quantity
}

/// Debt repaid when selling `quantity` out of `old_quantity`, proportional
/// to the fraction liquidated.
pub fn borrowed_repaid(old_borrowed: f64, old_quantity: f64, quantity: f64) -> f64 {
    if old_quantity <= 0.0 {
        return 0.0;
    }
    old_borrowed * (quantity / old_quantity)
}

/// Value every position at the prices in `prices` and total the account.
pub fn summarize(
    account: AccountType,
    balance: f64,
    positions: &[Asset],
    prices: &HashMap<String, f64>,
    leverage: f64,
) -> PortfolioSummary {
    let views: Vec<PositionView> = positions
        .iter()
        .map(|asset| {
            let current_price = price_of(prices, &asset.symbol);
            PositionView {
                asset: asset.clone(),
                current_price,
                value: position_value(asset, current_price),
                unrealized_pnl: unrealized_pnl(asset, current_price),
                pnl_percent: pnl_percent(asset, current_price),
                net_equity: net_equity(asset, current_price),
            }
        })
        .collect();

    let gross_value = views.iter().map(|v| v.value).sum();
    let total_borrowed = positions.iter().map(|p| p.borrowed).sum();

    PortfolioSummary {
        account,
        balance,
        net_worth: total_net_worth(balance, positions, prices),
        positions: views,
        gross_value,
        total_borrowed,
        buying_power: buying_power(balance, leverage),
        leverage,
    }
}

fn price_of(prices: &HashMap<String, f64>, symbol: &str) -> f64 {
    prices.get(symbol).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn btc(quantity: f64, avg_price: f64, borrowed: f64) -> Asset {
        Asset {
            symbol: "BTC".to_string(),
            quantity,
            avg_price,
            borrowed,
        }
    }

    #[test]
    fn test_margin_required_at_leverage_one() {
        assert_eq!(margin_required(5_000.0, 1.0), 5_000.0);
        assert_eq!(borrowed_amount(5_000.0, 1.0), 0.0);
    }

    #[test]
    fn test_margin_required_leveraged() {
        assert_eq!(margin_required(5_000.0, 2.0), 2_500.0);
        assert_eq!(borrowed_amount(5_000.0, 2.0), 2_500.0);
    }

    #[test]
    fn test_pnl_and_equity() {
        let position = btc(0.1, 50_000.0, 2_500.0);
        assert!((position_value(&position, 60_000.0) - 6_000.0).abs() < 1e-9);
        assert!((unrealized_pnl(&position, 60_000.0) - 1_000.0).abs() < 1e-9);
        assert!((pnl_percent(&position, 60_000.0).unwrap() - 20.0).abs() < 1e-9);
        assert!((net_equity(&position, 60_000.0) - 3_500.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_percent_suppressed_for_zero_basis() {
        let position = btc(1.0, 0.0, 0.0);
        assert_eq!(pnl_percent(&position, 10.0), None);
    }

    #[test]
    fn test_total_net_worth() {
        let positions = vec![
            btc(0.1, 50_000.0, 2_500.0),
            Asset {
                symbol: "ETH".to_string(),
                quantity: 2.0,
                avg_price: 3_000.0,
                borrowed: 0.0,
            },
        ];
        let prices = HashMap::from([
            ("BTC".to_string(), 60_000.0),
            ("ETH".to_string(), 2_000.0),
        ]);
        let worth = total_net_worth(1_000.0, &positions, &prices);
        assert!((worth - (1_000.0 + 3_500.0 + 4_000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_price_values_position_at_zero() {
        let positions = vec![btc(1.0, 100.0, 40.0)];
        let worth = total_net_worth(10.0, &positions, &HashMap::new());
        assert!((worth - (10.0 - 40.0)).abs() < 1e-9);
    }

    #[test]
    fn test_buying_power() {
        assert_eq!(buying_power(1_000.0, 50.0), 50_000.0);
    }

    #[test]
    fn test_weighted_average_price() {
        let avg = weighted_average_price(1.0, 100.0, 1.0, 200.0);
        assert_eq!(avg, 150.0);
        assert_eq!(weighted_average_price(0.0, 0.0, 2.0, 42.0), 42.0);
    }

    #[test]
    fn test_borrowed_repaid_proportional() {
        assert_eq!(borrowed_repaid(1_000.0, 4.0, 1.0), 250.0);
        assert_eq!(borrowed_repaid(1_000.0, 4.0, 4.0), 1_000.0);
        assert_eq!(borrowed_repaid(1_000.0, 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_summarize() {
        let positions = vec![btc(0.1, 50_000.0, 2_500.0)];
        let prices = HashMap::from([("BTC".to_string(), 60_000.0)]);
        let summary = summarize(AccountType::Demo, 7_500.0, &positions, &prices, 2.0);
        assert_eq!(summary.positions.len(), 1);
        assert!((summary.gross_value - 6_000.0).abs() < 1e-9);
        assert!((summary.net_worth - 11_000.0).abs() < 1e-9);
        assert_eq!(summary.total_borrowed, 2_500.0);
        assert_eq!(summary.buying_power, 15_000.0);
    }

    proptest! {
        #[test]
        fn prop_margin_strictly_decreasing_in_leverage(
            notional in 1.0f64..1e9,
            low in 1.0f64..199.0,
            step in 0.5f64..100.0,
        ) {
            let high = low + step;
            prop_assert!(margin_required(notional, high) < margin_required(notional, low));
        }

        #[test]
        fn prop_margin_plus_borrowed_is_notional(notional in 0.0f64..1e9, leverage in 1.0f64..200.0) {
            let total = margin_required(notional, leverage) + borrowed_amount(notional, leverage);
            prop_assert!((total - notional).abs() <= notional * 1e-12 + 1e-9);
        }
    }
}
