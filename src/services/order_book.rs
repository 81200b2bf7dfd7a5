//! Illustrative order book.
//!
//! Generated around the last price for display. Never persisted and never
//! matched against.

use crate::types::{OrderBook, OrderBookItem};
use rand::Rng;

/// Levels per side.
pub const DEFAULT_DEPTH: usize = 6;

const SPREAD: f64 = 0.0005;
const STEP: f64 = 0.0002;
const MAX_LEVEL_QTY: f64 = 2.0;

/// Build `depth` bids and asks around `price`. Returns an empty book for a
/// price that is not positive.
pub fn illustrative(symbol: &str, price: f64, depth: usize) -> OrderBook {
    illustrative_with(symbol, price, depth, &mut rand::thread_rng())
}

pub fn illustrative_with<R: Rng>(symbol: &str, price: f64, depth: usize, rng: &mut R) -> OrderBook {
    if !price.is_finite() || price <= 0.0 {
        return OrderBook {
            symbol: symbol.to_string(),
            buy: Vec::new(),
            sell: Vec::new(),
        };
    }

    let spread = price * SPREAD;
    let mut side = |sign: f64| {
        let mut total = 0.0;
        (0..depth)
            .map(|i| {
                let qty = rng.gen::<f64>() * MAX_LEVEL_QTY;
                total += qty;
                OrderBookItem {
                    price: price + sign * (spread + i as f64 * price * STEP),
                    qty,
                    total,
                }
            })
            .collect::<Vec<_>>()
    };

    let buy = side(-1.0);
    let mut sell = side(1.0);
    sell.reverse();

    OrderBook {
        symbol: symbol.to_string(),
        buy,
        sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_book_brackets_price() {
        let mut rng = StdRng::seed_from_u64(7);
        let book = illustrative_with("BTC", 50_000.0, DEFAULT_DEPTH, &mut rng);
        assert_eq!(book.buy.len(), 6);
        assert_eq!(book.sell.len(), 6);

        let best_bid = book.buy[0].price;
        let best_ask = book.sell.last().unwrap().price;
        assert!((best_bid - 49_975.0).abs() < 1e-6);
        assert!((best_ask - 50_025.0).abs() < 1e-6);

        assert!(book.buy.windows(2).all(|w| w[0].price > w[1].price));
        assert!(book.sell.windows(2).all(|w| w[0].price > w[1].price));
        assert!(book.buy.windows(2).all(|w| w[0].total <= w[1].total));
        assert!(book.buy.iter().all(|l| (0.0..2.0).contains(&l.qty)));
    }

    #[test]
    fn test_empty_book_without_price() {
        let book = illustrative("ETH", 0.0, DEFAULT_DEPTH);
        assert!(book.buy.is_empty());
        assert!(book.sell.is_empty());
    }
}
