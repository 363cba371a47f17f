//! Price and quantity conformance math.
//!
//! Everything submitted to the exchange must divide evenly by the symbol's
//! step/tick and respect the quantity and notional floors. These functions
//! are pure so the arithmetic is testable without a gateway.

use api_client::SymbolRules;
use rust_decimal::Decimal;

/// Half-up rounding to a multiple of `step`: `floor(x/step + 0.5) * step`.
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() {
        return value;
    }
    let half = Decimal::new(5, 1);
    ((value / step) + half).floor() * step
}

/// Truncates to a fixed number of decimal places. Used when the exchange
/// publishes no filter for a dimension and only a precision remains.
pub fn truncate_to_precision(value: Decimal, precision: u32) -> Decimal {
    value.trunc_with_scale(precision)
}

fn clamp(value: Decimal, min: Option<Decimal>, max: Option<Decimal>) -> Decimal {
    let mut value = value;
    if let Some(min) = min {
        value = value.max(min);
    }
    if let Some(max) = max {
        value = value.min(max);
    }
    value
}

/// The take-profit and stop-loss trigger prices for a LONG entry.
///
/// `target_percent` and `stoploss_percent` are expressed in account-return
/// terms, so they are divided by leverage to get the price move: +20% on
/// margin at 10x needs a 2% move in price.
pub fn protective_prices(
    entry: Decimal,
    target_percent: Decimal,
    stoploss_percent: Decimal,
    leverage: i64,
) -> (Decimal, Decimal) {
    let leverage = Decimal::from(leverage.max(1));
    let tp = entry * (Decimal::ONE + target_percent / leverage);
    let sl = entry * (Decimal::ONE - stoploss_percent / leverage);
    (tp, sl)
}

/// Conforms an order quantity to the symbol's lot filter, then enforces the
/// notional floor by bumping and re-rounding when needed.
pub fn conform_quantity(raw_qty: Decimal, entry_price: Decimal, rules: &SymbolRules) -> Decimal {
    let round = |qty: Decimal| match rules.step_size {
        Some(step) if !step.is_zero() => {
            clamp(round_to_step(qty, step), rules.min_qty, rules.max_qty)
        }
        _ => truncate_to_precision(qty, rules.quantity_precision),
    };

    let mut qty = round(raw_qty);

    if let Some(min_notional) = rules.min_notional {
        if !entry_price.is_zero() && qty * entry_price < min_notional {
            qty = round(min_notional / entry_price);
        }
    }
    qty
}

/// Conforms a trigger price to the symbol's price filter.
pub fn conform_price(price: Decimal, rules: &SymbolRules) -> Decimal {
    match rules.tick_size {
        Some(tick) if !tick.is_zero() => {
            clamp(round_to_step(price, tick), rules.min_price, rules.max_price)
        }
        _ => truncate_to_precision(price, rules.price_precision),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// BTCUSDT-like rules from the exchange-info endpoint.
    fn btc_rules() -> SymbolRules {
        SymbolRules {
            step_size: Some(dec!(0.001)),
            min_qty: Some(dec!(0.001)),
            max_qty: Some(dec!(1000)),
            tick_size: Some(dec!(0.10)),
            min_price: Some(dec!(0.10)),
            max_price: Some(dec!(1000000)),
            min_notional: Some(dec!(5)),
            price_precision: 2,
            quantity_precision: 3,
        }
    }

    #[test]
    fn round_to_step_is_half_up() {
        let step = dec!(0.001);
        assert_eq!(round_to_step(dec!(0.0024), step), dec!(0.002));
        assert_eq!(round_to_step(dec!(0.0025), step), dec!(0.003));
        assert_eq!(round_to_step(dec!(0.002), step), dec!(0.002));
    }

    #[test]
    fn happy_path_sizing_matches_reference_numbers() {
        // order_amount = 100, entry = 50000, leverage 10, target 0.02, stop 0.01
        let entry = dec!(50000.00);
        let qty = conform_quantity(dec!(100) / entry, entry, &btc_rules());
        assert_eq!(qty, dec!(0.002));

        let (tp, sl) = protective_prices(entry, dec!(0.02), dec!(0.01), 10);
        assert_eq!(conform_price(tp, &btc_rules()), dec!(50100.00));
        assert_eq!(conform_price(sl, &btc_rules()), dec!(49950.00));
    }

    #[test]
    fn quantity_below_min_is_clamped_and_satisfies_notional() {
        // order_amount = 3 at 50000 computes 0.00006, which rounds to zero
        // and is clamped up to minQty.
        let entry = dec!(50000);
        let qty = conform_quantity(dec!(3) / entry, entry, &btc_rules());
        assert_eq!(qty, dec!(0.001));
        assert!(qty * entry >= dec!(5));
    }

    #[test]
    fn notional_floor_bumps_quantity() {
        let mut rules = btc_rules();
        rules.min_qty = Some(dec!(0.00001));
        rules.step_size = Some(dec!(0.00001));
        // 0.00006 * 50000 = 3 < 5, so the quantity is bumped to 5/50000.
        let entry = dec!(50000);
        let qty = conform_quantity(dec!(0.00006), entry, &rules);
        assert_eq!(qty, dec!(0.00010));
        assert!(qty * entry >= dec!(5));
    }

    #[test]
    fn missing_filters_fall_back_to_precision_truncation() {
        let rules = SymbolRules {
            price_precision: 2,
            quantity_precision: 3,
            ..SymbolRules::default()
        };
        assert_eq!(conform_quantity(dec!(0.0026999), dec!(1), &rules), dec!(0.002));
        assert_eq!(conform_price(dec!(50100.119), &rules), dec!(50100.11));
    }

    #[test]
    fn quantity_above_max_is_clamped_down() {
        let entry = dec!(0.5);
        let qty = conform_quantity(dec!(100000) / entry, entry, &btc_rules());
        assert_eq!(qty, dec!(1000));
    }

    #[test]
    fn divide_by_leverage_semantics_are_pinned() {
        // 20% account return at 10x is a 2% price move, never 200%.
        let (tp, _) = protective_prices(dec!(100), dec!(0.20), dec!(0.10), 10);
        assert_eq!(tp, dec!(102));
    }
}
