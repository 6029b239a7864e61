//! Subscription Types
//!
//! Ticker symbols and the fixed set of upstream feeds subscribed for each.
//!
//! Every active symbol maps to exactly four upstream topics on the KRX
//! market data broker: trade ticks, top-of-book prices, one-minute OHLC
//! bars and static instrument info.

use std::fmt;

// =============================================================================
// Topic Templates
// =============================================================================

const STOCK_INFO_PREFIX: &str = "plaintext/quotes/krx/mdds/stockinfo/v1/roundlot/symbol/";
const TOP_PRICE_PREFIX: &str = "plaintext/quotes/krx/mdds/topprice/v1/roundlot/symbol/";
const OHLC_PREFIX: &str = "plaintext/quotes/krx/mdds/v2/ohlc/stock/1/";
const TICK_PREFIX: &str = "plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/";

// =============================================================================
// Symbol
// =============================================================================

/// A normalized ticker symbol (trimmed, upper-cased, never empty).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Normalize a raw symbol string.
    ///
    /// Returns `None` when nothing is left after trimming.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_uppercase()))
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upstream topics for every feed of this symbol.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        FeedKind::all().iter().map(|kind| kind.topic(self)).collect()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Feed Kinds
// =============================================================================

/// Upstream feed kinds subscribed for each symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKind {
    /// Static instrument information.
    StockInfo,
    /// Top-of-book price levels.
    TopPrice,
    /// One-minute OHLC bars.
    Ohlc,
    /// Individual trade ticks.
    Tick,
}

impl FeedKind {
    /// All feed kinds, in subscription order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::StockInfo, Self::TopPrice, Self::Ohlc, Self::Tick]
    }

    const fn prefix(self) -> &'static str {
        match self {
            Self::StockInfo => STOCK_INFO_PREFIX,
            Self::TopPrice => TOP_PRICE_PREFIX,
            Self::Ohlc => OHLC_PREFIX,
            Self::Tick => TICK_PREFIX,
        }
    }

    /// Build the upstream topic for a symbol.
    #[must_use]
    pub fn topic(self, symbol: &Symbol) -> String {
        format!("{}{}", self.prefix(), symbol.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("fpt", Some("FPT") ; "lowercase")]
    #[test_case("  vnm \t", Some("VNM") ; "surrounding whitespace")]
    #[test_case("HPG", Some("HPG") ; "already normalized")]
    #[test_case("", None ; "empty")]
    #[test_case("   ", None ; "whitespace only")]
    fn normalize(raw: &str, expected: Option<&str>) {
        assert_eq!(
            Symbol::normalize(raw).as_ref().map(Symbol::as_str),
            expected
        );
    }

    #[test]
    fn four_topics_per_symbol() {
        let symbol = Symbol::normalize("fpt").unwrap();
        assert_eq!(
            symbol.topics(),
            vec![
                "plaintext/quotes/krx/mdds/stockinfo/v1/roundlot/symbol/FPT",
                "plaintext/quotes/krx/mdds/topprice/v1/roundlot/symbol/FPT",
                "plaintext/quotes/krx/mdds/v2/ohlc/stock/1/FPT",
                "plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/FPT",
            ]
        );
    }

    #[test]
    fn topic_ends_with_symbol() {
        let symbol = Symbol::normalize("vcb").unwrap();
        for kind in FeedKind::all() {
            assert!(kind.topic(&symbol).ends_with("/VCB"));
        }
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(raw in "[ a-zA-Z0-9]{0,12}") {
            if let Some(symbol) = Symbol::normalize(&raw) {
                let again = Symbol::normalize(symbol.as_str());
                prop_assert_eq!(again, Some(symbol.clone()));
                prop_assert_eq!(symbol.as_str(), symbol.as_str().trim());
            } else {
                prop_assert!(raw.trim().is_empty());
            }
        }
    }
}
