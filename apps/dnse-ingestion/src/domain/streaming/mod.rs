//! Streaming Types
//!
//! Types for messages flowing from the upstream broker to the downstream
//! bus, plus the pure functions that route them:
//!
//! - `DataType::from_topic` classifies an upstream topic by substring
//! - `extract_symbol` takes the trailing topic segment
//! - `build_channel` derives `<env>.<source>.<market>.<datatype>.<symbol>`
//!
//! Control events that toggle symbols arrive as JSON on
//! `<env>.dnse.krx.tickers.events`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::subscription::Symbol;

/// Upstream source name used in downstream channel names.
pub const SOURCE: &str = "dnse";

/// Market name used in downstream channel names.
pub const MARKET: &str = "krx";

// =============================================================================
// Upstream Message
// =============================================================================

/// A message captured off the upstream wire.
///
/// The payload is an owned copy; the connection library's buffer is not
/// referenced after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamMessage {
    /// Upstream topic the message was published on.
    pub topic: String,
    /// Raw payload bytes, forwarded untouched.
    pub payload: Vec<u8>,
}

impl UpstreamMessage {
    /// Create a message from an owned topic and payload.
    #[must_use]
    pub const fn new(topic: String, payload: Vec<u8>) -> Self {
        Self { topic, payload }
    }

    /// Copy a message out of borrowed wire buffers.
    #[must_use]
    pub fn copy_from(topic: &[u8], payload: &[u8]) -> Self {
        Self {
            topic: String::from_utf8_lossy(topic).into_owned(),
            payload: payload.to_vec(),
        }
    }
}

// =============================================================================
// Data Type
// =============================================================================

/// Downstream datatype tag derived from an upstream topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Trade ticks.
    Tick,
    /// OHLC bars.
    Ohlc,
    /// Top-of-book prices.
    TopPrice,
    /// Static instrument info.
    StockInfo,
}

impl DataType {
    /// Every datatype, in classification order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Tick, Self::Ohlc, Self::TopPrice, Self::StockInfo]
    }

    /// Classify an upstream topic.
    ///
    /// The first matching path marker wins; unknown topics yield `None`.
    #[must_use]
    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|datatype| topic.contains(datatype.marker()))
    }

    const fn marker(self) -> &'static str {
        match self {
            Self::Tick => "/tick/",
            Self::Ohlc => "/ohlc/",
            Self::TopPrice => "/topprice/",
            Self::StockInfo => "/stockinfo/",
        }
    }

    /// Tag used in downstream channel names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Ohlc => "ohlc",
            Self::TopPrice => "topprice",
            Self::StockInfo => "stockinfo",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Routing Functions
// =============================================================================

/// Last `/`-separated segment of a topic. Empty for an empty topic.
#[must_use]
pub fn extract_symbol(topic: &str) -> &str {
    topic.rsplit('/').next().unwrap_or_default()
}

/// Build a downstream channel name.
///
/// Case is preserved; callers normalize before calling.
#[must_use]
pub fn build_channel(env: &str, source: &str, market: &str, datatype: &str, symbol: &str) -> String {
    format!("{env}.{source}.{market}.{datatype}.{symbol}")
}

// =============================================================================
// Channel Namespace
// =============================================================================

/// Process-wide channel naming context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNamespace {
    env: String,
    source: String,
    market: String,
}

impl ChannelNamespace {
    /// Namespace for the DNSE KRX feed in the given environment.
    #[must_use]
    pub fn dnse_krx(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            source: SOURCE.to_string(),
            market: MARKET.to_string(),
        }
    }

    /// Deployment environment tag.
    #[must_use]
    pub fn env(&self) -> &str {
        &self.env
    }

    /// Downstream channel for a datatype and symbol.
    #[must_use]
    pub fn channel(&self, datatype: DataType, symbol: &str) -> String {
        build_channel(
            &self.env,
            &self.source,
            &self.market,
            datatype.as_str(),
            symbol,
        )
    }

    /// Route an upstream topic to its downstream channel.
    ///
    /// Returns `None` for topics with no known datatype or no symbol.
    #[must_use]
    pub fn route(&self, topic: &str) -> Option<(DataType, String)> {
        let datatype = DataType::from_topic(topic)?;
        let symbol = extract_symbol(topic);
        if symbol.is_empty() {
            return None;
        }
        Some((datatype, self.channel(datatype, symbol)))
    }

    /// Every downstream channel a symbol publishes to.
    #[must_use]
    pub fn channels_for(&self, symbol: &Symbol) -> Vec<String> {
        DataType::all()
            .iter()
            .map(|datatype| self.channel(*datatype, symbol.as_str()))
            .collect()
    }

    /// Control channel carrying symbol activation events.
    #[must_use]
    pub fn control_channel(&self) -> String {
        format!("{}.{}.{}.tickers.events", self.env, self.source, self.market)
    }
}

// =============================================================================
// Control Event
// =============================================================================

/// Symbol activation toggle received on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    /// Raw symbol as sent by the producer.
    pub symbol: String,
    /// `true` to subscribe, `false` to unsubscribe.
    pub active: bool,
}

impl ControlEvent {
    /// Parse a control event payload.
    ///
    /// # Errors
    ///
    /// Returns `ControlEventError::Parse` for malformed JSON and
    /// `ControlEventError::EmptySymbol` when the symbol normalizes to nothing.
    pub fn parse(payload: &[u8]) -> Result<(Symbol, bool), ControlEventError> {
        let event: Self = serde_json::from_slice(payload)?;
        let symbol = Symbol::normalize(&event.symbol).ok_or(ControlEventError::EmptySymbol)?;
        Ok((symbol, event.active))
    }
}

/// Control event decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ControlEventError {
    /// Payload is not a valid control event.
    #[error("invalid control event: {0}")]
    Parse(#[from] serde_json::Error),
    /// Symbol is empty after normalization.
    #[error("control event has empty symbol")]
    EmptySymbol,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/FPT", Some(DataType::Tick) ; "tick")]
    #[test_case("plaintext/quotes/krx/mdds/v2/ohlc/stock/1/FPT", Some(DataType::Ohlc) ; "ohlc")]
    #[test_case("plaintext/quotes/krx/mdds/topprice/v1/roundlot/symbol/FPT", Some(DataType::TopPrice) ; "topprice")]
    #[test_case("plaintext/quotes/krx/mdds/stockinfo/v1/roundlot/symbol/FPT", Some(DataType::StockInfo) ; "stockinfo")]
    #[test_case("plaintext/quotes/krx/mdds/index/v1/VN30", None ; "unknown feed")]
    #[test_case("", None ; "empty")]
    fn classify(topic: &str, expected: Option<DataType>) {
        assert_eq!(DataType::from_topic(topic), expected);
    }

    #[test_case("plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/FPT", "FPT" ; "nested")]
    #[test_case("FPT", "FPT" ; "no separator")]
    #[test_case("a/b/", "" ; "trailing slash")]
    #[test_case("", "" ; "empty")]
    fn extract(topic: &str, expected: &str) {
        assert_eq!(extract_symbol(topic), expected);
    }

    #[test]
    fn channel_format() {
        assert_eq!(
            build_channel("prod", "dnse", "krx", "tick", "FPT"),
            "prod.dnse.krx.tick.FPT"
        );
    }

    #[test]
    fn channel_preserves_case() {
        assert_eq!(
            build_channel("dev", "dnse", "krx", "Tick", "fpt"),
            "dev.dnse.krx.Tick.fpt"
        );
    }

    #[test]
    fn route_tick_topic() {
        let ns = ChannelNamespace::dnse_krx("prod");
        let routed = ns.route("plaintext/quotes/krx/mdds/tick/v1/roundlot/symbol/FPT");
        assert_eq!(
            routed,
            Some((DataType::Tick, "prod.dnse.krx.tick.FPT".to_string()))
        );
    }

    #[test]
    fn route_drops_unroutable() {
        let ns = ChannelNamespace::dnse_krx("prod");
        assert_eq!(ns.route("plaintext/quotes/krx/mdds/tick/"), None);
        assert_eq!(ns.route("some/other/topic"), None);
    }

    #[test]
    fn control_channel_name() {
        let ns = ChannelNamespace::dnse_krx("prod");
        assert_eq!(ns.control_channel(), "prod.dnse.krx.tickers.events");
    }

    #[test]
    fn channels_for_symbol() {
        let ns = ChannelNamespace::dnse_krx("uat");
        let symbol = Symbol::normalize("hpg").unwrap();
        assert_eq!(
            ns.channels_for(&symbol),
            vec![
                "uat.dnse.krx.tick.HPG",
                "uat.dnse.krx.ohlc.HPG",
                "uat.dnse.krx.topprice.HPG",
                "uat.dnse.krx.stockinfo.HPG",
            ]
        );
    }

    #[test]
    fn every_subscribed_topic_routes_back_to_its_symbol() {
        let ns = ChannelNamespace::dnse_krx("prod");
        let symbol = Symbol::normalize("vnm").unwrap();
        for topic in symbol.topics() {
            let (_, channel) = ns.route(&topic).unwrap();
            assert!(channel.ends_with(".VNM"));
        }
    }

    #[test]
    fn parse_control_event() {
        let (symbol, active) = ControlEvent::parse(br#"{"symbol":" fpt ","active":true}"#).unwrap();
        assert_eq!(symbol.as_str(), "FPT");
        assert!(active);
    }

    #[test]
    fn parse_control_event_rejects_garbage() {
        assert!(matches!(
            ControlEvent::parse(b"not json"),
            Err(ControlEventError::Parse(_))
        ));
        assert!(matches!(
            ControlEvent::parse(br#"{"symbol":"  ","active":false}"#),
            Err(ControlEventError::EmptySymbol)
        ));
    }

    #[test]
    fn copy_from_owns_payload() {
        let wire = vec![1_u8, 2, 3];
        let msg = UpstreamMessage::copy_from(b"a/b/FPT", &wire);
        drop(wire);
        assert_eq!(msg.payload, vec![1, 2, 3]);
        assert_eq!(msg.topic, "a/b/FPT");
    }

    proptest! {
        #[test]
        fn channel_is_dot_joined(
            env in "[a-z]{1,8}",
            datatype in "[a-z]{1,10}",
            symbol in "[A-Z0-9]{1,8}",
        ) {
            let channel = build_channel(&env, SOURCE, MARKET, &datatype, &symbol);
            let parts: Vec<&str> = channel.split('.').collect();
            prop_assert_eq!(parts, vec![env.as_str(), SOURCE, MARKET, datatype.as_str(), symbol.as_str()]);
        }
    }
}
