use serde::{Deserialize, Serialize};

/// Unique identifier for one of the six mainland China futures exchanges.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    /// Shanghai Futures Exchange.
    Shfe,
    /// Dalian Commodity Exchange.
    Dce,
    /// Zhengzhou Commodity Exchange.
    Czce,
    /// China Financial Futures Exchange.
    Cffex,
    /// Guangzhou Futures Exchange.
    Gfex,
    /// Shanghai International Energy Exchange.
    Ine,
}

impl ExchangeId {
    /// Return the &str representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::Shfe => "shfe",
            ExchangeId::Dce => "dce",
            ExchangeId::Czce => "czce",
            ExchangeId::Cffex => "cffex",
            ExchangeId::Gfex => "gfex",
            ExchangeId::Ine => "ine",
        }
    }

    /// True if the exchange lists financial (index / bond) futures rather than commodities.
    pub fn is_financial(&self) -> bool {
        matches!(self, ExchangeId::Cffex)
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id_serde_round_trip() {
        for exchange in [
            ExchangeId::Shfe,
            ExchangeId::Dce,
            ExchangeId::Czce,
            ExchangeId::Cffex,
            ExchangeId::Gfex,
            ExchangeId::Ine,
        ] {
            let json = serde_json::to_string(&exchange).unwrap();
            assert_eq!(json, format!("\"{}\"", exchange.as_str()));
            let decoded: ExchangeId = serde_json::from_str(&json).unwrap();
            assert_eq!(decoded, exchange);
        }
    }
}
