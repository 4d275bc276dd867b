use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_INSTRUMENT_ID_LEN: usize = 32;

/// Normalized instrument identifier: an exchange ticker (`SPY`, `BRK.B`) or an
/// economic series id (`CPIAUCSL`, `A191RL1Q225SBEA`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Parse and normalize an identifier to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInstrumentId);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_INSTRUMENT_ID_LEN {
            return Err(ValidationError::InstrumentIdTooLong {
                len,
                max: MAX_INSTRUMENT_ID_LEN,
            });
        }

        if let Some(first) = normalized.chars().next() {
            if !(first.is_ascii_alphabetic() || first == '^') {
                return Err(ValidationError::InstrumentIdInvalidStart { ch: first });
            }
        }

        for (index, ch) in normalized.chars().enumerate().skip(1) {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_');
            if !valid {
                return Err(ValidationError::InstrumentIdInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InstrumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for InstrumentId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<InstrumentId> for String {
    fn from(value: InstrumentId) -> Self {
        value.0
    }
}

/// Asset class tag. Determines how much history an instrument needs before
/// statistics derived from it can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Etf,
    EconomicMonthly,
    EconomicQuarterly,
}

impl AssetClass {
    pub const ALL: [Self; 4] = [
        Self::Equity,
        Self::Etf,
        Self::EconomicMonthly,
        Self::EconomicQuarterly,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equity => "equity",
            Self::Etf => "etf",
            Self::EconomicMonthly => "economic_monthly",
            Self::EconomicQuarterly => "economic_quarterly",
        }
    }

    /// Observations needed for full confidence. Depends on the class only.
    pub const fn required_observations(self) -> usize {
        match self {
            // one year of trading days
            Self::Equity => 252,
            // one quarter of trading days, enough for technical indicators
            Self::Etf => 63,
            Self::EconomicMonthly => 36,
            Self::EconomicQuarterly => 40,
        }
    }

    pub const fn is_economic(self) -> bool {
        matches!(self, Self::EconomicMonthly | Self::EconomicQuarterly)
    }
}

impl Display for AssetClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "equity" | "stock" => Ok(Self::Equity),
            "etf" => Ok(Self::Etf),
            "economic_monthly" | "economic" | "monthly" => Ok(Self::EconomicMonthly),
            "economic_quarterly" | "quarterly" => Ok(Self::EconomicQuarterly),
            other => Err(ValidationError::InvalidAssetClass {
                value: other.to_owned(),
            }),
        }
    }
}

/// An instrument tracked by the engine. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    id: InstrumentId,
    asset_class: AssetClass,
}

impl Instrument {
    pub fn new(id: InstrumentId, asset_class: AssetClass) -> Self {
        Self { id, asset_class }
    }

    /// Convenience constructor from a raw identifier.
    pub fn parse(id: &str, asset_class: AssetClass) -> Result<Self, ValidationError> {
        Ok(Self::new(InstrumentId::parse(id)?, asset_class))
    }

    pub fn id(&self) -> &InstrumentId {
        &self.id
    }

    pub const fn asset_class(&self) -> AssetClass {
        self.asset_class
    }
}

impl Display for Instrument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.id, self.asset_class)
    }
}

/// Parses the `ID:asset_class` form, e.g. `SPY:etf` or `UNRATE:economic_monthly`.
impl FromStr for Instrument {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((id, class)) = value.rsplit_once(':') else {
            return Err(ValidationError::InvalidInstrumentSpec {
                value: value.to_owned(),
            });
        };
        Ok(Self::new(InstrumentId::parse(id)?, class.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_ids() {
        assert_eq!(InstrumentId::parse(" spy ").expect("ticker").as_str(), "SPY");
        assert_eq!(
            InstrumentId::parse("a191rl1q225sbea").expect("series").as_str(),
            "A191RL1Q225SBEA"
        );
        assert_eq!(InstrumentId::parse("^gspc").expect("index").as_str(), "^GSPC");
    }

    #[test]
    fn rejects_invalid_ids() {
        assert!(matches!(
            InstrumentId::parse("1SPY"),
            Err(ValidationError::InstrumentIdInvalidStart { .. })
        ));
        assert!(matches!(
            InstrumentId::parse("SPY$"),
            Err(ValidationError::InstrumentIdInvalidChar { .. })
        ));
    }

    #[test]
    fn required_observations_depend_only_on_class() {
        assert_eq!(AssetClass::Equity.required_observations(), 252);
        assert_eq!(AssetClass::Etf.required_observations(), 63);
        assert_eq!(AssetClass::EconomicMonthly.required_observations(), 36);
        assert_eq!(AssetClass::EconomicQuarterly.required_observations(), 40);
    }

    #[test]
    fn parses_instrument_spec() {
        let instrument: Instrument = "cpiaucsl:economic_monthly".parse().expect("id with class");
        assert_eq!(instrument.id().as_str(), "CPIAUCSL");
        assert_eq!(instrument.asset_class(), AssetClass::EconomicMonthly);
        assert_eq!(instrument.to_string(), "CPIAUCSL:economic_monthly");

        assert!(matches!(
            "SPY".parse::<Instrument>(),
            Err(ValidationError::InvalidInstrumentSpec { .. })
        ));
        assert!(matches!(
            "SPY:bond".parse::<Instrument>(),
            Err(ValidationError::InvalidAssetClass { .. })
        ));
    }
}
