//! Ether / wei conversion helpers
//!
//! Amounts are always held as integer wei (`u128`). These helpers exist for
//! the edges: configuration files, scenario scripts and human-readable logs.

use crate::error::{CoreError, Result};
use crate::types::Amount;

/// Decimal places of the staked token
pub const DECIMALS: u32 = 18;

/// Wei in one whole token
pub const WEI_PER_ETHER: Amount = 1_000_000_000_000_000_000;

/// Convert a decimal ether string (`"10"`, `"0.5"`) into wei
pub fn to_wei(ether: &str) -> Result<Amount> {
    let ether = ether.trim();
    if ether.is_empty() {
        return Err(CoreError::invalid_amount(ether));
    }

    let (whole, fraction) = match ether.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (ether, ""),
    };

    if fraction.len() > DECIMALS as usize {
        return Err(CoreError::invalid_amount(format!(
            "{} has more than {} decimal places",
            ether, DECIMALS
        )));
    }

    let is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !is_digits(whole) || !is_digits(fraction) || (whole.is_empty() && fraction.is_empty()) {
        return Err(CoreError::invalid_amount(ether));
    }

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<Amount>()
            .map_err(|_| CoreError::AmountOverflow(ether.to_string()))?
            .checked_mul(WEI_PER_ETHER)
            .ok_or_else(|| CoreError::AmountOverflow(ether.to_string()))?
    };

    let fraction_wei = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = DECIMALS as usize);
        padded
            .parse::<Amount>()
            .map_err(|_| CoreError::invalid_amount(ether))?
    };

    whole_wei
        .checked_add(fraction_wei)
        .ok_or_else(|| CoreError::AmountOverflow(ether.to_string()))
}

/// Format wei as a decimal ether string without trailing zeros
pub fn format_ether(amount: Amount) -> String {
    let whole = amount / WEI_PER_ETHER;
    let fraction = amount % WEI_PER_ETHER;
    if fraction == 0 {
        return whole.to_string();
    }

    let fraction = format!("{:0>width$}", fraction, width = DECIMALS as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

/// Lossy conversion for metrics and logs
pub fn to_ether_f64(amount: Amount) -> f64 {
    amount as f64 / WEI_PER_ETHER as f64
}

/// Parse an amount written as `"<n> ether"`, `"<n> wei"` or a bare wei integer
pub fn parse_amount(s: &str) -> Result<Amount> {
    let s = s.trim();
    let mut parts = s.split_whitespace();
    let number = parts.next().ok_or_else(|| CoreError::invalid_amount(s))?;
    let unit = parts.next();
    if parts.next().is_some() {
        return Err(CoreError::invalid_amount(s));
    }

    match unit.map(str::to_ascii_lowercase).as_deref() {
        Some("ether") | Some("eth") | Some("rpl") => to_wei(number),
        Some("wei") | None => number
            .parse::<Amount>()
            .map_err(|_| CoreError::invalid_amount(s)),
        Some(_) => Err(CoreError::invalid_amount(s)),
    }
}

/// Serde adapter storing amounts as decimal wei strings.
///
/// TOML integers are limited to 64 bits, so amounts are written as strings.
/// Deserialization also accepts plain integers and the `"<n> ether"` form.
pub mod amount_string {
    use super::parse_amount;
    use crate::types::Amount;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = Amount;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a wei integer or an amount string such as \"10 ether\"")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
            parse_amount(v).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
            Ok(v as Amount)
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Amount, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
            u128::try_from(v).map_err(|_| E::custom("amount cannot be negative"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_wei() {
        assert_eq!(to_wei("10").unwrap(), 10 * WEI_PER_ETHER);
        assert_eq!(to_wei("0.5").unwrap(), WEI_PER_ETHER / 2);
        assert_eq!(to_wei(".25").unwrap(), WEI_PER_ETHER / 4);
        assert_eq!(to_wei("1.000000000000000001").unwrap(), WEI_PER_ETHER + 1);
    }

    #[test]
    fn test_to_wei_rejects_garbage() {
        assert!(to_wei("").is_err());
        assert!(to_wei("-1").is_err());
        assert!(to_wei("1.0000000000000000001").is_err());
        assert!(to_wei("ten").is_err());
        assert!(matches!(
            to_wei("999999999999999999999999"),
            Err(CoreError::AmountOverflow(_))
        ));
    }

    #[test]
    fn test_format_ether() {
        assert_eq!(format_ether(10 * WEI_PER_ETHER), "10");
        assert_eq!(format_ether(WEI_PER_ETHER / 2), "0.5");
        assert_eq!(format_ether(1), "0.000000000000000001");
        assert_eq!(format_ether(0), "0");
    }

    #[test]
    fn test_parse_amount_units() {
        assert_eq!(parse_amount("16 ether").unwrap(), 16 * WEI_PER_ETHER);
        assert_eq!(parse_amount("16 RPL").unwrap(), 16 * WEI_PER_ETHER);
        assert_eq!(parse_amount("1200 wei").unwrap(), 1200);
        assert_eq!(parse_amount("1200").unwrap(), 1200);
        assert!(parse_amount("16 gwei").is_err());
        assert!(parse_amount("16 ether extra").is_err());
    }

    #[test]
    fn test_amount_string_serde() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "amount_string")]
            amount: Amount,
        }

        let parsed: Wrapper = serde_json::from_str(r#"{"amount":"2 ether"}"#).unwrap();
        assert_eq!(parsed.amount, 2 * WEI_PER_ETHER);

        let parsed: Wrapper = serde_json::from_str(r#"{"amount":42}"#).unwrap();
        assert_eq!(parsed.amount, 42);

        let json = serde_json::to_string(&Wrapper { amount: WEI_PER_ETHER }).unwrap();
        assert_eq!(json, r#"{"amount":"1000000000000000000"}"#);
    }
}
