use anyhow::{Result, anyhow, bail};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A resource quantity with milli-unit precision.
///
/// Parses the orchestrator's quantity strings: `"2"` (two units), `"1500m"`
/// (1.5 units), `"500Mi"`, `"16Gi"`, `"2k"`. Values may go negative while
/// computing deltas; persisted quantities are clamped non-negative by the
/// code that owns them. Rendering is canonical decimal — whole units
/// without a suffix, milli-units with the `m` suffix otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn from_millis(millis: i64) -> Self {
        Quantity(millis)
    }

    pub fn from_units(units: i64) -> Self {
        Quantity(units.saturating_mul(1_000))
    }

    /// Value in milli-units; the form metric gauges report (divided by 1000).
    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0))
    }

    /// Clamp negative values to zero. Quota arithmetic never persists a
    /// value below zero.
    pub fn clamp_non_negative(self) -> Quantity {
        Quantity(self.0.max(0))
    }
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (number, suffix) = match s.find(|c: char| c.is_ascii_alphabetic()) {
            Some(idx) => s.split_at(idx),
            None => (s, ""),
        };
        let scale_millis: i128 = match suffix {
            "" => 1_000,
            "m" => 1,
            "k" => 1_000_000,
            "M" => 1_000_000_000,
            "G" => 1_000_000_000_000,
            "T" => 1_000_000_000_000_000,
            "Ki" => 1_024 * 1_000,
            "Mi" => 1_024 * 1_024 * 1_000,
            "Gi" => 1_024 * 1_024 * 1_024 * 1_000,
            "Ti" => 1_024i128 * 1_024 * 1_024 * 1_024 * 1_000,
            other => bail!("unknown quantity suffix '{}'", other),
        };
        let (number, negative) = match number.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (number, false),
        };
        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            bail!("empty quantity");
        }
        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| anyhow!("invalid quantity '{}'", s))?
        };
        let mut millis = int
            .checked_mul(scale_millis)
            .ok_or_else(|| anyhow!("quantity '{}' overflows", s))?;
        let mut frac: i128 = 0;
        let mut denom: i128 = 1;
        for c in frac_part.chars() {
            if !c.is_ascii_digit() {
                bail!("invalid quantity '{}'", s);
            }
            frac = frac * 10 + i128::from(c as u8 - b'0');
            denom *= 10;
        }
        if frac * scale_millis % denom != 0 {
            bail!("quantity '{}' is finer than milli precision", s);
        }
        millis += frac * scale_millis / denom;
        if negative {
            millis = -millis;
        }
        i64::try_from(millis)
            .map(Quantity)
            .map_err(|_| anyhow!("quantity '{}' overflows", s))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1_000 == 0 {
            write!(f, "{}", self.0 / 1_000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl Visitor<'_> for QuantityVisitor {
            type Value = Quantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a quantity string like \"500m\" or an integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Quantity, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Quantity, E> {
                Ok(Quantity::from_units(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Quantity, E> {
                i64::try_from(v)
                    .map(Quantity::from_units)
                    .map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

/// A mapping from resource name (`cpu`, `memory`, `pods`, …) to quantity.
/// Ordered so serialized status comparisons are deterministic.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Per-resource remaining headroom: `max(0, hard - used)`.
/// Resources missing from `used` count as zero consumption.
pub fn quota_space(hard: &ResourceList, used: &ResourceList) -> ResourceList {
    hard.iter()
        .map(|(name, h)| {
            let u = used.get(name).copied().unwrap_or_default();
            (name.clone(), h.saturating_sub(u).clamp_non_negative())
        })
        .collect()
}

/// Split a requested increase into the part that fits under `headroom` and
/// the part that spills over.
pub fn cap_by_headroom(request: Quantity, headroom: Quantity) -> (Quantity, Quantity) {
    if request <= headroom {
        (request, Quantity::ZERO)
    } else {
        (headroom, request.saturating_sub(headroom))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn parse_plain_and_milli() {
        assert_eq!(q("2").millis(), 2_000);
        assert_eq!(q("1500m").millis(), 1_500);
        assert_eq!(q("0").millis(), 0);
        assert_eq!(q("1.5").millis(), 1_500);
        assert_eq!(q("-3").millis(), -3_000);
    }

    #[test]
    fn parse_suffixed() {
        assert_eq!(q("2k").millis(), 2_000_000);
        assert_eq!(q("1Ki").millis(), 1_024_000);
        assert_eq!(q("500Mi").millis(), 500 * 1_024 * 1_024 * 1_000);
        assert_eq!(q("16Gi").millis(), 16 * 1_024 * 1_024 * 1_024 * 1_000);
        assert_eq!(q("1.5Gi").millis(), 3 * 1_024 * 1_024 * 1_024 * 500);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Quantity>().is_err());
        assert!("abc".parse::<Quantity>().is_err());
        assert!("1X".parse::<Quantity>().is_err());
        assert!("1.0001m".parse::<Quantity>().is_err());
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(q("2").to_string(), "2");
        assert_eq!(q("1500m").to_string(), "1500m");
        assert_eq!(q("1Ki").to_string(), "1024");
        assert_eq!(Quantity::ZERO.to_string(), "0");
    }

    #[test]
    fn serde_round_trip() {
        let list: ResourceList =
            serde_json::from_str(r#"{"cpu":"1500m","memory":"1Gi","pods":5}"#).unwrap();
        assert_eq!(list["cpu"], q("1500m"));
        assert_eq!(list["memory"], q("1Gi"));
        assert_eq!(list["pods"], q("5"));

        let json = serde_json::to_string(&list).unwrap();
        let back: ResourceList = serde_json::from_str(&json).unwrap();
        assert_eq!(back, list);
    }

    #[test]
    fn space_clamps_at_zero() {
        let hard = ResourceList::from([("cpu".into(), q("2")), ("pods".into(), q("5"))]);
        let used = ResourceList::from([("cpu".into(), q("3"))]);

        let space = quota_space(&hard, &used);
        assert_eq!(space["cpu"], Quantity::ZERO);
        assert_eq!(space["pods"], q("5"));
    }

    #[test]
    fn cap_splits_overflow() {
        assert_eq!(cap_by_headroom(q("1"), q("2")), (q("1"), Quantity::ZERO));
        assert_eq!(cap_by_headroom(q("3"), q("2")), (q("2"), q("1")));
        assert_eq!(
            cap_by_headroom(q("2"), Quantity::ZERO),
            (Quantity::ZERO, q("2"))
        );
    }
}
