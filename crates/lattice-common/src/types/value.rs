//! Coordinate and measure values.
//!
//! Segments distinguish two value kinds. [`DataValue`] is a column key:
//! a coordinate on a segment axis, or a literal inside a predicate. It
//! is totally ordered and hashable so that axes stay sorted and SQL
//! emission is deterministic. [`CellValue`] is a measure value held in a
//! segment dataset; integer, decimal, and double are distinct types and
//! addition widens to the widest input without letting null contaminate
//! a sum.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A column key value: an axis coordinate or a predicate literal.
///
/// Ordering is `Null < Int < Str`; integers order numerically and
/// strings lexically, which doubles as the comparator used when sorting
/// IN-list values for deterministic SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataValue {
    /// SQL NULL key (a member with no key value).
    Null,
    /// Integer key.
    Int(i64),
    /// String key.
    Str(String),
}

impl DataValue {
    /// Returns true if this is the NULL key.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }

    /// Renders the value as a SQL literal.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        match self {
            DataValue::Null => "NULL".to_string(),
            DataValue::Int(i) => i.to_string(),
            DataValue::Str(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DataValue::Null => 0,
            DataValue::Int(_) => 1,
            DataValue::Str(_) => 2,
        }
    }
}

impl PartialOrd for DataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (DataValue::Int(a), DataValue::Int(b)) => a.cmp(b),
            (DataValue::Str(a), DataValue::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "#null"),
            DataValue::Int(i) => write!(f, "{}", i),
            DataValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for DataValue {
    fn from(v: i64) -> Self {
        DataValue::Int(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Str(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Str(v)
    }
}

/// A measure value stored in a segment dataset.
///
/// Null means "absent": the fact query returned no row for the cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// Absent cell.
    Null,
    /// 64-bit integer measure.
    Int(i64),
    /// Fixed-point decimal measure (scaled integer).
    Decimal {
        /// Unscaled value.
        unscaled: i128,
        /// Number of fractional digits.
        scale: u8,
    },
    /// 64-bit floating point measure.
    Double(f64),
}

impl CellValue {
    /// Creates a decimal value.
    #[must_use]
    pub fn decimal(unscaled: i128, scale: u8) -> Self {
        CellValue::Decimal { unscaled, scale }
    }

    /// Returns true if this cell is absent.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Converts to a double, for callers that do not care about numeric
    /// type preservation. Null converts to `None`.
    #[must_use]
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            CellValue::Null => None,
            CellValue::Int(i) => Some(*i as f64),
            CellValue::Decimal { unscaled, scale } => {
                Some(*unscaled as f64 / 10f64.powi(i32::from(*scale)))
            }
            CellValue::Double(d) => Some(*d),
        }
    }

    /// Adds two measure values, preserving the widest numeric type of
    /// the inputs (`Int < Decimal < Double`). Null never contaminates a
    /// sum: `Null + x == x`.
    #[must_use]
    pub fn add(&self, other: &CellValue) -> CellValue {
        match (self, other) {
            (CellValue::Null, v) | (v, CellValue::Null) => v.clone(),
            (CellValue::Int(a), CellValue::Int(b)) => CellValue::Int(a + b),
            (CellValue::Int(i), CellValue::Decimal { unscaled, scale })
            | (CellValue::Decimal { unscaled, scale }, CellValue::Int(i)) => CellValue::Decimal {
                unscaled: unscaled + i128::from(*i) * 10i128.pow(u32::from(*scale)),
                scale: *scale,
            },
            (
                CellValue::Decimal {
                    unscaled: a,
                    scale: sa,
                },
                CellValue::Decimal {
                    unscaled: b,
                    scale: sb,
                },
            ) => {
                let scale = (*sa).max(*sb);
                let a = a * 10i128.pow(u32::from(scale - sa));
                let b = b * 10i128.pow(u32::from(scale - sb));
                CellValue::Decimal {
                    unscaled: a + b,
                    scale,
                }
            }
            (a, b) => {
                // At least one side is a double; widen both.
                CellValue::Double(a.to_f64().unwrap_or(0.0) + b.to_f64().unwrap_or(0.0))
            }
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, "#null"),
            CellValue::Int(i) => write!(f, "{}", i),
            CellValue::Decimal { unscaled, scale } => {
                if *scale == 0 {
                    return write!(f, "{}", unscaled);
                }
                let divisor = 10i128.pow(u32::from(*scale));
                write!(
                    f,
                    "{}.{:0width$}",
                    unscaled / divisor,
                    (unscaled % divisor).abs(),
                    width = *scale as usize
                )
            }
            CellValue::Double(d) => write!(f, "{}", d),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Double(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_value_ordering() {
        let mut values = vec![
            DataValue::from("WA"),
            DataValue::from(1998),
            DataValue::Null,
            DataValue::from("CA"),
            DataValue::from(1997),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                DataValue::Null,
                DataValue::from(1997),
                DataValue::from(1998),
                DataValue::from("CA"),
                DataValue::from("WA"),
            ]
        );
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(DataValue::from("O'Brien").to_sql_literal(), "'O''Brien'");
        assert_eq!(DataValue::from(42).to_sql_literal(), "42");
        assert_eq!(DataValue::Null.to_sql_literal(), "NULL");
    }

    #[test]
    fn test_add_preserves_widest_type() {
        let int = CellValue::Int(2);
        let dec = CellValue::decimal(150, 2); // 1.50
        let dbl = CellValue::Double(0.5);

        assert_eq!(int.add(&CellValue::Int(3)), CellValue::Int(5));
        assert_eq!(int.add(&dec), CellValue::decimal(350, 2));
        assert_eq!(int.add(&dbl), CellValue::Double(2.5));
        assert_eq!(dec.add(&dbl), CellValue::Double(2.0));
    }

    #[test]
    fn test_null_never_contaminates_sum() {
        let sum = CellValue::Null.add(&CellValue::Int(7));
        assert_eq!(sum, CellValue::Int(7));
        assert_eq!(CellValue::Null.add(&CellValue::Null), CellValue::Null);
    }

    #[test]
    fn test_decimal_rescaling() {
        let a = CellValue::decimal(5, 0); // 5
        let b = CellValue::decimal(25, 1); // 2.5
        assert_eq!(a.add(&b), CellValue::decimal(75, 1));
    }
}
