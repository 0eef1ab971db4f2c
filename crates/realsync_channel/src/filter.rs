//! Row filter expressions.
//!
//! A filter has the form `column=op.value`, for example `status=eq.active`
//! or `id=in.(1,2,3)`. Numbers compare numerically when both sides parse as
//! numbers, everything else compares as text.

use crate::error::{ChannelError, ChannelResult};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Not equal.
    Neq,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of a list.
    In,
}

impl FilterOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(FilterOp::Eq),
            "neq" => Some(FilterOp::Neq),
            "gt" => Some(FilterOp::Gt),
            "gte" => Some(FilterOp::Gte),
            "lt" => Some(FilterOp::Lt),
            "lte" => Some(FilterOp::Lte),
            "in" => Some(FilterOp::In),
            _ => None,
        }
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpr {
    column: String,
    op: FilterOp,
    operands: Vec<String>,
}

impl FilterExpr {
    /// Parses `column=op.value`.
    pub fn parse(expr: &str) -> ChannelResult<Self> {
        let (column, rest) = expr
            .split_once('=')
            .ok_or_else(|| ChannelError::invalid_filter(expr, "missing '='"))?;
        let column = column.trim();
        if column.is_empty() {
            return Err(ChannelError::invalid_filter(expr, "empty column"));
        }
        let (op, value) = rest
            .split_once('.')
            .ok_or_else(|| ChannelError::invalid_filter(expr, "missing operator"))?;
        let op = FilterOp::parse(op)
            .ok_or_else(|| ChannelError::invalid_filter(expr, format!("unknown operator {op:?}")))?;

        let operands = if op == FilterOp::In {
            let list = value
                .strip_prefix('(')
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| ChannelError::invalid_filter(expr, "in expects (a,b,...)"))?;
            list.split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        } else {
            vec![value.to_string()]
        };

        Ok(Self {
            column: column.to_string(),
            op,
            operands,
        })
    }

    /// Returns the filtered column.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Returns the operator.
    pub fn op(&self) -> FilterOp {
        self.op
    }

    /// Returns true if `row` passes the filter.
    ///
    /// Rows without the column never pass.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(actual) = row.get(&self.column) else {
            return false;
        };
        match self.op {
            FilterOp::In => self.operands.iter().any(|o| compare(actual, o) == Some(Ordering::Equal)),
            op => {
                let Some(ordering) = self.operands.first().and_then(|o| compare(actual, o)) else {
                    return op == FilterOp::Neq;
                };
                match op {
                    FilterOp::Eq => ordering == Ordering::Equal,
                    FilterOp::Neq => ordering != Ordering::Equal,
                    FilterOp::Gt => ordering == Ordering::Greater,
                    FilterOp::Gte => ordering != Ordering::Less,
                    FilterOp::Lt => ordering == Ordering::Less,
                    FilterOp::Lte => ordering != Ordering::Greater,
                    FilterOp::In => false,
                }
            }
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == FilterOp::In {
            write!(f, "{}=in.({})", self.column, self.operands.join(","))
        } else {
            let operand = self.operands.first().map(String::as_str).unwrap_or("");
            write!(f, "{}={}.{}", self.column, self.op.as_str(), operand)
        }
    }
}

/// Orders a row value against a filter operand. `None` if incomparable.
fn compare(actual: &Value, operand: &str) -> Option<Ordering> {
    match actual {
        Value::Number(n) => {
            let lhs = n.as_f64()?;
            match operand.parse::<f64>() {
                Ok(rhs) => lhs.partial_cmp(&rhs),
                Err(_) => Some(n.to_string().as_str().cmp(operand)),
            }
        }
        Value::String(s) => match (s.parse::<f64>(), operand.parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => lhs.partial_cmp(&rhs),
            _ => Some(s.as_str().cmp(operand)),
        },
        Value::Bool(b) => Some(if b.to_string() == operand {
            Ordering::Equal
        } else {
            b.to_string().as_str().cmp(operand)
        }),
        Value::Null => Some(if operand == "null" {
            Ordering::Equal
        } else {
            Ordering::Less
        }),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_expressions() {
        let expr = FilterExpr::parse("status=eq.active").unwrap();
        assert_eq!(expr.column(), "status");
        assert_eq!(expr.op(), FilterOp::Eq);
        assert_eq!(expr.to_string(), "status=eq.active");

        let expr = FilterExpr::parse("id=in.(1, 2,3)").unwrap();
        assert_eq!(expr.op(), FilterOp::In);
        assert_eq!(expr.to_string(), "id=in.(1,2,3)");

        // Dots after the operator belong to the value.
        let expr = FilterExpr::parse("price=gt.9.5").unwrap();
        assert!(expr.matches(&json!({"price": 10})));
    }

    #[test]
    fn parse_errors() {
        assert!(FilterExpr::parse("status").is_err());
        assert!(FilterExpr::parse("=eq.1").is_err());
        assert!(FilterExpr::parse("id=1").is_err());
        assert!(FilterExpr::parse("id=like.1").is_err());
        assert!(FilterExpr::parse("id=in.1,2").is_err());
    }

    #[test]
    fn numeric_comparisons() {
        let row = json!({"id": 10});
        assert!(FilterExpr::parse("id=eq.10").unwrap().matches(&row));
        assert!(FilterExpr::parse("id=neq.3").unwrap().matches(&row));
        assert!(FilterExpr::parse("id=gt.9").unwrap().matches(&row));
        assert!(FilterExpr::parse("id=gte.10").unwrap().matches(&row));
        assert!(!FilterExpr::parse("id=lt.10").unwrap().matches(&row));
        assert!(FilterExpr::parse("id=lte.10").unwrap().matches(&row));
        // 10 > 9 numerically although "10" < "9" as text.
        assert!(!FilterExpr::parse("id=lt.9").unwrap().matches(&row));
    }

    #[test]
    fn text_and_membership() {
        let row = json!({"status": "active", "done": false, "owner": null});
        assert!(FilterExpr::parse("status=eq.active").unwrap().matches(&row));
        assert!(!FilterExpr::parse("status=eq.archived").unwrap().matches(&row));
        assert!(FilterExpr::parse("status=in.(draft,active)").unwrap().matches(&row));
        assert!(FilterExpr::parse("done=eq.false").unwrap().matches(&row));
        assert!(FilterExpr::parse("owner=eq.null").unwrap().matches(&row));
    }

    #[test]
    fn missing_column_never_matches() {
        let row = json!({"id": 1});
        assert!(!FilterExpr::parse("status=eq.active").unwrap().matches(&row));
        assert!(!FilterExpr::parse("status=neq.active").unwrap().matches(&row));
    }
}
