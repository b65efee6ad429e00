use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{KeyError, SimResult};
use crate::nuclide::NucId;
use crate::recorder::Datum;

/// A typed cell value in a recorded row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Bool(bool),
    Nuclide(NucId),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_nuclide(&self) -> Option<NucId> {
        match self {
            Value::Nuclide(v) => Some(*v),
            _ => None,
        }
    }

    /// Ordering used by condition filters; comparable kinds only.
    fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Nuclide(a), Value::Nuclide(b)) => Some(a.cmp(b)),
            (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
            (a, b) => a.as_double()?.partial_cmp(&b.as_double()?),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<NucId> for Value {
    fn from(v: NucId) -> Self {
        Value::Nuclide(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

/// Comparison operator of a row filter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr,
)]
pub enum CondOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Ge,
}

/// A `(field, operator, value)` filter over recorded rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Cond {
    pub field: String,
    pub op: CondOp,
    pub value: Value,
}

impl Cond {
    /// Builds a condition from the operator's textual form, e.g.
    /// `Cond::new("Commodity", "==", "natu")`.
    pub fn new(field: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: op.parse().unwrap_or(CondOp::Eq),
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, "==", value)
    }

    /// Whether `row` satisfies this condition.
    pub fn matches(&self, row: &Datum) -> bool {
        let Some(actual) = row.get(&self.field) else {
            return false;
        };
        let Some(ord) = actual.compare(&self.value) else {
            return false;
        };
        match self.op {
            CondOp::Eq => ord == Ordering::Equal,
            CondOp::Ne => ord != Ordering::Equal,
            CondOp::Lt => ord == Ordering::Less,
            CondOp::Le => ord != Ordering::Greater,
            CondOp::Gt => ord == Ordering::Greater,
            CondOp::Ge => ord != Ordering::Less,
        }
    }
}

/// One result row: ordered field-name → value pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub vals: Vec<(String, Value)>,
}

impl QueryRow {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.vals
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    pub fn int(&self, field: &str) -> SimResult<i64> {
        self.get(field)
            .and_then(Value::as_int)
            .ok_or_else(|| missing(field))
    }

    pub fn double(&self, field: &str) -> SimResult<f64> {
        self.get(field)
            .and_then(Value::as_double)
            .ok_or_else(|| missing(field))
    }

    pub fn text(&self, field: &str) -> SimResult<String> {
        self.get(field)
            .and_then(|v| v.as_text().map(str::to_string))
            .ok_or_else(|| missing(field))
    }
}

fn missing(field: &str) -> crate::error::SimError {
    KeyError::Field {
        table: String::new(),
        field: field.to_string(),
    }
    .into()
}

impl From<&Datum> for QueryRow {
    fn from(datum: &Datum) -> Self {
        Self {
            vals: datum.vals().to_vec(),
        }
    }
}

/// A filtered slice of one table.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
}

impl QueryResult {
    /// Typed single-cell accessor against the first row.
    pub fn int(&self, field: &str) -> SimResult<i64> {
        self.row(0)?.int(field)
    }

    pub fn double(&self, field: &str) -> SimResult<f64> {
        self.row(0)?.double(field)
    }

    pub fn text(&self, field: &str) -> SimResult<String> {
        self.row(0)?.text(field)
    }

    pub fn row(&self, idx: usize) -> SimResult<&QueryRow> {
        self.rows
            .get(idx)
            .ok_or_else(|| KeyError::Field {
                table: String::new(),
                field: format!("row {idx}"),
            }
            .into())
    }
}

/// Sink for batches of rows, plus the query surface used by tests and
/// post-simulation tooling.
pub trait Backend {
    fn name(&self) -> String;

    /// Accepts a batch; rows arrive in `record()` order.
    fn notify(&mut self, batch: &[Datum]) -> SimResult<()>;

    /// Returns the rows of `table` matching all `conds`.
    fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult>;

    fn flush(&mut self) -> SimResult<()> {
        Ok(())
    }

    fn close(&mut self) -> SimResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Datum {
        let mut d = Datum::new("T");
        d.vals.push(("Commodity".into(), "natu".into()));
        d.vals.push(("Quantity".into(), Value::Double(1.5)));
        d.vals.push(("Time".into(), Value::Int(3)));
        d
    }

    #[test]
    fn cond_operators() {
        let d = row();
        assert!(Cond::new("Commodity", "==", "natu").matches(&d));
        assert!(!Cond::new("Commodity", "!=", "natu").matches(&d));
        assert!(Cond::new("Quantity", ">", 1.0).matches(&d));
        assert!(Cond::new("Time", "<=", 3i64).matches(&d));
        assert!(!Cond::new("Time", "<", 3i64).matches(&d));
        // Missing fields never match.
        assert!(!Cond::new("Nope", "==", 1i64).matches(&d));
    }

    #[test]
    fn int_and_double_cross_compare() {
        let d = row();
        assert!(Cond::new("Time", "==", 3.0).matches(&d));
        assert!(Cond::new("Quantity", ">", 1i64).matches(&d));
    }
}
