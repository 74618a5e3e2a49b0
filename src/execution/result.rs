//! Execution results handed to the caller and the audit log

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tabular query output; rows follow `columns` order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build from JSON objects, one per row. Column order is taken from the first row.
    pub fn from_json_rows(objects: Vec<Value>) -> Self {
        let columns: Vec<String> = match objects.first() {
            Some(Value::Object(first)) => first.keys().cloned().collect(),
            _ => Vec::new(),
        };

        let rows = objects
            .into_iter()
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Round every fractional cell to `precision` decimal places
    pub fn rounded(mut self, precision: u32) -> Self {
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                round_value(cell, precision);
            }
        }
        self
    }
}

/// Integers and non-numeric values are left untouched
pub fn round_value(value: &mut Value, precision: u32) {
    let Value::Number(n) = value else {
        return;
    };
    if n.is_i64() || n.is_u64() {
        return;
    }
    if let Some(f) = n.as_f64() {
        let factor = 10f64.powi(precision as i32);
        let rounded = (f * factor).round() / factor;
        if let Some(num) = serde_json::Number::from_f64(rounded) {
            *value = Value::Number(num);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Blocked,
    PlanUnavailable,
    PlanLimitExceeded,
    Execution,
}

impl FailureKind {
    fn prefix(&self) -> &'static str {
        match self {
            FailureKind::Blocked => "query was blocked for security reasons",
            FailureKind::PlanUnavailable => "syntax or analysis error",
            FailureKind::PlanLimitExceeded => "execution blocked",
            FailureKind::Execution => "error executing query",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionOutcome {
    Success { rows: Table, execution_time_ms: u64 },
    Failure { kind: FailureKind, message: String },
}

impl ExecutionOutcome {
    /// Failure with a display message of the form `<kind prefix>: <detail>`
    pub fn failure(kind: FailureKind, detail: impl AsRef<str>) -> Self {
        let detail = detail.as_ref();
        let message = if detail.is_empty() {
            kind.prefix().to_string()
        } else {
            format!("{}: {}", kind.prefix(), detail)
        };
        ExecutionOutcome::Failure { kind, message }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionOutcome::Failure { kind, .. } => Some(*kind),
            ExecutionOutcome::Success { .. } => None,
        }
    }
}

/// Output of the execution half. Cost and rows are present only when a plan was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: ExecutionOutcome,
    pub total_cost: Option<f64>,
    pub plan_rows: Option<u64>,
}

impl RunReport {
    pub fn without_plan(outcome: ExecutionOutcome) -> Self {
        Self {
            outcome,
            total_cost: None,
            plan_rows: None,
        }
    }
}
