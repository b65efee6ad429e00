use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{IoError, SimResult};
use crate::recorder::backend::{Backend, Cond, QueryResult, QueryRow};
use crate::recorder::Datum;

/// In-memory backend with full query support.
///
/// Handles are cheap clones over shared storage, so a test can keep one
/// while the recorder owns another.
#[derive(Debug, Clone, Default)]
pub struct MemBackend {
    tables: Arc<Mutex<BTreeMap<String, Vec<Datum>>>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all tables that have received rows.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .lock()
            .expect("backend storage poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Total row count of one table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .expect("backend storage poisoned")
            .get(table)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Backend for MemBackend {
    fn name(&self) -> String {
        "memory".to_string()
    }

    fn notify(&mut self, batch: &[Datum]) -> SimResult<()> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| IoError::Backend("memory backend poisoned".to_string()))?;
        for datum in batch {
            tables
                .entry(datum.table().to_string())
                .or_default()
                .push(datum.clone());
        }
        Ok(())
    }

    fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult> {
        let tables = self
            .tables
            .lock()
            .map_err(|_| IoError::Backend("memory backend poisoned".to_string()))?;
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|d| conds.iter().all(|c| c.matches(d)))
                    .map(QueryRow::from)
                    .collect()
            })
            .unwrap_or_default();
        Ok(QueryResult { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Recorder;

    #[test]
    fn filters_apply_conjunctively() {
        let mem = MemBackend::new();
        let mut rec = Recorder::with_buffer_size(10);
        rec.register_backend(Box::new(mem.clone()));

        for (commod, qty) in [("natu", 1.0), ("natu", 2.0), ("leu", 2.0)] {
            rec.new_datum("Transactions")
                .add_val("Commodity", commod)
                .add_val("Quantity", qty)
                .record()
                .unwrap();
        }
        rec.flush().unwrap();

        let qr = mem
            .query(
                "Transactions",
                &[
                    Cond::eq("Commodity", "natu"),
                    Cond::new("Quantity", ">", 1.5),
                ],
            )
            .unwrap();
        assert_eq!(qr.rows.len(), 1);
        assert_eq!(qr.double("Quantity").unwrap(), 2.0);
    }

    #[test]
    fn unknown_table_yields_empty_result() {
        let mem = MemBackend::new();
        assert!(mem.query("Nope", &[]).unwrap().rows.is_empty());
        assert_eq!(mem.row_count("Nope"), 0);
    }
}
