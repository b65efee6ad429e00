pub mod backend;
pub mod jsonl;
pub mod memory;

pub use backend::{Backend, Cond, CondOp, QueryResult, QueryRow, Value};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SimResult, StateError};

/// Rows buffered before a flush is forced.
pub const DEFAULT_BUFFER_ROWS: usize = 500;

/// A single row bound for a table: the table name plus ordered
/// `(field, value)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datum {
    table: String,
    vals: Vec<(String, Value)>,
}

impl Datum {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            vals: Vec::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn vals(&self) -> &[(String, Value)] {
        &self.vals
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.vals
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }
}

/// Chained row builder returned by [`Recorder::new_datum`].
pub struct DatumBuilder<'a> {
    recorder: &'a mut Recorder,
    datum: Datum,
}

impl<'a> DatumBuilder<'a> {
    pub fn add_val(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.datum.vals.push((field.into(), value.into()));
        self
    }

    /// Enqueues the row. Ordering follows `record()` call order.
    pub fn record(self) -> SimResult<()> {
        self.recorder.record(self.datum)
    }
}

/// Accepts rows from the simulation thread and pushes them to registered
/// backends in arrival order, buffering up to a configurable count.
///
/// All rows arising from a timestep are flushed before the kernel advances
/// past that step's end; the kernel owns that call.
pub struct Recorder {
    backends: Vec<Box<dyn Backend>>,
    buffer: Vec<Datum>,
    buffer_cap: usize,
    closed: bool,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_ROWS)
    }

    pub fn with_buffer_size(buffer_cap: usize) -> Self {
        Self {
            backends: Vec::new(),
            buffer: Vec::new(),
            buffer_cap: buffer_cap.max(1),
            closed: false,
        }
    }

    pub fn register_backend(&mut self, backend: Box<dyn Backend>) {
        debug!(backend = %backend.name(), "backend registered");
        self.backends.push(backend);
    }

    /// Starts a row for `table`.
    pub fn new_datum(&mut self, table: impl Into<String>) -> DatumBuilder<'_> {
        DatumBuilder {
            datum: Datum::new(table),
            recorder: self,
        }
    }

    pub fn record(&mut self, datum: Datum) -> SimResult<()> {
        if self.closed {
            return Err(StateError::RecorderClosed.into());
        }
        self.buffer.push(datum);
        if self.buffer.len() >= self.buffer_cap {
            self.flush()?;
        }
        Ok(())
    }

    /// Pushes all buffered rows to every backend, in arrival order.
    pub fn flush(&mut self) -> SimResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.buffer);
        for backend in &mut self.backends {
            backend.notify(&batch)?;
            backend.flush()?;
        }
        Ok(())
    }

    /// Flushes and closes every backend; further records fail.
    pub fn close(&mut self) -> SimResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        for backend in &mut self.backends {
            if let Err(err) = backend.close() {
                warn!(backend = %backend.name(), %err, "backend close failed");
            }
        }
        self.closed = true;
        Ok(())
    }

    /// Queries the first backend able to answer.
    pub fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult> {
        let backend = self.backends.first().ok_or_else(|| {
            crate::error::IoError::Backend("no backend registered".to_string())
        })?;
        backend.query(table, conds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::memory::MemBackend;

    #[test]
    fn rows_flush_in_record_order() {
        let mem = MemBackend::new();
        let mut rec = Recorder::with_buffer_size(100);
        rec.register_backend(Box::new(mem.clone()));

        for i in 0..5i64 {
            rec.new_datum("Seq")
                .add_val("Idx", i)
                .record()
                .unwrap();
        }
        rec.flush().unwrap();

        let qr = mem.query("Seq", &[]).unwrap();
        let idx: Vec<i64> = qr.rows.iter().map(|r| r.int("Idx").unwrap()).collect();
        assert_eq!(idx, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn buffer_cap_forces_flush() {
        let mem = MemBackend::new();
        let mut rec = Recorder::with_buffer_size(2);
        rec.register_backend(Box::new(mem.clone()));

        rec.new_datum("T").add_val("A", 1i64).record().unwrap();
        assert_eq!(mem.query("T", &[]).unwrap().rows.len(), 0);
        rec.new_datum("T").add_val("A", 2i64).record().unwrap();
        assert_eq!(mem.query("T", &[]).unwrap().rows.len(), 2);
    }

    #[test]
    fn closed_recorder_rejects_rows() {
        let mut rec = Recorder::new();
        rec.close().unwrap();
        let err = rec.new_datum("T").add_val("A", 1i64).record().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::State);
    }
}
