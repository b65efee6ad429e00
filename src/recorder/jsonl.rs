use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoError, SimResult};
use crate::recorder::backend::{Backend, Cond, QueryResult, QueryRow};
use crate::recorder::Datum;

/// Append-only JSON-lines backend: one serialized [`Datum`] per line.
///
/// Queries scan the file; they are meant for post-simulation tooling, not
/// the hot path.
#[derive(Debug)]
pub struct JsonlBackend {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlBackend {
    pub fn create(path: impl Into<PathBuf>) -> SimResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(IoError::from)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for JsonlBackend {
    fn name(&self) -> String {
        format!("jsonl:{}", self.path.display())
    }

    fn notify(&mut self, batch: &[Datum]) -> SimResult<()> {
        for datum in batch {
            let line = serde_json::to_string(datum).map_err(IoError::from)?;
            self.writer
                .write_all(line.as_bytes())
                .and_then(|_| self.writer.write_all(b"\n"))
                .map_err(IoError::from)?;
        }
        Ok(())
    }

    fn query(&self, table: &str, conds: &[Cond]) -> SimResult<QueryResult> {
        let file = File::open(&self.path).map_err(IoError::from)?;
        let mut rows = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(IoError::from)?;
            if line.is_empty() {
                continue;
            }
            let datum: Datum = serde_json::from_str(&line).map_err(IoError::from)?;
            if datum.table() == table && conds.iter().all(|c| c.matches(&datum)) {
                rows.push(QueryRow::from(&datum));
            }
        }
        Ok(QueryResult { rows })
    }

    fn flush(&mut self) -> SimResult<()> {
        self.writer.flush().map_err(IoError::from)?;
        Ok(())
    }

    fn close(&mut self) -> SimResult<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rows_through_disk() {
        let dir = std::env::temp_dir().join("nucycle-jsonl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("rows-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let backend = JsonlBackend::create(&path).unwrap();
        let query_side = JsonlBackend::create(&path).unwrap();

        let mut rec = crate::recorder::Recorder::with_buffer_size(10);
        rec.register_backend(Box::new(backend));
        rec.new_datum("Transactions")
            .add_val("Commodity", "natu")
            .add_val("Quantity", 1.25)
            .record()
            .unwrap();
        rec.flush().unwrap();

        let qr = query_side
            .query("Transactions", &[Cond::eq("Commodity", "natu")])
            .unwrap();
        assert_eq!(qr.rows.len(), 1);
        assert_eq!(qr.double("Quantity").unwrap(), 1.25);

        let _ = std::fs::remove_file(&path);
    }
}
