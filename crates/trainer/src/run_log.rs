use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

/// One line of the run log.
#[derive(Debug, Clone)]
pub struct PassRecord {
    /// 0-based; written 1-based.
    pub pass_index: usize,
    pub loss: f64,
    pub rate: f64,
    pub timestamp: DateTime<Local>,
}

impl PassRecord {
    pub fn now(pass_index: usize, loss: f64, rate: f64) -> Self {
        Self {
            pass_index,
            loss,
            rate,
            timestamp: Local::now(),
        }
    }

    /// `{pass} {loss:.6} {ppl:.4} {rate:.8} {timestamp}`
    pub fn format_line(&self) -> String {
        format!(
            "{} {:.6} {:.4} {:.8} {}\n",
            self.pass_index + 1,
            self.loss,
            self.loss.exp(),
            self.rate,
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.6f")
        )
    }
}

/// Append-only per-pass log. Every record is flushed before `append` returns.
pub struct RunLog {
    sink: Box<dyn Write>,
}

impl RunLog {
    /// Opens (creating if needed) `path` in append mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(file))
    }

    pub fn from_writer<W: Write + 'static>(writer: W) -> Self {
        Self {
            sink: Box::new(writer),
        }
    }

    pub fn append(&mut self, record: &PassRecord) -> Result<()> {
        self.sink.write_all(record.format_line().as_bytes())?;
        self.sink.flush()?;
        Ok(())
    }
}

impl Drop for RunLog {
    fn drop(&mut self) {
        let _ = self.sink.flush();
    }
}
