//! Append-only JSON-lines log of a hyperparameter search run, plus the
//! final prediction dump.

use crate::ensemble::{EnsembleErrors, EnsemblePrediction};
use crate::errors::Result;
use crate::types::TrajectoryRecord;
use serde::{Deserialize, Serialize};
use snapmix_search::HpConfig;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// One machine-parseable log line.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// A completed trial: its configuration, best trajectory entry and
    /// wall-clock cost
    Trial {
        config: HpConfig,
        best: TrajectoryRecord,
        elapsed_secs: f64,
    },
    /// A trial abandoned on divergence, excluded from ranking
    NanLoss { config: HpConfig, step: usize },
    /// The winning configuration with its retained step sets
    BestConfig {
        config: HpConfig,
        top_steps: Vec<usize>,
        bayes_steps: Vec<usize>,
    },
    /// Final ensemble errors on the test split; one line per evaluated
    /// ensemble (the top-ranked set and the post-burn-in window), tagged
    /// by `label`
    TestEval {
        label: String,
        errors: EnsembleErrors,
    },
}

/// Single-writer JSON-lines log file, one record per line, flushed per
/// record.
pub struct RunLog {
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn create(path: impl AsRef<Path>) -> Result<RunLog> {
        Ok(RunLog {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        writeln!(self.writer)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Parses a log file back into records.
    pub fn read_back(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            records.push(serde_json::from_str(&line?)?);
        }
        Ok(records)
    }
}

/// Writes the final ensemble prediction as one JSON document.
pub fn dump_prediction(path: impl AsRef<Path>, pred: &EnsemblePrediction) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer(file, pred)?;
    Ok(())
}
