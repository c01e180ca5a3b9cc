use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const SUMMARY_FILE: &str = "summary.jsonl";

/// What gets recorded about every epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub mean_loss: f64,
    pub accuracy: f64,
    pub not_na_accuracy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<f64>,
    pub best_metric: f64,
}

/// Appends one JSON line per epoch to `<dir>/summary.jsonl`.
#[derive(Debug)]
pub struct SummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl SummaryWriter {
    /// Opens the summary file of `dir` for appending, creating both if absent.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(SUMMARY_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&mut self, summary: &EpochSummary) -> Result<()> {
        serde_json::to_writer(&mut self.out, summary)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let summary = |epoch, metric| EpochSummary {
            epoch,
            mean_loss: 1.5,
            accuracy: 0.5,
            not_na_accuracy: 0.25,
            metric,
            best_metric: 0.75,
        };

        let mut writer = SummaryWriter::create(&dir.path().join("summary")).unwrap();
        writer.write(&summary(0, Some(0.75))).unwrap();
        writer.write(&summary(1, None)).unwrap();

        let text = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<EpochSummary> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines, vec![summary(0, Some(0.75)), summary(1, None)]);
        assert!(!text.lines().nth(1).unwrap().contains("\"metric\""));
    }
}
