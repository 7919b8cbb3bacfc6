//! Scalar summaries of a training run, one CSV row per value.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub tag: String,
    pub step: usize,
    pub value: f64,
    pub wall_time: f64,
}

pub struct ScalarWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl ScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.csv";

    /// Creates `scalars.csv` inside `run_dir`.
    pub fn create(run_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(run_dir.as_ref())?;
        let path = run_dir.as_ref().join(Self::FILE_NAME);
        let writer = csv::Writer::from_path(&path)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, step: usize, value: f64) -> Result<()> {
        let wall_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        self.writer.serialize(ScalarRecord {
            tag: tag.to_string(),
            step,
            value,
            wall_time,
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for ScalarWriter {
    fn drop(&mut self) {
        if let Err(err) = self.writer.flush() {
            tracing::warn!("failed to flush {}: {err}", self.path.display());
        }
    }
}

pub fn read_scalars(path: impl AsRef<Path>) -> Result<Vec<ScalarRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<std::result::Result<Vec<ScalarRecord>, _>>()?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ScalarWriter::create(dir.path().join("run")).unwrap();
        writer.add_scalar("TRAIN/LOSS/total_loss", 0, 1.5).unwrap();
        writer.add_scalar("TRAIN/HPs/lr", 0, 0.005).unwrap();
        writer.add_scalar("TRAIN/LOSS/total_loss", 1, 1.25).unwrap();
        writer.flush().unwrap();

        let records = read_scalars(writer.path()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].tag, "TRAIN/LOSS/total_loss");
        assert_eq!(records[2].step, 1);
        assert_eq!(records[2].value, 1.25);
    }
}
