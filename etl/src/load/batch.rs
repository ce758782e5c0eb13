use std::fmt;

use crate::types::DestinationRecord;

/// How a load run is applied to the destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadMode {
    /// Existing rows are kept and the run's rows are added.
    Append,
    /// Existing rows are atomically replaced by the run's rows.
    Truncate,
}

impl LoadMode {
    pub fn from_truncate(truncate_before_write: bool) -> Self {
        if truncate_before_write {
            LoadMode::Truncate
        } else {
            LoadMode::Append
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Append => "append",
            LoadMode::Truncate => "truncate",
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records of one run accumulated for a single staging write.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBatch {
    index: usize,
    records: Vec<DestinationRecord>,
}

impl LoadBatch {
    pub fn new(index: usize, records: Vec<DestinationRecord>) -> Self {
        Self { index, records }
    }

    /// Position of this batch within its run, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn records(&self) -> &[DestinationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A batch that was written to staging storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBatch {
    pub index: usize,
    /// Key of the batch file relative to the staging root.
    pub key: String,
    pub rows: usize,
}

/// All batches staged by one run, under the run's staging prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedLoad {
    run_id: String,
    batches: Vec<StagedBatch>,
}

impl StagedLoad {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            batches: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Staging prefix owning every batch of the run.
    pub fn prefix(&self) -> &str {
        &self.run_id
    }

    /// Key of batch `index` for this run.
    pub fn batch_key(&self, index: usize) -> String {
        format!("{}/batch-{index}.json", self.run_id)
    }

    /// Records a staged batch. Batches are kept sorted by index, so the commit reads them in
    /// extraction order no matter which staging write finished first.
    pub fn push(&mut self, batch: StagedBatch) {
        let position = self
            .batches
            .partition_point(|staged| staged.index < batch.index);
        self.batches.insert(position, batch);
    }

    pub fn batches(&self) -> &[StagedBatch] {
        &self.batches
    }

    pub fn rows(&self) -> usize {
        self.batches.iter().map(|batch| batch.rows).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_batches_stay_in_extraction_order() {
        let mut load = StagedLoad::new("run-1");
        for index in [2, 0, 1] {
            load.push(StagedBatch {
                index,
                key: load.batch_key(index),
                rows: index + 1,
            });
        }

        let keys = load
            .batches()
            .iter()
            .map(|batch| batch.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec!["run-1/batch-0.json", "run-1/batch-1.json", "run-1/batch-2.json"]
        );
        assert_eq!(load.rows(), 6);
    }

    #[test]
    fn load_mode_follows_truncate_flag() {
        assert_eq!(LoadMode::from_truncate(true), LoadMode::Truncate);
        assert_eq!(LoadMode::from_truncate(false), LoadMode::Append);
        assert_eq!(LoadMode::Truncate.to_string(), "truncate");
    }
}
