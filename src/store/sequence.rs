use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CleoError, Result};
use crate::model::format_task_id;
use crate::platform::sha256_string;
use crate::store::atomic;

/// Monotonic id source, persisted as `.sequence.json` and advanced
/// under the same lock scope as the TodoFile write. The counter never
/// moves backward; repair only catches up to the observed maximum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFile {
    pub counter: u64,
    pub last_id: String,
    pub checksum: String,
}

fn checksum_for(counter: u64, last_id: &str) -> String {
    sha256_string(&format!("{counter}:{last_id}"))
}

impl SequenceFile {
    pub fn initial() -> Self {
        let mut seq = Self {
            counter: 0,
            last_id: String::new(),
            checksum: String::new(),
        };
        seq.restamp();
        seq
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::initial());
        }
        atomic::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        atomic::write_json_atomic(path, self)
    }

    pub fn restamp(&mut self) {
        self.checksum = checksum_for(self.counter, &self.last_id);
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum == checksum_for(self.counter, &self.last_id)
    }

    pub fn next_id(&self) -> u64 {
        self.counter + 1
    }

    /// Allocate the next id, advancing the counter.
    pub fn allocate(&mut self) -> u64 {
        self.counter += 1;
        self.last_id = format_task_id(self.counter);
        self.restamp();
        self.counter
    }

    /// Advance the counter to the observed maximum across live and
    /// archived tasks. Moving backward is never permitted.
    pub fn repair_to(&mut self, observed_max: u64) -> Result<bool> {
        if observed_max < self.counter {
            return Ok(false);
        }
        if observed_max == self.counter && self.checksum_valid() {
            return Ok(false);
        }
        if observed_max > self.counter {
            self.counter = observed_max;
            self.last_id = format_task_id(observed_max);
        }
        self.restamp();
        Ok(true)
    }

    /// Compare against the observed maximum; an out-of-sync counter is
    /// an invariant break reported for repair, not silently fixed.
    pub fn check(&self, observed_max: u64) -> Result<()> {
        if self.counter < observed_max {
            return Err(CleoError::ValidationError(format!(
                "sequence counter {} is behind observed max task id {}",
                self.counter, observed_max
            )));
        }
        if !self.checksum_valid() {
            return Err(CleoError::ValidationError(
                "sequence checksum does not match counter state".into(),
            ));
        }
        Ok(())
    }
}
