//! Table keys for the stored domain types.

use crate::domain::{Build, BuildFingerprint, BuildMemento, DataStandardTimestamp, Job, JobHistory};

use super::TableEntity;

pub const JOB_ROW_KEY: &str = "job";
pub const MEMENTO_ROW_KEY: &str = "memento";
pub const TIMESTAMP_ROW_KEY: &str = "last_successful";

impl TableEntity for Job {
    const TABLE: &'static str = "jobs";

    fn partition_key(&self) -> String {
        self.id.to_string()
    }

    fn row_key(&self) -> String {
        JOB_ROW_KEY.to_string()
    }
}

/// Builds are keyed by job so a builder can write its results back
impl TableEntity for Build {
    const TABLE: &'static str = "builds";

    fn partition_key(&self) -> String {
        self.job_id.to_string()
    }

    fn row_key(&self) -> String {
        self.data_standard().to_string()
    }
}

impl TableEntity for BuildFingerprint {
    const TABLE: &'static str = "fingerprints";

    fn partition_key(&self) -> String {
        self.data_standard.to_string()
    }

    fn row_key(&self) -> String {
        self.discriminant.clone()
    }
}

impl TableEntity for JobHistory {
    const TABLE: &'static str = "job_history";

    fn partition_key(&self) -> String {
        self.data_standard.to_string()
    }

    fn row_key(&self) -> String {
        self.job_id.to_string()
    }
}

impl TableEntity for BuildMemento {
    const TABLE: &'static str = "mementos";

    fn partition_key(&self) -> String {
        self.job_id.to_string()
    }

    fn row_key(&self) -> String {
        MEMENTO_ROW_KEY.to_string()
    }
}

impl TableEntity for DataStandardTimestamp {
    const TABLE: &'static str = "data_standard_timestamps";

    fn partition_key(&self) -> String {
        self.data_standard.to_string()
    }

    fn row_key(&self) -> String {
        TIMESTAMP_ROW_KEY.to_string()
    }
}
