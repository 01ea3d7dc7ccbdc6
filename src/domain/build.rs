//! Builds: the concrete product set and artifacts derived from a job.

use serde::{Deserialize, Serialize};

use super::job::{DataStandard, Job, JobId};
use super::status::NodeResultStatus;

/// A product in a build, as resolved against the sales catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,

    /// Latest edition number
    pub edition_number: u32,

    /// Latest update number
    pub update_number: u32,

    /// Catalogue status (e.g. "valid", "cancelled")
    #[serde(default)]
    pub status: String,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        edition_number: u32,
        update_number: u32,
        status: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            edition_number,
            update_number,
            status: status.into(),
        }
    }

    /// Lower-cased, quoted tuple used in the build discriminant
    fn discriminant_fragment(&self) -> String {
        format!(
            "\"{}\" \"{}\" \"{}\" \"{}\" ",
            quote_escaped(&self.name.to_lowercase()),
            self.edition_number,
            self.update_number,
            quote_escaped(&self.status.to_lowercase())
        )
    }
}

/// Backslash-escape quotes so a field cannot close its own quoting
fn quote_escaped(field: &str) -> String {
    field.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One output file produced by a builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFile {
    pub file_name: String,

    /// Content hash reported by the file-share service
    pub hash: String,
}

impl CommitFile {
    pub fn new(file_name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            hash: hash.into(),
        }
    }
}

/// Status of one step of the builder's own internal pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildNodeStatus {
    pub node_id: String,
    pub status: NodeResultStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl BuildNodeStatus {
    pub fn new(node_id: impl Into<String>, status: NodeResultStatus) -> Self {
        Self {
            node_id: node_id.into(),
            status,
            error_message: None,
        }
    }
}

/// Standard-specific build details
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildKind {
    S57,

    /// S-100 builds may carry product specifications other than S-101
    S100 {
        #[serde(default)]
        product_specifications: Vec<String>,
    },
}

impl BuildKind {
    pub fn for_standard(data_standard: DataStandard) -> Self {
        match data_standard {
            DataStandard::S57 => Self::S57,
            DataStandard::S100 => Self::S100 {
                product_specifications: Vec::new(),
            },
        }
    }

    pub fn data_standard(&self) -> DataStandard {
        match self {
            Self::S57 => DataStandard::S57,
            Self::S100 { .. } => DataStandard::S100,
        }
    }
}

/// The concrete unit of work derived from a job for one data standard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub job_id: JobId,

    pub kind: BuildKind,

    /// Products in request order
    pub products: Vec<Product>,

    /// Output files produced by the builder
    #[serde(default)]
    pub build_commit_info: Vec<CommitFile>,

    /// Per-node results from the builder's internal pipeline
    #[serde(default)]
    pub statuses: Vec<BuildNodeStatus>,

    /// Raw captured log lines from the builder
    #[serde(default)]
    pub log_messages: Vec<String>,
}

impl Build {
    /// Create an empty build for a job
    pub fn for_job(job: &Job, products: Vec<Product>) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: BuildKind::for_standard(job.data_standard),
            products,
            build_commit_info: Vec::new(),
            statuses: Vec::new(),
            log_messages: Vec::new(),
        }
    }

    pub fn data_standard(&self) -> DataStandard {
        self.kind.data_standard()
    }

    /// Canonical product-set string used as fingerprint input.
    ///
    /// Independent of the caller's product ordering: fragments are sorted
    /// before concatenation.
    pub fn get_product_discriminant(&self) -> String {
        let mut fragments: Vec<String> = self
            .products
            .iter()
            .map(Product::discriminant_fragment)
            .collect();
        fragments.sort();
        fragments.concat()
    }

    pub fn get_product_count(&self) -> usize {
        self.products.len()
    }

    /// Product names joined with ", "
    pub fn get_product_delimited_list(&self) -> String {
        self.products
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First output file reported by the builder
    pub fn first_commit_file(&self) -> Option<&CommitFile> {
        self.build_commit_info.first()
    }

    /// Take the builder-reported results from a stored copy of this build
    pub fn merge_builder_results(&mut self, reported: Build) {
        self.build_commit_info = reported.build_commit_info;
        self.statuses = reported.statuses;
        if !reported.log_messages.is_empty() {
            self.log_messages = reported.log_messages;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_with(products: Vec<Product>) -> Build {
        Build {
            job_id: JobId::from("J1"),
            kind: BuildKind::for_standard(DataStandard::S100),
            products,
            build_commit_info: Vec::new(),
            statuses: Vec::new(),
            log_messages: Vec::new(),
        }
    }

    #[test]
    fn test_discriminant_format() {
        let build = build_with(vec![
            Product::new("104FR2", 0, 1, "Valid"),
            Product::new("101GB1", 1, 0, "Valid"),
        ]);

        assert_eq!(
            build.get_product_discriminant(),
            "\"101gb1\" \"1\" \"0\" \"valid\" \"104fr2\" \"0\" \"1\" \"valid\" "
        );
    }

    #[test]
    fn test_discriminant_is_case_normalized() {
        let upper = build_with(vec![Product::new("101GB1", 1, 0, "VALID")]);
        let lower = build_with(vec![Product::new("101gb1", 1, 0, "valid")]);

        assert_eq!(upper.get_product_discriminant(), lower.get_product_discriminant());
    }

    #[test]
    fn test_product_list_helpers() {
        let build = build_with(vec![
            Product::new("101GB1", 1, 0, "valid"),
            Product::new("104FR2", 0, 1, "valid"),
        ]);

        assert_eq!(build.get_product_count(), 2);
        assert_eq!(build.get_product_delimited_list(), "101GB1, 104FR2");
        assert!(build.first_commit_file().is_none());
    }

    #[test]
    fn test_merge_builder_results() {
        let mut build = build_with(vec![Product::new("101GB1", 1, 0, "valid")]);
        build.log_messages = vec!["captured".to_string()];

        let mut reported = build.clone();
        reported.build_commit_info = vec![CommitFile::new("S100.zip", "abc")];
        reported.statuses = vec![BuildNodeStatus::new("download", NodeResultStatus::Succeeded)];
        reported.log_messages = Vec::new();

        build.merge_builder_results(reported);

        assert_eq!(build.first_commit_file().unwrap().file_name, "S100.zip");
        assert_eq!(build.statuses.len(), 1);
        // Container-captured logs survive when the builder reported none
        assert_eq!(build.log_messages, vec!["captured".to_string()]);
    }
}
