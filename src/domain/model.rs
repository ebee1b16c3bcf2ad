use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use url::Url;

use super::TransferError;
use crate::utils::derive_filename;

/// Fixed set of catalog sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "browser")]
    Browsers,
    #[serde(alias = "dev", alias = "development_tools")]
    Development,
    Office,
    #[serde(alias = "multimedia")]
    Media,
    #[serde(alias = "chat")]
    Communication,
    Security,
    System,
    #[serde(alias = "tools")]
    Utilities,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Browsers,
        Category::Development,
        Category::Office,
        Category::Media,
        Category::Communication,
        Category::Security,
        Category::System,
        Category::Utilities,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Browsers => "Browsers",
            Category::Development => "Development",
            Category::Office => "Office",
            Category::Media => "Media",
            Category::Communication => "Communication",
            Category::Security => "Security",
            Category::System => "System",
            Category::Utilities => "Utilities",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A downloadable package, validated when the catalog is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub category: Category,
    pub url: Url,
    /// Overrides the filename derived from the URL.
    pub filename: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, category: Category, url: Url) -> Self {
        Self {
            name: name.into(),
            category,
            url,
            filename: None,
            description: None,
            version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The server answered; any status counts.
    Reachable { status: u16 },
    Unreachable { reason: String },
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub entry: CatalogEntry,
    pub outcome: ProbeOutcome,
}

impl ProbeResult {
    pub fn is_reachable(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Reachable { .. })
    }
}

/// Probe results split into the next download set and the excluded entries.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    pub reachable: Vec<CatalogEntry>,
    pub unreachable: Vec<(CatalogEntry, String)>,
}

impl From<Vec<ProbeResult>> for ProbeReport {
    fn from(results: Vec<ProbeResult>) -> Self {
        let mut report = ProbeReport::default();
        for result in results {
            match result.outcome {
                ProbeOutcome::Reachable { .. } => report.reachable.push(result.entry),
                ProbeOutcome::Unreachable { reason } => {
                    report.unreachable.push((result.entry, reason))
                }
            }
        }
        report
    }
}

/// Position of a task in its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub id: TaskId,
    pub entry: CatalogEntry,
    pub destination: PathBuf,
}

impl DownloadTask {
    /// Builds one task per entry, each with a distinct destination inside `target_dir`.
    pub fn plan(entries: &[CatalogEntry], target_dir: &Path) -> Vec<DownloadTask> {
        let mut taken = HashSet::new();

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let filename = unique_filename(&derive_filename(entry), &mut taken);
                DownloadTask {
                    id: TaskId(index),
                    entry: entry.clone(),
                    destination: target_dir.join(filename),
                }
            })
            .collect()
    }

    /// Destinations that would be overwritten by this batch.
    pub fn existing_destinations(tasks: &[DownloadTask]) -> Vec<PathBuf> {
        tasks
            .iter()
            .filter(|task| task.destination.exists())
            .map(|task| task.destination.clone())
            .collect()
    }

    /// Staging file the transfer writes into before the final rename.
    pub fn partial_path(&self) -> PathBuf {
        let mut name = self
            .destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.destination.with_file_name(name)
    }
}

fn unique_filename(filename: &str, taken: &mut HashSet<String>) -> String {
    let (stem, ext) = match filename.rfind('.') {
        Some(dot) if dot > 0 => (&filename[..dot], &filename[dot..]),
        _ => (filename, ""),
    };

    std::iter::once(filename.to_string())
        .chain((2..).map(|n| format!("{stem} ({n}){ext}")))
        .find(|candidate| reserve(candidate, taken))
        .unwrap_or_else(|| filename.to_string())
}

/// Claims a filename together with its `.part` staging name. Fails if either
/// is already claimed by another task.
fn reserve(filename: &str, taken: &mut HashSet<String>) -> bool {
    let key = filename.to_lowercase();
    let staging = format!("{key}.part");
    if taken.contains(&key) || taken.contains(&staging) {
        return false;
    }
    taken.insert(key);
    taken.insert(staging);
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    InProgress {
        bytes_done: u64,
        bytes_total: Option<u64>,
    },
    Succeeded {
        path: PathBuf,
        bytes: u64,
    },
    Failed(TransferError),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded { .. } | TaskState::Failed(_))
    }

    /// Fraction of the task done, or `None` while the size is unknown.
    pub fn fraction(&self) -> Option<f32> {
        match self {
            TaskState::InProgress {
                bytes_done,
                bytes_total: Some(total),
            } if *total > 0 => Some((*bytes_done as f32 / *total as f32).min(1.0)),
            TaskState::Succeeded { .. } => Some(1.0),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "Waiting"),
            TaskState::InProgress {
                bytes_done,
                bytes_total: Some(total),
            } if *total > 0 => write!(
                f,
                "{:.1}% ({} / {} bytes)",
                *bytes_done as f64 / *total as f64 * 100.0,
                bytes_done,
                total
            ),
            TaskState::InProgress { bytes_done, .. } => write!(f, "{} bytes", bytes_done),
            TaskState::Succeeded { .. } => write!(f, "Done"),
            TaskState::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub name: String,
    pub reason: TransferError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub target_dir: PathBuf,
    pub succeeded: Vec<CompletedDownload>,
    pub failed: Vec<TaskFailure>,
    pub was_cancelled: bool,
}

impl BatchSummary {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, url: &str) -> CatalogEntry {
        CatalogEntry::new(name, Category::Utilities, Url::parse(url).unwrap())
    }

    #[test]
    fn test_plan_assigns_distinct_destinations() {
        let entries = vec![
            entry("7-Zip", "https://example.com/setup.exe"),
            entry("Notepad++", "https://example.org/setup.exe"),
            entry("VLC", "https://example.net/vlc.msi"),
        ];
        let tasks = DownloadTask::plan(&entries, Path::new("/tmp/bundle"));

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].destination, Path::new("/tmp/bundle/setup.exe"));
        assert_eq!(tasks[1].destination, Path::new("/tmp/bundle/setup (2).exe"));
        assert_eq!(tasks[2].destination, Path::new("/tmp/bundle/vlc.msi"));
        assert_eq!(tasks[2].id, TaskId(2));
    }

    #[test]
    fn test_plan_keeps_staging_files_apart_from_destinations() {
        let mut staged = entry("Staged", "https://example.com/download");
        staged.filename = Some("a.exe.part".to_string());
        let plain = entry("Plain", "https://example.org/a.exe");

        for entries in [vec![staged.clone(), plain.clone()], vec![plain, staged]] {
            let tasks = DownloadTask::plan(&entries, Path::new("/tmp/bundle"));
            for task in &tasks {
                for other in &tasks {
                    assert_ne!(task.partial_path(), other.destination);
                }
            }
            assert_ne!(tasks[0].destination, tasks[1].destination);
        }
    }

    #[test]
    fn test_partial_path_sits_next_to_destination() {
        let tasks = DownloadTask::plan(
            &[entry("VLC", "https://example.net/vlc.msi")],
            Path::new("/tmp/bundle"),
        );
        assert_eq!(
            tasks[0].partial_path(),
            Path::new("/tmp/bundle/vlc.msi.part")
        );
    }

    #[test]
    fn test_probe_report_partitions_results() {
        let results = vec![
            ProbeResult {
                entry: entry("A", "https://a.example/a.exe"),
                outcome: ProbeOutcome::Reachable { status: 405 },
            },
            ProbeResult {
                entry: entry("B", "https://b.example/b.exe"),
                outcome: ProbeOutcome::Unreachable {
                    reason: "connection refused".to_string(),
                },
            },
        ];
        let report = ProbeReport::from(results);
        assert_eq!(report.reachable.len(), 1);
        assert_eq!(report.reachable[0].name, "A");
        assert_eq!(report.unreachable[0].1, "connection refused");
    }

    #[test]
    fn test_task_state_fraction() {
        let half = TaskState::InProgress {
            bytes_done: 50,
            bytes_total: Some(100),
        };
        assert_eq!(half.fraction(), Some(0.5));
        assert!(!half.is_terminal());

        let unknown = TaskState::InProgress {
            bytes_done: 50,
            bytes_total: None,
        };
        assert_eq!(unknown.fraction(), None);
        assert!(TaskState::Failed(TransferError::Cancelled).is_terminal());
    }
}
