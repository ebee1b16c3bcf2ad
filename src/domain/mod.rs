pub mod catalog;
pub mod error;
pub mod model;
pub mod settings;

pub use catalog::Catalog;
pub use error::{AppError, TransferError};
pub use model::{
    BatchSummary, CatalogEntry, Category, CompletedDownload, DownloadTask, ProbeOutcome,
    ProbeReport, ProbeResult, TaskFailure, TaskId, TaskState,
};
pub use settings::Settings;
