pub mod batch_downloader;
pub mod installer_script;
pub mod prober;

pub use batch_downloader::{BatchDownloader, BatchObserver, BatchOptions};
pub use installer_script::write_batch_script;
pub use prober::Prober;
