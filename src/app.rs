use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use futures::channel::mpsc;
use iced::Task;

use crate::api::ApiClient;
use crate::application::{write_batch_script, BatchDownloader, BatchObserver, BatchOptions, Prober};
use crate::domain::{
    AppError, BatchSummary, Catalog, CatalogEntry, DownloadTask, ProbeOutcome, ProbeReport,
    ProbeResult, Settings, TaskId, TaskState,
};
use crate::ui::{EntryRow, ProbeRow, TaskRow, WizardMessage, WizardStep, WizardView};

const SETTINGS_FILE: &str = "settings.json";
/// Replaces the bundled catalog when present in the working directory.
const CATALOG_FILE: &str = "catalog.json";

pub struct InstallerApp {
    view: WizardView,
    catalog: Catalog,
    settings: Settings,
    api_client: ApiClient,
    /// Reachable entries from the last connectivity check.
    download_set: Vec<CatalogEntry>,
    downloader: Option<BatchDownloader>,
    overwrite_confirmed: bool,
    summary: Option<BatchSummary>,
}

impl InstallerApp {
    pub fn new(catalog: Catalog, settings: Settings) -> Self {
        let mut view = WizardView::default();
        view.download_dir = settings.download_dir.display().to_string();
        view.entries = catalog
            .by_category()
            .into_iter()
            .flat_map(|(_, entries)| entries)
            .map(|entry| EntryRow {
                name: entry.name.clone(),
                category: entry.category,
                description: entry.description.clone().unwrap_or_default(),
                version: entry.version.clone(),
                selected: false,
                visible: true,
            })
            .collect();

        Self {
            view,
            catalog,
            settings,
            api_client: ApiClient::default(),
            download_set: Vec::new(),
            downloader: None,
            overwrite_confirmed: false,
            summary: None,
        }
    }

    /// Boots from `settings.json` and `catalog.json` in the working directory,
    /// falling back to defaults and the bundled catalog.
    pub fn load() -> Self {
        let mut problems = Vec::new();

        let settings = match Settings::load_or_default(Path::new(SETTINGS_FILE)) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Falling back to default settings: {}", e);
                problems.push(e.to_string());
                Settings::default()
            }
        };
        let catalog_path = Path::new(CATALOG_FILE);
        let catalog = if catalog_path.exists() {
            Catalog::load(catalog_path)
        } else {
            Catalog::bundled()
        };
        let catalog = match catalog {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!("Catalog is unusable: {}", e);
                problems.push(e.to_string());
                Catalog::default()
            }
        };

        tracing::info!(entries = catalog.len(), "Catalog loaded");
        let mut app = Self::new(catalog, settings);
        if !problems.is_empty() {
            app.view.status_message = problems.join("; ");
        }
        app
    }

    fn selected_entries(&self) -> Vec<CatalogEntry> {
        self.view
            .entries
            .iter()
            .filter(|row| row.selected)
            .filter_map(|row| self.catalog.find(&row.name).cloned())
            .collect()
    }

    fn target_dir(&self) -> PathBuf {
        PathBuf::from(self.view.download_dir.trim())
    }

    /// Checks whether the current step is complete; returns the reason if not.
    fn can_advance(&self) -> Result<(), String> {
        match self.view.step {
            WizardStep::Select if self.view.selected_count() == 0 => {
                Err("Select at least one application".to_string())
            }
            WizardStep::Settings if self.view.download_dir.trim().is_empty() => {
                Err("Choose a download folder".to_string())
            }
            WizardStep::Connectivity if self.view.probe_rows.is_empty() => {
                Err("Run the connectivity check first".to_string())
            }
            WizardStep::Connectivity if self.download_set.is_empty() => {
                Err("None of the selected servers are reachable".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    UiMessage(WizardMessage),
    FolderPicked(Option<PathBuf>),
    ProbeFinished(Result<Vec<ProbeResult>, AppError>),
    /// (task, state, overall progress 0.0 to 1.0)
    TaskProgress(TaskId, TaskState, f32),
    BatchFinished(Result<BatchSummary, AppError>),
    ScriptPathChosen(Option<PathBuf>),
    ScriptSaved(Result<PathBuf, AppError>),
}

/// Forwards batch progress into the iced runtime.
struct ChannelObserver {
    sender: mpsc::UnboundedSender<Message>,
}

impl BatchObserver for ChannelObserver {
    fn on_progress(&mut self, id: TaskId, state: &TaskState, overall: f32) {
        let _ = self
            .sender
            .unbounded_send(Message::TaskProgress(id, state.clone(), overall));
    }

    fn on_batch_done(&mut self, summary: &BatchSummary) {
        tracing::debug!(
            succeeded = summary.succeeded_count(),
            failed = summary.failed_count(),
            "Closing progress stream"
        );
        self.sender.close_channel();
    }
}

pub fn update(app: &mut InstallerApp, message: Message) -> Task<Message> {
    match message {
        Message::UiMessage(ui_msg) => {
            app.view.update(ui_msg.clone());
            return handle_ui(app, ui_msg);
        }
        Message::FolderPicked(Some(path)) => {
            app.view.download_dir = path.display().to_string();
        }
        Message::FolderPicked(None) => {}
        Message::ProbeFinished(result) => {
            app.view.is_probing = false;
            match result {
                Ok(results) => {
                    app.view.probe_rows = results
                        .iter()
                        .map(|result| ProbeRow {
                            name: result.entry.name.clone(),
                            detail: match &result.outcome {
                                ProbeOutcome::Reachable { status } => format!("HTTP {}", status),
                                ProbeOutcome::Unreachable { reason } => reason.clone(),
                            },
                            reachable: result.is_reachable(),
                        })
                        .collect();

                    let report = ProbeReport::from(results);
                    app.view.status_message = if report.unreachable.is_empty() {
                        "All servers are reachable".to_string()
                    } else {
                        let excluded: Vec<&str> = report
                            .unreachable
                            .iter()
                            .map(|(entry, _)| entry.name.as_str())
                            .collect();
                        format!("Will skip unreachable: {}", excluded.join(", "))
                    };
                    app.download_set = report.reachable;
                    app.overwrite_confirmed = false;
                }
                Err(e) => {
                    app.view.status_message = format!("Connectivity check failed: {}", e);
                }
            }
        }
        Message::TaskProgress(id, state, overall) => {
            app.view.overall_progress = overall;
            if let Some(row) = app.view.task_rows.get_mut(id.0) {
                row.status = state.to_string();
                if let Some(fraction) = state.fraction() {
                    row.fraction = fraction;
                } else if state.is_terminal() {
                    row.fraction = 1.0;
                }
            }
        }
        Message::BatchFinished(result) => {
            app.view.is_downloading = false;
            app.downloader = None;
            match result {
                Ok(summary) => {
                    app.view.summary_lines = summary_lines(&summary);
                    app.view.status_message = format!(
                        "{} downloaded, {} failed",
                        summary.succeeded_count(),
                        summary.failed_count()
                    );
                    app.summary = Some(summary);
                    app.view.step = WizardStep::Done;
                }
                Err(e) => {
                    app.overwrite_confirmed = false;
                    app.view.task_rows.clear();
                    app.view.status_message = format!("Download could not start: {}", e);
                }
            }
        }
        Message::ScriptPathChosen(Some(path)) => {
            if let Some(summary) = app.summary.clone() {
                app.view.status_message = format!("Saving {}...", path.display());
                return Task::perform(
                    async move {
                        write_batch_script(&summary, &path).await?;
                        Ok(path)
                    },
                    Message::ScriptSaved,
                );
            }
        }
        Message::ScriptSaved(result) => {
            app.view.status_message = match result {
                Ok(path) => format!("Installer script saved: {}", path.display()),
                Err(e) => format!("Could not save installer script: {}", e),
            };
        }
        Message::ScriptPathChosen(None) => {
            app.view.status_message = "Installer script not saved".to_string();
        }
    }
    Task::none()
}

fn handle_ui(app: &mut InstallerApp, message: WizardMessage) -> Task<Message> {
    match message {
        WizardMessage::NextPressed => match app.can_advance() {
            Ok(()) => {
                app.view.step = match app.view.step {
                    WizardStep::Select => WizardStep::Settings,
                    WizardStep::Settings => {
                        // A new folder or selection invalidates the last check.
                        app.view.probe_rows.clear();
                        app.download_set.clear();
                        app.overwrite_confirmed = false;
                        WizardStep::Connectivity
                    }
                    WizardStep::Connectivity => WizardStep::Download,
                    other => other,
                };
                app.view.status_message = String::new();
            }
            Err(reason) => app.view.status_message = reason,
        },
        WizardMessage::BackPressed => {
            if let Some(previous) = app.view.step.previous() {
                app.view.step = previous;
            }
        }
        WizardMessage::BrowsePressed => {
            let start_dir = app.target_dir();
            return Task::perform(
                async move {
                    rfd::AsyncFileDialog::new()
                        .set_directory(&start_dir)
                        .pick_folder()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::FolderPicked,
            );
        }
        WizardMessage::ProbePressed => {
            let entries = app.selected_entries();
            let prober = Prober::new(app.api_client.clone());
            let timeout = app.settings.probe_timeout();
            let concurrency = app.settings.probe_concurrency;

            app.view.is_probing = true;
            app.view.status_message = format!("Checking {} servers...", entries.len());

            return Task::perform(
                async move { prober.probe(&entries, timeout, concurrency).await },
                Message::ProbeFinished,
            );
        }
        WizardMessage::StartDownloadPressed => return start_download(app),
        WizardMessage::CancelPressed => {
            if let Some(downloader) = &app.downloader {
                downloader.cancel();
                app.view.status_message = "Cancelling...".to_string();
            }
        }
        WizardMessage::SaveScriptPressed => {
            if app.summary.as_ref().is_some_and(|s| s.succeeded.is_empty()) {
                app.view.status_message = "Nothing was downloaded".to_string();
                return Task::none();
            }
            return Task::perform(
                async move {
                    rfd::AsyncFileDialog::new()
                        .set_file_name("install_bundle.bat")
                        .add_filter("Batch file", &["bat"])
                        .save_file()
                        .await
                        .map(|handle| handle.path().to_path_buf())
                },
                Message::ScriptPathChosen,
            );
        }
        WizardMessage::SearchChanged(query) => {
            let matches: HashSet<&str> = app
                .catalog
                .search(&query)
                .into_iter()
                .map(|entry| entry.name.as_str())
                .collect();
            for row in &mut app.view.entries {
                row.visible = matches.contains(row.name.as_str());
            }
        }
        WizardMessage::ToggleEntry(_)
        | WizardMessage::SelectCategory(_)
        | WizardMessage::DownloadDirChanged(_) => {}
    }
    Task::none()
}

fn start_download(app: &mut InstallerApp) -> Task<Message> {
    let target_dir = app.target_dir();
    let tasks = DownloadTask::plan(&app.download_set, &target_dir);

    let existing = DownloadTask::existing_destinations(&tasks);
    if !existing.is_empty() && !app.overwrite_confirmed {
        app.overwrite_confirmed = true;
        app.view.status_message = format!(
            "{} file(s) already exist in {} and will be replaced. Press Start again to continue.",
            existing.len(),
            target_dir.display()
        );
        return Task::none();
    }

    app.view.task_rows = tasks
        .iter()
        .map(|task| TaskRow {
            name: task.entry.name.clone(),
            status: TaskState::Pending.to_string(),
            fraction: 0.0,
        })
        .collect();
    app.view.overall_progress = 0.0;
    app.view.is_downloading = true;
    app.view.status_message = format!("Downloading to: {}", target_dir.display());

    let downloader = BatchDownloader::new(
        app.api_client.clone(),
        BatchOptions::from(&app.settings),
    );
    app.downloader = Some(downloader.clone());

    let (sender, receiver) = mpsc::unbounded();
    let run = Task::perform(
        async move {
            let mut observer = ChannelObserver { sender };
            downloader.run(tasks, &target_dir, &mut observer).await
        },
        Message::BatchFinished,
    );

    Task::batch([Task::stream(receiver), run])
}

fn summary_lines(summary: &BatchSummary) -> Vec<String> {
    let mut lines = vec![format!("Saved to {}", summary.target_dir.display())];
    if summary.was_cancelled {
        lines.push("The download was cancelled.".to_string());
    }
    for done in &summary.succeeded {
        lines.push(format!("OK    {} ({} bytes)", done.name, done.bytes));
    }
    for failure in &summary.failed {
        lines.push(format!("FAIL  {}: {}", failure.name, failure.reason));
    }
    lines
}

pub fn view(app: &InstallerApp) -> iced::Element<'_, Message> {
    app.view.view().map(Message::UiMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, CompletedDownload, TaskFailure, TransferError};

    fn app() -> InstallerApp {
        let catalog = Catalog::from_json(
            r#"{"media": [
                {"name": "VLC", "url": "https://example.com/vlc.exe"},
                {"name": "Audacity", "url": "https://example.com/audacity.exe"}
            ]}"#,
        )
        .unwrap();
        InstallerApp::new(catalog, Settings::default())
    }

    #[test]
    fn test_cannot_leave_selection_empty() {
        let mut app = app();
        let _ = update(&mut app, Message::UiMessage(WizardMessage::NextPressed));
        assert_eq!(app.view.step, WizardStep::Select);
        assert!(!app.view.status_message.is_empty());

        let _ = update(
            &mut app,
            Message::UiMessage(WizardMessage::ToggleEntry("VLC".to_string())),
        );
        let _ = update(&mut app, Message::UiMessage(WizardMessage::NextPressed));
        assert_eq!(app.view.step, WizardStep::Settings);
        assert_eq!(app.selected_entries().len(), 1);
    }

    #[test]
    fn test_probe_results_build_download_set() {
        let mut app = app();
        app.view.step = WizardStep::Connectivity;
        let entries: Vec<CatalogEntry> = app.catalog.entries().to_vec();

        let results = vec![
            ProbeResult {
                entry: entries[0].clone(),
                outcome: ProbeOutcome::Reachable { status: 200 },
            },
            ProbeResult {
                entry: entries[1].clone(),
                outcome: ProbeOutcome::Unreachable {
                    reason: "timed out".to_string(),
                },
            },
        ];
        let _ = update(&mut app, Message::ProbeFinished(Ok(results)));

        assert_eq!(app.download_set.len(), 1);
        assert_eq!(app.view.probe_rows.len(), 2);
        assert!(app.view.status_message.contains(&entries[1].name));
        assert!(app.can_advance().is_ok());
    }

    #[test]
    fn test_search_hides_rows_that_do_not_match() {
        let mut app = app();
        let _ = update(
            &mut app,
            Message::UiMessage(WizardMessage::SearchChanged("aud".to_string())),
        );
        let visible: Vec<&str> = app
            .view
            .entries
            .iter()
            .filter(|row| row.visible)
            .map(|row| row.name.as_str())
            .collect();
        assert_eq!(visible, vec!["Audacity"]);

        let _ = update(
            &mut app,
            Message::UiMessage(WizardMessage::SelectCategory(Category::Media)),
        );
        assert_eq!(app.view.selected_count(), 1);

        let _ = update(
            &mut app,
            Message::UiMessage(WizardMessage::SearchChanged(String::new())),
        );
        assert!(app.view.entries.iter().all(|row| row.visible));
    }

    #[test]
    fn test_failed_start_requires_new_overwrite_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app();
        app.view.step = WizardStep::Download;
        app.view.download_dir = dir.path().display().to_string();
        app.download_set = app.catalog.entries()[..1].to_vec();

        let tasks = DownloadTask::plan(&app.download_set, dir.path());
        std::fs::write(&tasks[0].destination, b"old").unwrap();

        let _ = start_download(&mut app);
        assert!(app.overwrite_confirmed);
        assert!(app.view.task_rows.is_empty());

        let _ = update(
            &mut app,
            Message::BatchFinished(Err(AppError::invalid_argument("boom"))),
        );
        assert!(!app.overwrite_confirmed);

        let _ = start_download(&mut app);
        assert!(app.view.status_message.contains("already exist"));
        assert!(app.view.task_rows.is_empty());
    }

    #[test]
    fn test_script_saved_reports_outcome() {
        let mut app = app();
        let _ = update(
            &mut app,
            Message::ScriptSaved(Ok(PathBuf::from("/tmp/install_bundle.bat"))),
        );
        assert!(app.view.status_message.contains("install_bundle.bat"));

        let _ = update(
            &mut app,
            Message::ScriptSaved(Err(AppError::Io("disk full".to_string()))),
        );
        assert!(app.view.status_message.contains("disk full"));
    }

    #[test]
    fn test_summary_lines_list_failures() {
        let summary = BatchSummary {
            target_dir: PathBuf::from("/tmp/bundle"),
            succeeded: vec![CompletedDownload {
                name: "VLC".to_string(),
                path: PathBuf::from("/tmp/bundle/vlc.exe"),
                bytes: 42,
            }],
            failed: vec![TaskFailure {
                name: "Audacity".to_string(),
                reason: TransferError::Status(503),
            }],
            was_cancelled: false,
        };

        let lines = summary_lines(&summary);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].contains("Audacity"));
        assert!(lines[2].contains("503"));
    }
}
