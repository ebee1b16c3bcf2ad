use iced::{
    widget::{button, column, progress_bar, row, scrollable, text, text_input, Column, Space},
    Element, Length,
};

use crate::domain::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Select,
    Settings,
    Connectivity,
    Download,
    Done,
}

impl WizardStep {
    pub fn title(self) -> &'static str {
        match self {
            WizardStep::Select => "1. Choose software",
            WizardStep::Settings => "2. Download location",
            WizardStep::Connectivity => "3. Connectivity check",
            WizardStep::Download => "4. Downloading",
            WizardStep::Done => "5. Finished",
        }
    }

    pub fn previous(self) -> Option<WizardStep> {
        match self {
            WizardStep::Select => None,
            WizardStep::Settings => Some(WizardStep::Select),
            WizardStep::Connectivity => Some(WizardStep::Settings),
            WizardStep::Download | WizardStep::Done => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntryRow {
    pub name: String,
    pub category: Category,
    pub description: String,
    pub version: Option<String>,
    pub selected: bool,
    /// Cleared when the row does not match the current search.
    pub visible: bool,
}

#[derive(Debug, Clone)]
pub struct ProbeRow {
    pub name: String,
    pub detail: String,
    pub reachable: bool,
}

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub name: String,
    pub status: String,
    pub fraction: f32,
}

/// Main view state
pub struct WizardView {
    pub step: WizardStep,
    pub entries: Vec<EntryRow>,
    pub search_query: String,
    pub download_dir: String,
    pub probe_rows: Vec<ProbeRow>,
    pub is_probing: bool,
    pub task_rows: Vec<TaskRow>,
    pub overall_progress: f32,
    pub is_downloading: bool,
    pub summary_lines: Vec<String>,
    pub status_message: String,
}

impl Default for WizardView {
    fn default() -> Self {
        Self {
            step: WizardStep::Select,
            entries: Vec::new(),
            search_query: String::new(),
            download_dir: String::new(),
            probe_rows: Vec::new(),
            is_probing: false,
            task_rows: Vec::new(),
            overall_progress: 0.0,
            is_downloading: false,
            summary_lines: Vec::new(),
            status_message: "Choose the software you want to install".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WizardMessage {
    ToggleEntry(String),
    SearchChanged(String),
    /// Selects every visible entry of a category, or clears them if all are selected.
    SelectCategory(Category),
    DownloadDirChanged(String),
    BrowsePressed,
    NextPressed,
    BackPressed,
    ProbePressed,
    StartDownloadPressed,
    CancelPressed,
    SaveScriptPressed,
}

impl WizardView {
    pub fn update(&mut self, message: WizardMessage) {
        match message {
            WizardMessage::ToggleEntry(name) => {
                if let Some(row) = self.entries.iter_mut().find(|row| row.name == name) {
                    row.selected = !row.selected;
                }
            }
            WizardMessage::SearchChanged(query) => {
                self.search_query = query;
            }
            WizardMessage::SelectCategory(category) => {
                let all_selected = self.category_fully_selected(category);
                for row in self
                    .entries
                    .iter_mut()
                    .filter(|row| row.category == category && row.visible)
                {
                    row.selected = !all_selected;
                }
            }
            WizardMessage::DownloadDirChanged(dir) => {
                self.download_dir = dir;
            }
            _ => {
                // Will be handled by the app
            }
        }
    }

    pub fn selected_count(&self) -> usize {
        self.entries.iter().filter(|row| row.selected).count()
    }

    fn category_fully_selected(&self, category: Category) -> bool {
        let mut rows = self
            .entries
            .iter()
            .filter(|row| row.category == category && row.visible)
            .peekable();
        rows.peek().is_some() && rows.all(|row| row.selected)
    }

    pub fn view(&self) -> Element<'_, WizardMessage> {
        let body = match self.step {
            WizardStep::Select => self.select_page(),
            WizardStep::Settings => self.settings_page(),
            WizardStep::Connectivity => self.connectivity_page(),
            WizardStep::Download => self.download_page(),
            WizardStep::Done => self.done_page(),
        };

        column![
            text("Software Bundle Installer").size(32),
            text(self.step.title()).size(20),
            Space::new().height(Length::Fixed(10.0)),
            scrollable(body).height(Length::Fill),
            text(&self.status_message).size(14),
            self.navigation(),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }

    fn navigation(&self) -> Element<'_, WizardMessage> {
        let back = button("Back")
            .on_press_maybe(self.step.previous().map(|_| WizardMessage::BackPressed))
            .padding([10, 20]);

        let next = match self.step {
            WizardStep::Select | WizardStep::Settings | WizardStep::Connectivity => button("Next")
                .on_press_maybe((!self.is_probing).then_some(WizardMessage::NextPressed))
                .padding([10, 20]),
            WizardStep::Download => button("Cancel")
                .on_press_maybe(self.is_downloading.then_some(WizardMessage::CancelPressed))
                .padding([10, 20]),
            WizardStep::Done => button("Save installer script")
                .on_press(WizardMessage::SaveScriptPressed)
                .padding([10, 20]),
        };

        row![back, Space::new().width(Length::Fill), next]
            .spacing(10)
            .into()
    }

    fn select_page(&self) -> Element<'_, WizardMessage> {
        let mut list = Column::new().spacing(6);
        let mut current: Option<Category> = None;

        for entry in self.entries.iter().filter(|row| row.visible) {
            if current != Some(entry.category) {
                current = Some(entry.category);
                let label = if self.category_fully_selected(entry.category) {
                    "Clear"
                } else {
                    "Select all"
                };
                list = list.push(
                    row![
                        text(entry.category.label()).size(18),
                        button(label)
                            .on_press(WizardMessage::SelectCategory(entry.category))
                            .padding([2, 8]),
                    ]
                    .spacing(10),
                );
            }

            let marker = if entry.selected { "[x]" } else { "[ ]" };
            let title = match &entry.version {
                Some(version) => format!("{} {} {}", marker, entry.name, version),
                None => format!("{} {}", marker, entry.name),
            };
            list = list.push(
                row![
                    button(text(title))
                        .on_press(WizardMessage::ToggleEntry(entry.name.clone()))
                        .padding([4, 10]),
                    text(&entry.description).size(13),
                ]
                .spacing(10),
            );
        }

        column![
            text_input("Search by name or description...", &self.search_query)
                .on_input(WizardMessage::SearchChanged)
                .padding(10),
            text(format!("{} selected", self.selected_count())).size(14),
            list
        ]
        .spacing(10)
        .into()
    }

    fn settings_page(&self) -> Element<'_, WizardMessage> {
        column![
            text("Download folder:").size(16),
            row![
                text_input("Choose a folder...", &self.download_dir)
                    .on_input(WizardMessage::DownloadDirChanged)
                    .padding(10),
                button("Browse...")
                    .on_press(WizardMessage::BrowsePressed)
                    .padding([10, 20]),
            ]
            .spacing(10),
        ]
        .spacing(10)
        .into()
    }

    fn connectivity_page(&self) -> Element<'_, WizardMessage> {
        let label = if self.probe_rows.is_empty() {
            "Check servers"
        } else {
            "Check again"
        };

        let rows = self.probe_rows.iter().map(|probe| {
            let mark = if probe.reachable { "OK  " } else { "FAIL" };
            text(format!("{} {} ({})", mark, probe.name, probe.detail))
                .size(14)
                .into()
        });

        column![
            button(label)
                .on_press_maybe((!self.is_probing).then_some(WizardMessage::ProbePressed))
                .padding([10, 20]),
            Column::with_children(rows).spacing(4),
        ]
        .spacing(10)
        .into()
    }

    fn download_page(&self) -> Element<'_, WizardMessage> {
        let start = button("Start download")
            .on_press_maybe(
                (!self.is_downloading && self.task_rows.is_empty())
                    .then_some(WizardMessage::StartDownloadPressed),
            )
            .padding([10, 20]);

        let rows = self.task_rows.iter().map(|task| {
            column![
                row![
                    text(&task.name).size(14),
                    Space::new().width(Length::Fill),
                    text(&task.status).size(13),
                ],
                progress_bar(0.0..=1.0, task.fraction),
            ]
            .spacing(4)
            .into()
        });

        column![
            start,
            text(format!("Overall: {:.0}%", self.overall_progress * 100.0)).size(16),
            progress_bar(0.0..=1.0, self.overall_progress),
            Column::with_children(rows).spacing(8),
        ]
        .spacing(10)
        .into()
    }

    fn done_page(&self) -> Element<'_, WizardMessage> {
        Column::with_children(
            self.summary_lines
                .iter()
                .map(|line| text(line).size(14).into()),
        )
        .spacing(4)
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> EntryRow {
        EntryRow {
            name: name.to_string(),
            category: Category::Media,
            description: String::new(),
            version: None,
            selected: false,
            visible: true,
        }
    }

    #[test]
    fn test_toggle_entry_flips_selection() {
        let mut view = WizardView {
            entries: vec![row("VLC"), row("Audacity")],
            ..WizardView::default()
        };

        view.update(WizardMessage::ToggleEntry("VLC".to_string()));
        assert_eq!(view.selected_count(), 1);
        view.update(WizardMessage::ToggleEntry("VLC".to_string()));
        assert_eq!(view.selected_count(), 0);
    }

    #[test]
    fn test_select_category_toggles_visible_rows() {
        let mut hidden = row("Hidden");
        hidden.visible = false;
        let mut other = row("Git");
        other.category = Category::Development;

        let mut view = WizardView {
            entries: vec![row("VLC"), row("Audacity"), hidden, other],
            ..WizardView::default()
        };

        view.update(WizardMessage::SelectCategory(Category::Media));
        assert_eq!(view.selected_count(), 2);
        assert!(!view.entries[2].selected);
        assert!(!view.entries[3].selected);

        view.update(WizardMessage::SelectCategory(Category::Media));
        assert_eq!(view.selected_count(), 0);
    }

    #[test]
    fn test_back_is_disabled_once_downloading() {
        assert_eq!(WizardStep::Settings.previous(), Some(WizardStep::Select));
        assert_eq!(WizardStep::Download.previous(), None);
        assert_eq!(WizardStep::Select.previous(), None);
    }
}
