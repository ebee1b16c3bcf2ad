//! Catalog of downloadable packages.
//!
//! The catalog is a JSON object mapping a category key to a list of entries.
//! It is validated once at load time so the rest of the program only ever
//! sees well-formed [`CatalogEntry`] values.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use serde::Deserialize;
use url::Url;

use super::{AppError, CatalogEntry, Category};

const BUNDLED_CATALOG: &str = include_str!("../../assets/catalog.json");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEntry {
    name: String,
    url: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// The catalog shipped with the application.
    pub fn bundled() -> Result<Self, AppError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::Catalog(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, AppError> {
        let raw: BTreeMap<String, Vec<RawEntry>> = serde_json::from_str(json)
            .map_err(|e| AppError::Catalog(format!("Malformed catalog: {}", e)))?;

        let mut entries = Vec::new();
        let mut names = HashSet::new();

        for (key, items) in raw {
            let category = parse_category(&key)?;
            for item in items {
                let entry = validate_entry(category, item)?;
                if !names.insert(entry.name.to_lowercase()) {
                    return Err(AppError::Catalog(format!(
                        "Duplicate entry '{}'",
                        entry.name
                    )));
                }
                entries.push(entry);
            }
        }

        tracing::debug!(entries = entries.len(), "Catalog loaded");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Entries whose name or description contains `query`, ignoring case.
    /// A blank query matches everything.
    pub fn search(&self, query: &str) -> Vec<&CatalogEntry> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.entries.iter().collect();
        }

        self.entries
            .iter()
            .filter(|entry| {
                entry.name.to_lowercase().contains(&needle)
                    || entry
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Entries grouped by category, in the fixed category order.
    pub fn by_category(&self) -> Vec<(Category, Vec<&CatalogEntry>)> {
        Category::ALL
            .iter()
            .map(|category| {
                let items: Vec<&CatalogEntry> = self
                    .entries
                    .iter()
                    .filter(|entry| entry.category == *category)
                    .collect();
                (*category, items)
            })
            .filter(|(_, items)| !items.is_empty())
            .collect()
    }
}

fn parse_category(key: &str) -> Result<Category, AppError> {
    let normalized = key.trim().to_lowercase().replace([' ', '-'], "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| AppError::Catalog(format!("Unknown category '{}'", key)))
}

fn validate_entry(category: Category, raw: RawEntry) -> Result<CatalogEntry, AppError> {
    let name = raw.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Catalog(format!(
            "Entry with url '{}' has an empty name",
            raw.url
        )));
    }

    let url = Url::parse(raw.url.trim())
        .map_err(|e| AppError::Catalog(format!("Entry '{}' has an invalid url: {}", name, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Catalog(format!(
            "Entry '{}' uses unsupported scheme '{}'",
            name,
            url.scheme()
        )));
    }

    Ok(CatalogEntry {
        name,
        category,
        url,
        filename: raw.filename.filter(|f| !f.trim().is_empty()),
        description: raw.description,
        version: raw.version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_is_valid() {
        let catalog = Catalog::bundled().unwrap();
        assert!(!catalog.is_empty());
        assert!(catalog.find("7-Zip").is_some());
    }

    #[test]
    fn test_from_json_groups_by_category() {
        let json = r#"{
            "browsers": [{"name": "Firefox", "url": "https://download.mozilla.org/firefox.exe"}],
            "Development Tools": [
                {"name": "Git", "url": "https://example.com/git.exe", "version": "2.45"},
                {"name": "VS Code", "url": "https://example.com/code?os=win", "filename": "vscode.exe"}
            ]
        }"#;
        let catalog = Catalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 3);

        let groups = catalog.by_category();
        assert_eq!(groups[0].0, Category::Browsers);
        assert_eq!(groups[1].0, Category::Development);
        assert_eq!(groups[1].1.len(), 2);

        let code = catalog.find("vs code").unwrap();
        assert_eq!(code.filename.as_deref(), Some("vscode.exe"));
    }

    #[test]
    fn test_search_matches_name_and_description() {
        let json = r#"{
            "media": [
                {"name": "VLC", "url": "https://example.com/vlc.exe", "description": "Media player"},
                {"name": "Audacity", "url": "https://example.com/audacity.exe", "description": "Audio editor"}
            ],
            "development": [
                {"name": "Notepad++", "url": "https://example.com/npp.exe", "description": "Text EDITOR"}
            ]
        }"#;
        let catalog = Catalog::from_json(json).unwrap();

        let names = |query: &str| -> Vec<String> {
            let mut names: Vec<String> = catalog
                .search(query)
                .into_iter()
                .map(|entry| entry.name.clone())
                .collect();
            names.sort();
            names
        };

        assert_eq!(names("vlc"), vec!["VLC"]);
        assert_eq!(names("editor"), vec!["Audacity", "Notepad++"]);
        assert_eq!(names("  PLAYER "), vec!["VLC"]);
        assert!(names("compiler").is_empty());
        assert_eq!(names("").len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"security": [{"name": "KeePassXC", "url": "https://example.com/keepassxc.msi"}]}"#,
        )
        .unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.entries()[0].category, Category::Security);

        let missing = Catalog::load(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(AppError::Catalog(_))));
    }

    #[test]
    fn test_rejects_unknown_category() {
        let json = r#"{"games": [{"name": "Steam", "url": "https://example.com/steam.exe"}]}"#;
        let err = Catalog::from_json(json).unwrap_err();
        assert!(matches!(err, AppError::Catalog(msg) if msg.contains("games")));
    }

    #[test]
    fn test_rejects_malformed_url() {
        let json = r#"{"office": [{"name": "Broken", "url": "not a url"}]}"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(AppError::Catalog(msg)) if msg.contains("Broken")
        ));
    }

    #[test]
    fn test_rejects_non_http_scheme() {
        let json = r#"{"office": [{"name": "Share", "url": "ftp://example.com/a.exe"}]}"#;
        assert!(Catalog::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let json = r#"{
            "media": [{"name": "VLC", "url": "https://example.com/vlc.exe"}],
            "utilities": [{"name": "vlc", "url": "https://example.com/vlc2.exe"}]
        }"#;
        assert!(matches!(
            Catalog::from_json(json),
            Err(AppError::Catalog(msg)) if msg.contains("Duplicate")
        ));
    }
}
