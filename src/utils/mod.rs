use crate::domain::CatalogEntry;

const INSTALLER_EXTENSIONS: [&str; 9] = [
    ".exe", ".msi", ".zip", ".rar", ".7z", ".dmg", ".pkg", ".deb", ".rpm",
];

/// Sanitize filename to remove invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .trim_matches('.')
        .to_string()
}

/// Local filename for an entry's installer.
///
/// Prefers the catalog's explicit filename, then the last URL path segment
/// when it carries an extension, then the entry name plus an installer
/// extension spotted in the URL path (defaulting to `.exe`).
pub fn derive_filename(entry: &CatalogEntry) -> String {
    if let Some(explicit) = entry.filename.as_deref().map(sanitize_filename) {
        if !explicit.is_empty() {
            return explicit;
        }
    }

    let last_segment = entry
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .map(|segment| sanitize_filename(&segment))
        .unwrap_or_default();

    if last_segment.contains('.') {
        return last_segment;
    }

    let path = entry.url.path().to_lowercase();
    let extension = INSTALLER_EXTENSIONS
        .iter()
        .find(|ext| path.contains(*ext))
        .copied()
        .unwrap_or(".exe");

    let stem = sanitize_filename(&entry.name);
    let stem = if stem.is_empty() { "download" } else { &stem };
    format!("{stem}{extension}")
}
