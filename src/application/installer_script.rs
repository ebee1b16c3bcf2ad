use std::{fmt::Write as _, path::Path};

use crate::domain::{AppError, BatchSummary};

/// Renders a Windows batch file that runs every successfully downloaded
/// installer in turn.
pub fn render_batch_script(summary: &BatchSummary) -> Result<String, AppError> {
    if summary.succeeded.is_empty() {
        return Err(AppError::invalid_argument(
            "no downloaded installers to include",
        ));
    }

    let total = summary.succeeded.len();
    let mut script = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(script, "@echo off");
    let _ = writeln!(script, "chcp 65001 >nul");
    let _ = writeln!(script, "echo ========================================");
    let _ = writeln!(script, "echo Software bundle installer");
    let _ = writeln!(script, "echo ========================================");
    let _ = writeln!(script, "echo.");

    for (index, download) in summary.succeeded.iter().enumerate() {
        let name = escape_echo(&download.name);
        let path = download.path.display().to_string().replace('"', "");
        let _ = writeln!(script, "echo [{}/{}] Installing {}...", index + 1, total, name);
        let _ = writeln!(script, "if exist \"{}\" (", path);
        let _ = writeln!(script, "    start \"\" /wait \"{}\"", path);
        let _ = writeln!(script, "    echo Finished: {}", name);
        let _ = writeln!(script, ") else (");
        let _ = writeln!(script, "    echo Skipped: {} ^(installer missing^)", name);
        let _ = writeln!(script, ")");
        let _ = writeln!(script, "echo.");
    }

    let _ = writeln!(script, "echo All installers have run.");
    let _ = writeln!(script, "pause");

    Ok(script.replace('\n', "\r\n"))
}

pub async fn write_batch_script(summary: &BatchSummary, path: &Path) -> Result<(), AppError> {
    let script = render_batch_script(summary)?;
    tokio::fs::write(path, script)
        .await
        .map_err(|e| AppError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
    tracing::info!(path = %path.display(), installers = summary.succeeded.len(), "Installer script written");
    Ok(())
}

/// Escapes characters `echo` would otherwise interpret.
fn escape_echo(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' | '|' | '<' | '>' | '^' | '(' | ')' => {
                escaped.push('^');
                escaped.push(c);
            }
            '%' => escaped.push_str("%%"),
            _ => escaped.push(c),
        }
    }
    escaped
}
