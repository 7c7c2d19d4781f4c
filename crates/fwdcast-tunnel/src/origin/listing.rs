//! Directory scanning and HTML listing rendering on the origin

use std::path::Path;

use crate::relay::pages::escape;

/// One entry of a shared directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// File or directory name
    pub name: String,
    /// Path relative to the share root, forward-slash separated
    pub relative_path: String,
    /// Whether this entry is a directory
    pub is_directory: bool,
    /// File size in bytes (0 for directories)
    pub size: u64,
}

/// Whether a file name matches any exclude pattern.
///
/// Patterns are an exact name or an extension wildcard like `*.log`.
pub(crate) fn is_excluded(name: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            !suffix.is_empty() && name.ends_with(suffix)
        } else {
            name == pattern
        }
    })
}

/// Read one directory level, directories first, each group name-sorted
pub(crate) async fn scan_dir(
    dir: &Path,
    relative_prefix: &str,
    exclude: &[String],
) -> std::io::Result<Vec<DirEntryInfo>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_excluded(&name, exclude) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let relative_path = if relative_prefix.is_empty() {
            name.clone()
        } else {
            format!("{relative_prefix}/{name}")
        };
        entries.push(DirEntryInfo {
            name,
            relative_path,
            is_directory: metadata.is_dir(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
        });
    }

    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(entries)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Render a directory listing as a full HTML document.
///
/// Links carry the session prefix so they resolve through the relay, and the
/// page offers a ZIP download of the listed subtree.
#[must_use]
pub fn render_directory(entries: &[DirEntryInfo], path: &str, session_id: &str) -> String {
    let sid = escape(session_id);
    let shown_path = if path.is_empty() { "/" } else { path };

    let mut rows = String::new();
    if !path.is_empty() {
        let parent = match path.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/"),
            None => String::new(),
        };
        rows.push_str(&format!(
            "      <tr><td><a href=\"/{sid}/{}\">..</a></td><td></td></tr>\n",
            escape(&parent)
        ));
    }
    for entry in entries {
        let href = escape(&entry.relative_path);
        let name = escape(&entry.name);
        if entry.is_directory {
            rows.push_str(&format!(
                "      <tr><td><a href=\"/{sid}/{href}/\">{name}/</a></td><td></td></tr>\n"
            ));
        } else {
            rows.push_str(&format!(
                "      <tr><td><a href=\"/{sid}/{href}\">{name}</a></td><td>{}</td></tr>\n",
                format_size(entry.size)
            ));
        }
    }

    let zip_href = if path.is_empty() {
        format!("/{sid}/__download__.zip")
    } else {
        format!("/{sid}/{}/__download__.zip", escape(path))
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n  <title>{shown} - fwdcast</title>\n  \
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n  <style> \
    body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; \
background: #1e1e1e; color: #cccccc; margin: 0; padding: 24px; }} \
    h1 {{ font-size: 18px; font-weight: 500; }} \
    a {{ color: #4fc1ff; text-decoration: none; }} \
    a:hover {{ text-decoration: underline; }} \
    table {{ border-collapse: collapse; width: 100%; max-width: 720px; }} \
    td {{ padding: 6px 12px 6px 0; border-bottom: 1px solid #2d2d2d; }} \
    td:last-child {{ color: #858585; text-align: right; }} \
    .download {{ display: inline-block; margin-bottom: 16px; font-size: 14px; }} \
  </style>\n</head>\n<body>\n  <h1>Index of {shown}</h1>\n  \
<a class=\"download\" href=\"{zip_href}\">Download all as ZIP</a>\n  <table>\n{rows}  </table>\n\
</body>\n</html>",
        shown = escape(shown_path),
    )
}

/// Minimal HTML body for origin-produced error responses
pub(crate) fn error_page(status: u16, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{status} - fwdcast</title></head>\n\
<body style=\"font-family: sans-serif; text-align: center; padding: 40px;\">\n\
<h1>{status}</h1>\n<p>{}</p>\n</body>\n</html>",
        escape(message)
    )
}
