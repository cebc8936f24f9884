//! Destination file naming: Content-Disposition parsing, sanitization, and
//! collision-free path resolution.

use std::path::{Component, Path, PathBuf};

use url::Url;

/// Name used when neither the server nor the URL suggests one.
pub const DEFAULT_FILE_NAME: &str = "download.bin";

/// Picks a safe file name for a download.
///
/// Prefers the server's suggestion (from `Content-Disposition`), then the
/// last URL path segment, then [`DEFAULT_FILE_NAME`].
#[must_use]
pub fn choose_file_name(url: &str, suggested: Option<&str>) -> String {
    let candidate = suggested
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| Url::parse(url).ok().and_then(|u| file_name_from_url(&u)));

    match candidate {
        Some(name) => {
            let sanitized = sanitize_filename(&name);
            if sanitized.trim_matches('_').is_empty() {
                DEFAULT_FILE_NAME.to_string()
            } else {
                sanitized
            }
        }
        None => DEFAULT_FILE_NAME.to_string(),
    }
}

/// Parses a `Content-Disposition` header to extract the file name.
///
/// Handles:
/// - `attachment; filename="example.iso"`
/// - `attachment; filename=example.iso`
/// - `attachment; filename*=UTF-8''example%20file.iso` (RFC 5987)
#[must_use]
pub fn parse_content_disposition(header: &str) -> Option<String> {
    // filename*= wins over filename= when both are present
    if let Some(pos) = header.find("filename*=") {
        let value = header[pos + "filename*=".len()..].trim();
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    if let Some(pos) = header.find("filename=") {
        let value = header[pos + "filename=".len()..].trim();
        if let Some(stripped) = value.strip_prefix('"') {
            if let Some(end) = stripped.find('"') {
                return Some(stripped[..end].to_string());
            }
        } else {
            let end = value.find(';').unwrap_or(value.len());
            let filename = value[..end].trim();
            if !filename.is_empty() {
                return Some(filename.to_string());
            }
        }
    }

    None
}

/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

/// Resolves a path under `dir` that does not exist yet.
///
/// `file.iso` becomes `file_1.iso`, `file_2.iso`, ... on collision.
#[must_use]
pub fn resolve_unique_path(dir: &Path, filename: &str) -> PathBuf {
    let filename = {
        let sanitized = sanitize_filename(filename);
        if sanitized.trim_matches('_').is_empty() {
            DEFAULT_FILE_NAME.to_string()
        } else {
            sanitized
        }
    };
    let base_path = dir.join(&filename);
    if !base_path.exists() {
        return base_path;
    }

    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename.as_str(), ""),
    };

    for i in 1..1000 {
        let candidate = dir.join(format!("{stem}_{i}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    dir.join(format!("{stem}_{timestamp}{ext}"))
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}
