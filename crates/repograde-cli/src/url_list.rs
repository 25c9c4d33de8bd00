//! Loading repository URLs from CSV exports.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UrlListError {
    #[error("CSV file path is required")]
    MissingPath,

    #[error("CSV file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid file type. Expected .csv, got {0}")]
    InvalidExtension(String),

    #[error("Error reading CSV file: {0}")]
    Csv(#[from] csv::Error),
}

/// Every `http`/`https` URL found in any column of `path`, first occurrence
/// first. The header row is not scanned.
pub fn load_urls_from_csv(path: &Path) -> Result<Vec<String>, UrlListError> {
    if path.as_os_str().is_empty() {
        return Err(UrlListError::MissingPath);
    }
    if !path.exists() {
        return Err(UrlListError::NotFound(path.to_path_buf()));
    }
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if !is_csv {
        let ext = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        return Err(UrlListError::InvalidExtension(ext));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut urls = Vec::new();
    for record in reader.records() {
        let record = record?;
        urls.extend(
            record
                .iter()
                .map(str::trim)
                .filter(|cell| is_web_url(cell))
                .map(str::to_string),
        );
    }
    Ok(dedup(urls))
}

/// True for `http://` or `https://` URLs with a non-empty host.
pub fn is_web_url(value: &str) -> bool {
    let Some((scheme, rest)) = value.split_once("://") else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return false;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    !host.is_empty() && !host.contains(char::is_whitespace)
}

/// Drop repeated entries, keeping the first occurrence.
pub fn dedup(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_loads_urls_from_any_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "students.csv",
            "name,repo,notes\n\
             Ada,https://github.com/ada/engine,\n\
             Grace,https://github.com/grace/cobol,see http://example.com/grace\n\
             Linus,https://github.com/ada/engine,\n\
             Bad,github.com/no/scheme,ftp://example.com/x\n",
        );

        let urls = load_urls_from_csv(&path).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://github.com/ada/engine",
                "https://github.com/grace/cobol",
            ]
        );
    }

    #[test]
    fn test_header_row_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "list.CSV",
            "https://github.com/header/only\nhttps://github.com/acme/one\n",
        );

        let urls = load_urls_from_csv(&path).unwrap();
        assert_eq!(urls, vec!["https://github.com/acme/one"]);
    }

    #[test]
    fn test_rejects_bad_paths() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            load_urls_from_csv(Path::new("")),
            Err(UrlListError::MissingPath)
        ));

        let missing = dir.path().join("missing.csv");
        let err = load_urls_from_csv(&missing).unwrap_err();
        assert!(err.to_string().starts_with("CSV file not found:"));

        let txt = write(dir.path(), "urls.txt", "https://github.com/acme/one\n");
        let err = load_urls_from_csv(&txt).unwrap_err();
        assert_eq!(err.to_string(), "Invalid file type. Expected .csv, got .txt");
    }

    #[test]
    fn test_is_web_url() {
        assert!(is_web_url("https://github.com/acme/one"));
        assert!(is_web_url("HTTP://example.com"));
        assert!(is_web_url("https://user@host:8080/path"));
        assert!(!is_web_url("https://"));
        assert!(!is_web_url("https:///path"));
        assert!(!is_web_url("ftp://example.com"));
        assert!(!is_web_url("github.com/acme/one"));
        assert!(!is_web_url(""));
    }

    #[test]
    fn test_dedup_preserves_order() {
        let urls = dedup(vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ]);
        assert_eq!(urls, vec!["b", "a", "c"]);
    }
}
