//! Repository identity and clone results.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GradeError;
use crate::ids::RepoKey;

fn github_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:https?://|ssh://git@|git@)?(?:www\.)?github\.com[/:]([^/\s]+)/([^/\s?#]+)")
            .expect("static GitHub URL pattern is valid")
    })
}

/// Identity of a GitHub repository, extracted from its URL.
///
/// `owner` and `repo` are never empty for a value produced by [`RepoRef::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    /// The URL exactly as it was submitted.
    pub url: String,
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    /// Parse a GitHub repository URL.
    ///
    /// Accepts `https://github.com/owner/repo`, trailing `.git`, trailing path
    /// segments (`/tree/main`), and the `git@github.com:owner/repo.git` form.
    pub fn parse(url: &str) -> Result<Self, GradeError> {
        let trimmed = url.trim();
        let caps = github_pattern()
            .captures(trimmed)
            .ok_or_else(|| GradeError::InvalidUrl(url.to_string()))?;

        let owner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let repo = caps
            .get(2)
            .map(|m| m.as_str().trim_end_matches(".git"))
            .unwrap_or_default();

        if owner.is_empty() || repo.is_empty() {
            return Err(GradeError::InvalidUrl(url.to_string()));
        }

        Ok(Self {
            url: url.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    /// The `"owner/repo"` key for this repository.
    pub fn key(&self) -> RepoKey {
        RepoKey::new(&self.owner, &self.repo)
    }

    /// URL handed to `git clone`.
    ///
    /// SSH forms are kept as submitted; everything else is normalized to the
    /// HTTPS clone URL so browser links such as `/tree/main` still clone.
    pub fn clone_url(&self) -> String {
        let url = self.url.trim();
        if url.starts_with("git@") || url.starts_with("ssh://") {
            url.to_string()
        } else {
            format!("https://github.com/{}/{}.git", self.owner, self.repo)
        }
    }

    /// Directory name used for this repository inside a batch directory.
    pub fn dir_name(&self) -> String {
        format!("{}-{}", self.owner, self.repo)
    }
}

/// A repository that has been cloned into a local working directory.
///
/// The directory belongs to the batch until the repository's grading task
/// reaches a terminal state, at which point it is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClonedRepo {
    #[serde(flatten)]
    pub repo: RepoRef,
    pub local_path: PathBuf,
}

impl ClonedRepo {
    pub fn new(repo: RepoRef, local_path: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            local_path: local_path.into(),
        }
    }

    pub fn key(&self) -> RepoKey {
        self.repo.key()
    }

    pub fn path(&self) -> &Path {
        &self.local_path
    }
}

/// A submitted URL that never produced a [`ClonedRepo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFailure {
    pub url: String,
    /// Parsed identity, absent when the URL itself was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    pub error: String,
}

impl CloneFailure {
    /// Failure for a URL that parsed but could not be cloned.
    pub fn for_repo(repo: &RepoRef, error: impl Into<String>) -> Self {
        Self {
            url: repo.url.clone(),
            owner: Some(repo.owner.clone()),
            repo: Some(repo.repo.clone()),
            error: error.into(),
        }
    }

    /// Failure for a URL that was rejected before cloning.
    pub fn for_url(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            owner: None,
            repo: None,
            error: error.into(),
        }
    }

    /// Repo key, when the URL parsed.
    pub fn key(&self) -> Option<RepoKey> {
        match (&self.owner, &self.repo) {
            (Some(owner), Some(repo)) => Some(RepoKey::new(owner, repo)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_url() {
        let repo = RepoRef::parse("https://github.com/octocat/hello-world").unwrap();
        assert_eq!(repo.owner, "octocat");
        assert_eq!(repo.repo, "hello-world");
        assert_eq!(repo.key().as_str(), "octocat/hello-world");
    }

    #[test]
    fn test_parse_strips_git_suffix() {
        let repo = RepoRef::parse("https://github.com/octocat/hello-world.git").unwrap();
        assert_eq!(repo.repo, "hello-world");
        assert_eq!(repo.clone_url(), "https://github.com/octocat/hello-world.git");
    }

    #[test]
    fn test_parse_browser_link_with_path() {
        let repo = RepoRef::parse("https://github.com/rust-lang/rust/tree/master/src").unwrap();
        assert_eq!(repo.owner, "rust-lang");
        assert_eq!(repo.repo, "rust");
        assert_eq!(repo.clone_url(), "https://github.com/rust-lang/rust.git");
    }

    #[test]
    fn test_parse_ssh_url() {
        let repo = RepoRef::parse("git@github.com:octocat/hello-world.git").unwrap();
        assert_eq!(repo.owner, "octocat");
        assert_eq!(repo.repo, "hello-world");
        assert_eq!(repo.clone_url(), "git@github.com:octocat/hello-world.git");
    }

    #[test]
    fn test_parse_rejects_non_github() {
        let err = RepoRef::parse("not-a-url").unwrap_err();
        assert_eq!(err.to_string(), "Invalid GitHub URL: not-a-url");

        assert!(RepoRef::parse("https://gitlab.com/octocat/hello-world").is_err());
        assert!(RepoRef::parse("https://github.com/octocat").is_err());
        assert!(RepoRef::parse("https://github.com/octocat/.git").is_err());
    }

    #[test]
    fn test_dir_name() {
        let repo = RepoRef::parse("https://github.com/octocat/hello-world").unwrap();
        assert_eq!(repo.dir_name(), "octocat-hello-world");
    }

    #[test]
    fn test_clone_failure_json_shape() {
        let failure = CloneFailure::for_url("not-a-url", "Invalid GitHub URL: not-a-url");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"url": "not-a-url", "error": "Invalid GitHub URL: not-a-url"})
        );
        assert!(failure.key().is_none());
    }
}
