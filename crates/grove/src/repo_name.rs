//! Canonical repository names.
//!
//! A [`RepoName`] is the full name of a repository in the form
//! `host/path`, e.g. `github.com/rust-lang/cargo` or
//! `gitlab.com/group/subgroup/project`. It is the key under which a
//! repository lives in the workspace tree and the unit the ignore set
//! matches against.

use std::fmt;

use thiserror::Error;

/// Error parsing a raw repository reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepoNameError {
    /// The input could not be split into a host and a path.
    #[error("invalid repository name: {0}")]
    Invalid(String),
}

/// The canonical `host/path` name of a repository.
///
/// Invariants held after construction:
/// - `host` is non-empty and contains a dot
/// - `path` is non-empty, has no leading or trailing slash, and internal
///   slash runs are collapsed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoName {
    host: String,
    path: String,
}

impl RepoName {
    /// Parse a raw repository reference.
    ///
    /// Accepted forms:
    /// - `https://host/path.git` (clone URL; the `.git` suffix is stripped)
    /// - `https://host/path` (web URL)
    /// - `host/path` (bare reference; a trailing `.git` is part of the path)
    ///
    /// Parsing is idempotent: feeding the canonical `host/path` form back
    /// in yields the same name.
    pub fn parse(raw: &str) -> Result<Self, RepoNameError> {
        let trimmed = raw.trim();

        let (scheme, rest) = match trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
        {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        // Only URLs carry a stripping `.git`; a bare `host/path.git` is a
        // legitimate directory name and is kept verbatim.
        let rest = if scheme {
            rest.strip_suffix(".git").unwrap_or(rest)
        } else {
            rest
        };

        let (host, raw_path) = match rest.split_once('/') {
            Some(parts) => parts,
            None => return Err(RepoNameError::Invalid(raw.to_string())),
        };

        let path = raw_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        if host.is_empty()
            || !host.contains('.')
            || host.contains(char::is_whitespace)
            || path.is_empty()
            || path.contains(char::is_whitespace)
        {
            return Err(RepoNameError::Invalid(raw.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            path,
        })
    }

    /// The provider host, e.g. `github.com`.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The provider-side project path, e.g. `rust-lang/cargo`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The HTTPS clone URL for this name.
    pub fn clone_url(&self) -> String {
        format!("https://{}.git", self)
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn name(host: &str, path: &str) -> RepoName {
        RepoName {
            host: host.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn parses_common_forms() {
        let cases = [
            (
                "https://example.com/path/to/repo.git",
                name("example.com", "path/to/repo"),
            ),
            (
                "https://example.com/path/to/repo",
                name("example.com", "path/to/repo"),
            ),
            (
                "http://example.com/path/to/repo",
                name("example.com", "path/to/repo"),
            ),
            (
                "example.com/path/to/repo",
                name("example.com", "path/to/repo"),
            ),
            (
                "example.com/path/to/repo/",
                name("example.com", "path/to/repo"),
            ),
            // A bare reference keeps `.git`; only URLs strip it.
            (
                "example.com/path/to/repo.git",
                name("example.com", "path/to/repo.git"),
            ),
            (
                "example.com//path//to///repo",
                name("example.com", "path/to/repo"),
            ),
        ];

        for (input, expected) in cases {
            let parsed = RepoName::parse(input).unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(parsed, expected, "input {input:?}");
        }
    }

    #[test]
    fn rejects_invalid_inputs() {
        for input in ["not a url", "nodot/path", "example.com", "example.com/", ""] {
            assert!(
                RepoName::parse(input).is_err(),
                "expected {input:?} to be rejected"
            );
        }
    }

    #[test]
    fn clone_url_round_trips() {
        let parsed = RepoName::parse("github.com/rust-lang/cargo").expect("parse");
        assert_eq!(parsed.clone_url(), "https://github.com/rust-lang/cargo.git");
        assert_eq!(RepoName::parse(&parsed.clone_url()).expect("reparse"), parsed);
    }

    proptest! {
        /// Parsing is idempotent: re-parsing the canonical form of any
        /// accepted input yields the same name.
        #[test]
        fn parse_is_idempotent(
            host in "[a-z]{1,8}\\.[a-z]{2,4}",
            segments in prop::collection::vec("[a-zA-Z0-9_.-]{1,12}", 1..5),
            scheme in prop::option::of(prop::bool::ANY),
            trailing_slashes in 0usize..3,
        ) {
            let mut raw = String::new();
            if let Some(https) = scheme {
                raw.push_str(if https { "https://" } else { "http://" });
            }
            raw.push_str(&host);
            for segment in &segments {
                raw.push('/');
                raw.push_str(segment);
            }
            raw.push_str(&"/".repeat(trailing_slashes));

            if let Ok(first) = RepoName::parse(&raw) {
                let second = RepoName::parse(&first.to_string()).expect("canonical form parses");
                prop_assert_eq!(first, second);
            }
        }
    }
}
