//! Credentials from the user's `~/.netrc`.
//!
//! Providers look up a token by machine name (`api.github.com` for
//! GitHub, the host itself for GitLab). A missing file, an unparseable
//! file, or a machine entry without a password all mean "no credentials"
//! and are never an error.

use std::path::Path;

/// Look up the netrc password for `machine` in `~/.netrc`.
pub fn netrc_password(machine: &str) -> Option<String> {
    let dirs = directories::UserDirs::new()?;
    netrc_password_from(&dirs.home_dir().join(".netrc"), machine)
}

/// Look up the netrc password for `machine` in an explicit file.
pub fn netrc_password_from(path: &Path, machine: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_password(&contents, machine)
}

/// Scan netrc tokens for the password of `machine`.
///
/// Handles the token stream form of netrc: `machine <name>` opens an
/// entry, `default` opens a catch-all entry, and `password <value>`
/// inside a matching entry yields the credential. `macdef` bodies are
/// not supported and simply never match.
fn parse_password(contents: &str, machine: &str) -> Option<String> {
    let mut tokens = contents.split_whitespace();
    let mut in_match = false;
    let mut fallback: Option<String> = None;

    while let Some(token) = tokens.next() {
        match token {
            "machine" => {
                let name = tokens.next()?;
                in_match = name == machine;
            }
            "default" => {
                in_match = false;
                // The default entry applies only when no machine matched.
                if let Some(value) = scan_default_password(&mut tokens) {
                    fallback.get_or_insert(value);
                }
            }
            "password" => {
                let value = tokens.next()?;
                if in_match {
                    return Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    fallback
}

fn scan_default_password<'a>(tokens: &mut impl Iterator<Item = &'a str>) -> Option<String> {
    while let Some(token) = tokens.next() {
        match token {
            "machine" | "default" => return None,
            "password" => return tokens.next().map(str::to_string),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn finds_password_for_machine() {
        let contents = "\
machine api.github.com
  login me
  password ghp_token

machine gitlab.example.com login other password glpat-token
";
        assert_eq!(
            parse_password(contents, "api.github.com").as_deref(),
            Some("ghp_token")
        );
        assert_eq!(
            parse_password(contents, "gitlab.example.com").as_deref(),
            Some("glpat-token")
        );
        assert_eq!(parse_password(contents, "unknown.example.com"), None);
    }

    #[test]
    fn default_entry_is_a_fallback_only() {
        let contents = "\
machine api.github.com password specific
default login anon password catchall
";
        assert_eq!(
            parse_password(contents, "api.github.com").as_deref(),
            Some("specific")
        );
        assert_eq!(
            parse_password(contents, "other.example.com").as_deref(),
            Some("catchall")
        );
    }

    #[test]
    fn entry_without_password_yields_nothing() {
        let contents = "machine api.github.com login me";
        assert_eq!(parse_password(contents, "api.github.com"), None);
    }

    #[test]
    fn missing_file_is_no_credentials() {
        let tmp = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            netrc_password_from(&tmp.path().join("absent"), "api.github.com"),
            None
        );
    }

    #[test]
    fn reads_from_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("netrc");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(file, "machine api.github.com password from-file").expect("write");

        assert_eq!(
            netrc_password_from(&path, "api.github.com").as_deref(),
            Some("from-file")
        );
    }
}
