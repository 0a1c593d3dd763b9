//! Version coercion and range matching for hook matchers
//!
//! Declared versions of loaded packages are often loose ("5.2", "v17.8.0-nightly",
//! "2.0.1+build"). They are coerced to a plain `major.minor.patch` before being
//! checked, and ranges accept the usual npm-style spellings:
//!
//! ```text
//! ">=5.2.0"          one comparator
//! ">=5 <7"           comparators separated by spaces (all must hold)
//! "^2.0.1 || 4.x"    alternatives
//! "5.2.0"            bare version means exactly that version
//! ">= 5.2.0"         operator detached from its version
//! "1.2.3 - 2.3.4"    hyphen range, both ends inclusive
//! ```

use semver::{Version, VersionReq};

/// Extract the first `major[.minor[.patch]]` run of digits from `raw`.
///
/// Missing components are zero; prerelease and build suffixes are dropped.
pub fn coerce(raw: &str) -> Option<Version> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let mut parts = [0u64; 3];
    let mut count = 0;

    for component in raw[start..].split('.') {
        let digits: String = component.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            break;
        }
        parts[count] = digits.parse().ok()?;
        count += 1;
        // A component with trailing junk ("0-nightly") ends the version
        if count == 3 || digits.len() != component.len() {
            break;
        }
    }

    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Translate an npm-style range into one `VersionReq` per `||` alternative
fn parse_range(range: &str) -> Vec<VersionReq> {
    range
        .split("||")
        .filter_map(|alternative| {
            let comparators = comparators(alternative);
            if comparators.is_empty() {
                return None;
            }

            match VersionReq::parse(&comparators.join(", ")) {
                Ok(req) => Some(req),
                Err(e) => {
                    tracing::warn!(range = %range, error = %e, "Ignoring unparsable version range");
                    None
                }
            }
        })
        .collect()
}

/// Split one alternative into `semver` comparators.
///
/// A detached operator (`">= 5.2.0"`) is glued to the version after it and
/// a hyphen range (`"1.2.3 - 2.3.4"`) becomes `>=1.2.3, <=2.3.4`.
fn comparators(alternative: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in alternative.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{}{}", op, token)),
            None => tokens.push(token.to_string()),
        }
    }

    let mut comparators = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if i + 2 < tokens.len() && tokens[i + 1] == "-" {
            comparators.push(format!(">={}", tokens[i]));
            comparators.push(format!("<={}", tokens[i + 2]));
            i += 3;
            continue;
        }
        comparators.push(exact_if_bare(&tokens[i]));
        i += 1;
    }
    comparators
}

fn exact_if_bare(token: &str) -> String {
    let bare = token.starts_with(|c: char| c.is_ascii_digit());
    let wildcard = token.contains(['x', 'X', '*']);
    if bare && !wildcard {
        format!("={}", token)
    } else {
        token.to_string()
    }
}

/// Decide whether a loaded package version is eligible for patching.
///
/// - No constraint (`None` or an empty list): eligible.
/// - Version unknown or not coercible: eligible.
/// - Otherwise: eligible if any range is satisfied.
pub fn matches_any(version: Option<&str>, ranges: Option<&[String]>) -> bool {
    let ranges = match ranges {
        Some(r) if !r.is_empty() => r,
        _ => return true,
    };

    let version = match version.and_then(coerce) {
        Some(v) => v,
        None => return true,
    };

    ranges
        .iter()
        .flat_map(|range| parse_range(range))
        .any(|req| req.matches(&version))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_coerce() {
        assert_eq!(coerce("5.2"), Some(Version::new(5, 2, 0)));
        assert_eq!(coerce("v17.8.0-nightly"), Some(Version::new(17, 8, 0)));
        assert_eq!(coerce("2.0.1+build.7"), Some(Version::new(2, 0, 1)));
        assert_eq!(coerce("10"), Some(Version::new(10, 0, 0)));
        assert_eq!(coerce("1.2.3.4"), Some(Version::new(1, 2, 3)));
        assert_eq!(coerce("latest"), None);
    }

    #[test]
    fn test_no_constraint_matches() {
        assert!(matches_any(Some("1.0.0"), None));
        assert!(matches_any(Some("1.0.0"), Some(&[])));
    }

    #[test]
    fn test_unknown_version_matches() {
        let r = ranges(&[">=5.2.0"]);
        assert!(matches_any(None, Some(&r)));
        assert!(matches_any(Some("workspace"), Some(&r)));
    }

    #[test]
    fn test_lower_bound() {
        let r = ranges(&[">=5.2.0"]);
        assert!(matches_any(Some("5.2.0"), Some(&r)));
        assert!(matches_any(Some("10.1.0"), Some(&r)));
        assert!(!matches_any(Some("5.1.9"), Some(&r)));
    }

    #[test]
    fn test_space_separated_and_alternatives() {
        let r = ranges(&[">=5 <7"]);
        assert!(matches_any(Some("6.3.1"), Some(&r)));
        assert!(!matches_any(Some("7.0.0"), Some(&r)));

        let r = ranges(&["^2.0.1 || 4.x"]);
        assert!(matches_any(Some("2.5.0"), Some(&r)));
        assert!(matches_any(Some("4.9.9"), Some(&r)));
        assert!(!matches_any(Some("3.0.0"), Some(&r)));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let r = ranges(&["5.2.0"]);
        assert!(matches_any(Some("5.2.0"), Some(&r)));
        assert!(!matches_any(Some("5.3.0"), Some(&r)));
    }

    #[test]
    fn test_any_of_several_ranges() {
        let r = ranges(&["<1", ">=3"]);
        assert!(matches_any(Some("0.9.0"), Some(&r)));
        assert!(matches_any(Some("3.1.0"), Some(&r)));
        assert!(!matches_any(Some("2.0.0"), Some(&r)));
    }

    #[test]
    fn test_detached_operator() {
        let r = ranges(&[">= 5.2.0"]);
        assert!(matches_any(Some("10.0.0"), Some(&r)));
        assert!(!matches_any(Some("5.1.0"), Some(&r)));

        let r = ranges(&["> 1 < 3"]);
        assert!(matches_any(Some("2.0.0"), Some(&r)));
        assert!(!matches_any(Some("3.0.0"), Some(&r)));
    }

    #[test]
    fn test_hyphen_range() {
        let r = ranges(&["1.2.3 - 2.3.4"]);
        assert!(matches_any(Some("2.0.0"), Some(&r)));
        assert!(matches_any(Some("1.2.3"), Some(&r)));
        assert!(matches_any(Some("2.3.4"), Some(&r)));
        assert!(!matches_any(Some("2.3.5"), Some(&r)));
        assert!(!matches_any(Some("1.2.2"), Some(&r)));

        let r = ranges(&["1 - 2 || >=4"]);
        assert!(matches_any(Some("2.9.0"), Some(&r)));
        assert!(matches_any(Some("4.0.0"), Some(&r)));
        assert!(!matches_any(Some("3.0.0"), Some(&r)));
    }
}
