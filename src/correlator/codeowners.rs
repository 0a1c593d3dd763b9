//! CODEOWNERS parsing and lookup
//!
//! Rules are read top to bottom; when several match a path the last one
//! wins. Supported patterns:
//!
//! ```text
//! *.js          any file named *.js, at any depth
//! /build/       anchored directory: everything under <root>/build
//! docs/*        files directly under docs/
//! apps/**/x.rs  zero or more directories in between
//! file?.txt     one character except '/'
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

/// Locations searched for a CODEOWNERS file, in order
pub const CODEOWNERS_LOCATIONS: &[&str] = &["CODEOWNERS", ".github/CODEOWNERS", ".gitlab/CODEOWNERS", "docs/CODEOWNERS"];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    /// Pattern split on '/', already anchored and expanded
    segments: Vec<String>,
    owners: Vec<String>,
}

/// Parsed CODEOWNERS rules for one repository root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeOwners {
    root: PathBuf,
    rules: Vec<Rule>,
}

impl CodeOwners {
    /// Parse CODEOWNERS text; `root` is the directory paths are relative to
    pub fn parse(root: impl Into<PathBuf>, content: &str) -> Self {
        let rules = content
            .lines()
            .map(str::trim)
            // Comments and GitLab section headers
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('['))
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let pattern = parts.next()?;
                let owners: Vec<String> = parts
                    .take_while(|p| !p.starts_with('#'))
                    .map(str::to_string)
                    .collect();
                Some(Rule {
                    segments: compile(pattern),
                    owners,
                })
            })
            .collect();
        Self {
            root: root.into(),
            rules,
        }
    }

    /// Read the first CODEOWNERS file found under `root`
    pub fn discover(root: &Path) -> Option<Self> {
        for location in CODEOWNERS_LOCATIONS {
            let path = root.join(location);
            if let Ok(content) = std::fs::read_to_string(&path) {
                debug!(path = %path.display(), "Loaded CODEOWNERS");
                return Some(Self::parse(root, &content));
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Owners of `file`; `None` when no rule matches or the rule clears owners
    pub fn owners_for(&self, file: &str) -> Option<&[String]> {
        let relative = self.relative(file);
        let path: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        self.rules
            .iter()
            .rev()
            .find(|rule| match_segments(&rule.segments, &path))
            .map(|rule| rule.owners.as_slice())
            .filter(|owners| !owners.is_empty())
    }

    /// Owners rendered as a JSON array, the form carried by span tags
    pub fn owners_tag(&self, file: &str) -> Option<String> {
        self.owners_for(file)
            .and_then(|owners| serde_json::to_string(owners).ok())
    }

    fn relative(&self, file: &str) -> String {
        let file = file.replace('\\', "/");
        let root = self.root.to_string_lossy().replace('\\', "/");
        let stripped = if !root.is_empty() && root != "." {
            let prefix = format!("{}/", root.trim_end_matches('/'));
            match file.strip_prefix(&prefix) {
                Some(rest) => rest.to_string(),
                None => file,
            }
        } else {
            file
        };
        stripped
            .trim_start_matches("./")
            .trim_start_matches('/')
            .to_string()
    }
}

/// Expand a pattern into anchored segments
fn compile(pattern: &str) -> Vec<String> {
    let directory = pattern.ends_with('/');
    let trimmed = pattern.trim_end_matches('/');
    let anchored = trimmed.starts_with('/') || trimmed.contains('/');
    let trimmed = trimmed.trim_start_matches('/');

    let mut segments: Vec<String> = Vec::new();
    if !anchored {
        segments.push("**".to_string());
    }
    segments.extend(trimmed.split('/').filter(|s| !s.is_empty()).map(str::to_string));
    let literal_tail = segments
        .last()
        .map(|last| !last.contains('*') && !last.contains('?'))
        .unwrap_or(false);
    if directory || literal_tail {
        // A matched directory owns everything below it
        segments.push("**".to_string());
    }
    segments
}

fn match_segments(pattern: &[String], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((first, rest)) if first == "**" => (0..=path.len()).any(|skip| match_segments(rest, &path[skip..])),
        Some((first, rest)) => match path.split_first() {
            Some((segment, path_rest)) => match_segment(first, segment) && match_segments(rest, path_rest),
            None => false,
        },
    }
}

/// Single path segment against `*` / `?` wildcards
fn match_segment(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}
