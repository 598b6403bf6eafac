//! Line parser and validation for the share configuration language.
//!
//! One rule per non-comment, non-blank line: `SOURCE DEST [OPTIONS]`.
//! Violations are collected with their line number and text; a bad line
//! never aborts the remaining lines.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use rootlet_common::error::{Result, RootletError};

use crate::lexer::tokenize_line;

/// Classification of a rule's source by its first path segment. Each
/// category maps to a fixed host base directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareCategory {
    /// The interactive host user's file tree.
    MyFiles,
    /// The host user's downloads directory.
    Downloads,
    /// The host user's encrypted vault.
    Encrypted,
    /// The cross-guest shared directory.
    Shared,
    /// First segment matched no known category; skipped with a warning.
    Invalid,
}

impl ShareCategory {
    /// Classifies the first path segment of a rule source.
    #[must_use]
    pub fn classify(segment: &str) -> Self {
        match segment {
            "myfiles" => Self::MyFiles,
            "downloads" => Self::Downloads,
            "encrypted" => Self::Encrypted,
            "shared" => Self::Shared,
            _ => Self::Invalid,
        }
    }

    /// The source token this category parses from.
    #[must_use]
    pub const fn token(&self) -> &'static str {
        match self {
            Self::MyFiles => "myfiles",
            Self::Downloads => "downloads",
            Self::Encrypted => "encrypted",
            Self::Shared => "shared",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ShareCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// One accepted share rule.
///
/// Paths are normalized to trailing separators so that sibling directories
/// sharing a prefix can never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareRule {
    /// Source category (first path segment of SOURCE).
    pub category: ShareCategory,
    /// Path below the category's host base; empty or `/`-terminated.
    pub suffix: String,
    /// Guest destination; starts with `/` or `~`, `/`-terminated.
    pub dest: String,
    /// Mount options; `{exec}` when the line gave none.
    pub options: BTreeSet<String>,
}

impl fmt::Display for ShareRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = if self.suffix.is_empty() {
            self.category.token().to_owned()
        } else {
            format!("{}/{}", self.category.token(), self.suffix)
        };
        write!(
            f,
            "{} {} {}",
            quote_token(&source),
            quote_token(&self.dest),
            self.options.iter().cloned().collect::<Vec<_>>().join(",")
        )
    }
}

fn quote_token(token: &str) -> String {
    if token.chars().any(char::is_whitespace) {
        format!("\"{token}\"")
    } else {
        token.to_owned()
    }
}

/// A rejected configuration line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    /// One-based line number in the configuration file.
    pub line: usize,
    /// The offending line, verbatim.
    pub text: String,
    /// Why the line was rejected.
    pub message: String,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.message, self.text)
    }
}

/// Parse result: accepted rules plus per-line rejections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareConfig {
    /// Rules accepted in file order.
    pub rules: Vec<ShareRule>,
    /// Lines rejected, in file order.
    pub errors: Vec<LineError>,
}

/// Parses the full share configuration text.
#[must_use]
pub fn parse(input: &str) -> ShareConfig {
    let mut config = ShareConfig::default();

    for (idx, line) in input.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_line(trimmed) {
            Ok(rule) => config.rules.push(rule),
            Err(message) => config.errors.push(LineError {
                line: idx + 1,
                text: line.to_owned(),
                message,
            }),
        }
    }

    config
}

fn parse_line(line: &str) -> std::result::Result<ShareRule, String> {
    let tokens = tokenize_line(line)?;
    let (source, dest, options) = match tokens.as_slice() {
        [source, dest] => (source, dest, None),
        [source, dest, options] => (source, dest, Some(options.as_str())),
        _ => return Err("expected SOURCE DEST [OPTIONS]".to_owned()),
    };

    if source.is_empty() {
        return Err("SOURCE must not be empty".to_owned());
    }
    if !(dest.starts_with('/') || dest.starts_with('~')) {
        return Err("DEST must start with '/' or '~'".to_owned());
    }
    if has_parent_segment(source) || has_parent_segment(dest) {
        return Err("'..' segments are not allowed".to_owned());
    }

    let options = match options {
        Some(opts) => {
            if !opts.chars().all(|c| c.is_ascii_lowercase() || c == ',') {
                return Err("OPTIONS must match [a-z,]*".to_owned());
            }
            let set: BTreeSet<String> = opts
                .split(',')
                .filter(|o| !o.is_empty())
                .map(str::to_owned)
                .collect();
            if set.is_empty() {
                default_options()
            } else {
                set
            }
        }
        None => default_options(),
    };

    let mut segments = source.split('/').filter(|s| !s.is_empty());
    let first = segments.next().ok_or_else(|| "SOURCE must not be empty".to_owned())?;
    let suffix = segments.collect::<Vec<_>>().join("/");

    Ok(ShareRule {
        category: ShareCategory::classify(first),
        suffix: with_trailing_slash_if_nonempty(&suffix),
        dest: with_trailing_slash(dest),
        options,
    })
}

fn default_options() -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    let _ = set.insert("exec".to_owned());
    set
}

fn has_parent_segment(path: &str) -> bool {
    path.split('/').any(|seg| seg == "..")
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

fn with_trailing_slash_if_nonempty(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        with_trailing_slash(path)
    }
}

/// Default configuration written when the file is absent.
pub const DEFAULT_TEMPLATE: &str = "\
# Directory sharing between the host and this guest.
#
# One rule per line:
#
#   SOURCE DEST [OPTIONS]
#
# SOURCE selects a host directory by category, optionally with a
# subdirectory: myfiles, downloads, encrypted, shared.
# DEST is the mount point inside the guest; it must start with '/' or
# '~' (the entering user's home). '~name' maps to /home/name.
# OPTIONS is a comma-separated list of lowercase mount options; the
# default is 'exec'.
#
# Examples:
#
#   downloads ~/Downloads
#   myfiles/Pictures ~/Pictures ro
#   shared /mnt/shared exec
#
downloads ~/Downloads
";

/// Reads the share configuration at `path`, materializing the documented
/// default template first when the file does not exist.
///
/// # Errors
///
/// Returns an error if the file cannot be created or read.
pub fn load_or_create(path: &Path) -> Result<ShareConfig> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RootletError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, DEFAULT_TEMPLATE).map_err(|e| RootletError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::info!(path = %path.display(), "wrote default share configuration");
    }

    let content = std::fs::read_to_string(path).map_err(|e| RootletError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(parse(&content))
}
