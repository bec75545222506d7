// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ignore rule handling.
//!
//! Utilities to compile the ignore rules that decide which files get packed
//! into an archive, and which parts of a remote tree are protected from
//! deployment.
//!
//! # Ignore Rule Syntax
//!
//! Ignore rules live in a file named `.pushignore` at the top-level of the
//! local root. The syntax of an ignore rule is the same as the gitignore
//! syntax:
//!
//! - Blank lines, and lines starting with `#` are skipped.
//! - A leading `!` re-includes a path that a previous rule excluded.
//! - A trailing `/` only matches directories.
//! - A leading `/`, or any `/` in the middle of a pattern, anchors it to the
//!   root. Patterns without a slash match at any depth.
//! - `*`, `?`, and `[...]` never match across a `/`. A `**` path component
//!   matches zero or more directories, and a trailing `/**` matches
//!   everything inside of a directory.
//!
//! Rules are evaluated in file order, and the __last matching rule wins__.
//! However, once a directory is excluded, nothing below it can be re-included.
//!
//! The rule text gets packed verbatim into the archive. Thus, deployment applies
//! the exact same rules that were used to build the archive without needing
//! access to the original local tree.
//!
//! # See Also
//!
//! - [Man page gitignore](https://git-scm.com/docs/gitignore)

use glob::{MatchOptions, Pattern, PatternError};
use std::{
    fs::read_to_string,
    io::ErrorKind,
    path::{Path, PathBuf},
};

/// Name of ignore rule file at the top-level of a local root.
pub const IGNORE_FILE_NAME: &str = ".pushignore";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compiled listing of ignore rules.
///
/// # Invariant
///
/// - Rules are kept in file order.
/// - Empty rule set excludes nothing.
#[derive(Clone, Debug, Default)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Construct empty rule set that excludes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile rule set from raw rule text.
    ///
    /// # Errors
    ///
    /// - Return [`RuleError::InvalidPattern`] if any rule has malformed glob
    ///   syntax.
    pub fn parse(text: impl AsRef<str>) -> Result<Self> {
        Self::from_lines(text.as_ref().lines())
    }

    /// Compile rule set from listing of rule lines.
    ///
    /// # Errors
    ///
    /// - Return [`RuleError::InvalidPattern`] if any rule has malformed glob
    ///   syntax.
    pub fn from_lines(lines: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self> {
        let mut rules = Vec::new();
        for (index, line) in lines.into_iter().enumerate() {
            if let Some(rule) = Rule::compile(index + 1, line.as_ref())? {
                rules.push(rule);
            }
        }

        Ok(Self { rules })
    }

    /// Read raw ignore rule text from the top-level of a root.
    ///
    /// Returns `None` if the root does not contain an ignore rule file.
    ///
    /// # Errors
    ///
    /// - Return [`RuleError::ReadRuleFile`] if the ignore rule file exists, but
    ///   cannot be read.
    pub fn read_text(root: impl AsRef<Path>) -> Result<Option<String>> {
        let path = root.as_ref().join(IGNORE_FILE_NAME);
        match read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RuleError::ReadRuleFile { source: err, path }),
        }
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if rule set has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check if path relative to the root is excluded.
    ///
    /// Ancestor directories are checked first, from the top down. An excluded
    /// ancestor short-circuits matching, so nothing below it can be
    /// re-included.
    pub fn is_excluded(&self, path: impl AsRef<str>, is_dir: bool) -> bool {
        if self.rules.is_empty() {
            return false;
        }

        let path = path.as_ref();
        if strict_ancestors(path).any(|ancestor| self.verdict(ancestor, true)) {
            return true;
        }

        self.verdict(path, is_dir)
    }

    fn verdict(&self, path: &str, is_dir: bool) -> bool {
        self.rules
            .iter()
            .rev()
            .find_map(|rule| rule.decide(path, is_dir))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
enum Rule {
    Include(Glob),
    Exclude(Glob),
}

impl Rule {
    fn compile(line_number: usize, line: &str) -> Result<Option<Self>> {
        let line = trim_trailing_spaces(line);
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };

        let glob = match Glob::compile(body) {
            Ok(Some(glob)) => glob,
            Ok(None) => return Ok(None),
            Err(source) => {
                return Err(RuleError::InvalidPattern {
                    line: line_number,
                    pattern: line.to_string(),
                    source,
                })
            }
        };

        if negated {
            Ok(Some(Self::Include(glob)))
        } else {
            Ok(Some(Self::Exclude(glob)))
        }
    }

    /// Return `Some(true)` for exclusion, `Some(false)` for inclusion, and
    /// `None` if the rule does not match at all.
    fn decide(&self, path: &str, is_dir: bool) -> Option<bool> {
        match self {
            Self::Include(glob) => glob.matches(path, is_dir).then_some(false),
            Self::Exclude(glob) => glob.matches(path, is_dir).then_some(true),
        }
    }
}

#[derive(Clone, Debug)]
struct Glob {
    pattern: Pattern,
    dir_only: bool,
    contents_only: bool,
}

impl Glob {
    fn compile(body: &str) -> std::result::Result<Option<Self>, PatternError> {
        // INVARIANT: Escaped leading '#' or '!' is literal.
        let body = body
            .strip_prefix('\\')
            .filter(|rest| rest.starts_with(|c: char| c == '#' || c == '!'))
            .unwrap_or(body);

        let (dir_only, body) = match body.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, body),
        };

        let anchored = body.contains('/');
        let body = body.strip_prefix('/').unwrap_or(body);
        if body.is_empty() {
            return Ok(None);
        }

        let (contents_only, body) = match body.strip_suffix("/**") {
            Some(rest) if !rest.is_empty() => (true, rest),
            _ => (false, body),
        };

        let glob = translate(body);
        let glob = if anchored { glob } else { format!("**/{glob}") };

        Ok(Some(Self {
            pattern: Pattern::new(&glob)?,
            dir_only,
            contents_only,
        }))
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }

        if self.contents_only {
            return strict_ancestors(path)
                .any(|ancestor| self.pattern.matches_with(ancestor, MATCH_OPTIONS));
        }

        self.pattern.matches_with(path, MATCH_OPTIONS)
    }
}

/// Translate gitignore pattern body into glob syntax.
///
/// Backslash escapes become bracketed literals, and runs of asterisks that do
/// not form a whole path component collapse into a single `*`.
fn translate(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    let mut glob = String::with_capacity(body.len());
    let mut index = 0;

    while index < chars.len() {
        match chars[index] {
            '\\' if index + 1 < chars.len() => {
                glob.push_str(&Pattern::escape(&chars[index + 1].to_string()));
                index += 2;
            }
            '*' => {
                let start = index;
                while index < chars.len() && chars[index] == '*' {
                    index += 1;
                }

                let whole_component = (start == 0 || chars[start - 1] == '/')
                    && (index == chars.len() || chars[index] == '/');
                if index - start >= 2 && whole_component {
                    glob.push_str("**");
                } else {
                    glob.push('*');
                }
            }
            c => {
                glob.push(c);
                index += 1;
            }
        }
    }

    glob
}

fn trim_trailing_spaces(line: &str) -> &str {
    let trimmed = line.trim_end_matches([' ', '\t']);

    // INVARIANT: Keep escaped trailing space.
    if trimmed.ends_with('\\') && trimmed.len() < line.len() {
        return &line[..trimmed.len() + 1];
    }

    trimmed
}

/// Iterate strict ancestors of a relative path from the top down, e.g.,
/// `a/b/c` yields `a` then `a/b`.
fn strict_ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(index, _)| &path[..index])
}

/// Ignore rule error types.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    /// Ignore rule has malformed glob syntax.
    #[error("invalid ignore rule {pattern:?} at line {line}")]
    InvalidPattern {
        line: usize,
        pattern: String,
        #[source]
        source: PatternError,
    },

    /// Ignore rule file cannot be read from.
    #[error("failed to read ignore rule file at {:?}", path.display())]
    ReadRuleFile {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RuleError> = std::result::Result<T, E>;
