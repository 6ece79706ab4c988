//! Gitignore-style ignore predicate.
//!
//! Patterns compile once to case-insensitive regexes. They are evaluated
//! last-to-first and the first hit decides, so later lines override earlier
//! ones. A file-backed list re-reads its file when the mtime changes, checked
//! at most once per reload interval.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use regex::Regex;

use crate::core::errors::{MirrorError, Result};

/// Minimum time between re-stats of the ignore file.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Decides whether a root-relative path is excluded from backup.
pub trait IgnorePredicate {
    fn is_ignored(&self, rel: &str, is_dir: bool) -> bool;
}

/// Ignores nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIgnore;

impl IgnorePredicate for NoIgnore {
    fn is_ignored(&self, _rel: &str, _is_dir: bool) -> bool {
        false
    }
}

// ──────────────────── rules ────────────────────

#[derive(Debug, Clone)]
struct Rule {
    negate: bool,
    dir_only: bool,
    /// Match the whole relative path rather than the last component.
    full_path: bool,
    regex: Regex,
}

impl Rule {
    fn matches(&self, rel: &str, basename: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        let subject = if self.full_path { rel } else { basename };
        self.regex.is_match(subject)
    }
}

/// Parse one line. Blank lines and comments yield `Ok(None)`.
fn parse_line(line: &str) -> Result<Option<Rule>> {
    let line = line.trim_end_matches(['\r', '\n', ' ']);
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (negate, mut body) = match line.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let dir_only = body.ends_with('/') && !body.ends_with("\\/");
    if dir_only {
        body = &body[..body.len() - 1];
    }
    let anchored = body.starts_with('/');
    if anchored {
        body = &body[1..];
    }
    if body.is_empty() {
        return Err(MirrorError::InvalidConfig {
            details: format!("ignore pattern {line:?} is empty"),
        });
    }
    let full_path = anchored || body.contains('/');
    let regex = glob_to_regex(body).map_err(|details| MirrorError::InvalidConfig {
        details: format!("invalid ignore pattern {line:?}: {details}"),
    })?;
    Ok(Some(Rule {
        negate,
        dir_only,
        full_path,
        regex,
    }))
}

/// Check that `pattern` parses and compiles.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    parse_line(pattern).map(|_| ())
}

fn glob_to_regex(pattern: &str) -> std::result::Result<Regex, String> {
    let mut regex_str = String::with_capacity(pattern.len() * 2 + 8);
    regex_str.push_str("(?i)^");

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '\\' if i + 1 < chars.len() => {
                regex_str.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 2;
            }
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    regex_str.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' || chars[j] == '^' {
                        regex_str.push('^');
                        j += 1;
                    }
                    while j < end {
                        let c = chars[j];
                        if matches!(c, '[' | '&' | '~' | '\\') {
                            regex_str.push('\\');
                        }
                        regex_str.push(c);
                        j += 1;
                    }
                    regex_str.push(']');
                    i = end + 1;
                }
                None => {
                    regex_str.push_str("\\[");
                    i += 1;
                }
            },
            c => {
                regex_str.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    regex_str.push('$');
    Regex::new(&regex_str).map_err(|e| e.to_string())
}

/// Index of the `]` closing the class opened at `start`, if any.
///
/// A `]` directly after `[` or `[!` is a literal member.
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
        j += 1;
    }
    if j < chars.len() && chars[j] == ']' {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}

fn compile_all(lines: impl IntoIterator<Item = String>, origin: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for line in lines {
        match parse_line(&line) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(e) => eprintln!("[TMR-IGNORE] skipping pattern from {origin}: {e}"),
        }
    }
    rules
}

// ──────────────────── ignore list ────────────────────

#[derive(Debug)]
struct ListState {
    file_rules: Vec<Rule>,
    file_mtime: Option<SystemTime>,
    checked_at: Instant,
}

/// Ordered ignore rules, optionally backed by a file.
#[derive(Debug)]
pub struct IgnoreList {
    source: Option<PathBuf>,
    extra: Vec<Rule>,
    reload_interval: Duration,
    state: Mutex<ListState>,
}

impl IgnoreList {
    /// Rules from explicit patterns only.
    pub fn from_patterns(patterns: &[String]) -> Result<Self> {
        let mut extra = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            if let Some(rule) = parse_line(pattern)? {
                extra.push(rule);
            }
        }
        Ok(Self {
            source: None,
            extra,
            reload_interval: RELOAD_INTERVAL,
            state: Mutex::new(ListState {
                file_rules: Vec::new(),
                file_mtime: None,
                checked_at: Instant::now(),
            }),
        })
    }

    /// Rules read from `path`, creating an empty file when it is missing.
    ///
    /// Unparsable lines are skipped with a warning.
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
        }
        match fs::OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(MirrorError::io(path, e)),
        }
        let (file_rules, file_mtime) = read_rules(path)?;
        Ok(Self {
            source: Some(path.to_path_buf()),
            extra: Vec::new(),
            reload_interval: RELOAD_INTERVAL,
            state: Mutex::new(ListState {
                file_rules,
                file_mtime,
                checked_at: Instant::now(),
            }),
        })
    }

    /// Append patterns evaluated after (and so overriding) the file's own.
    pub fn with_extra(mut self, patterns: &[String]) -> Result<Self> {
        for pattern in patterns {
            if let Some(rule) = parse_line(pattern)? {
                self.extra.push(rule);
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn with_reload_interval(mut self, interval: Duration) -> Self {
        self.reload_interval = interval;
        self
    }

    /// Number of active rules.
    pub fn rule_count(&self) -> usize {
        self.state.lock().file_rules.len() + self.extra.len()
    }

    fn maybe_reload(&self, state: &mut ListState) {
        let Some(path) = &self.source else {
            return;
        };
        if state.checked_at.elapsed() < self.reload_interval {
            return;
        }
        state.checked_at = Instant::now();
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        if mtime == state.file_mtime {
            return;
        }
        match read_rules(path) {
            Ok((rules, mtime)) => {
                state.file_rules = rules;
                state.file_mtime = mtime;
            }
            Err(e) => eprintln!("[TMR-IGNORE] keeping previous rules: {e}"),
        }
    }
}

fn read_rules(path: &Path) -> Result<(Vec<Rule>, Option<SystemTime>)> {
    let text = fs::read_to_string(path).map_err(|e| MirrorError::io(path, e))?;
    let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
    let origin = path.display().to_string();
    Ok((compile_all(text.lines().map(str::to_string), &origin), mtime))
}

impl IgnorePredicate for IgnoreList {
    fn is_ignored(&self, rel: &str, is_dir: bool) -> bool {
        let basename = rel.rsplit('/').next().unwrap_or(rel);
        if let Some(rule) = self
            .extra
            .iter()
            .rev()
            .find(|r| r.matches(rel, basename, is_dir))
        {
            return !rule.negate;
        }
        let mut state = self.state.lock();
        self.maybe_reload(&mut state);
        state
            .file_rules
            .iter()
            .rev()
            .find(|r| r.matches(rel, basename, is_dir))
            .is_some_and(|r| !r.negate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(patterns: &[&str]) -> IgnoreList {
        let owned: Vec<String> = patterns.iter().map(|p| (*p).to_string()).collect();
        IgnoreList::from_patterns(&owned).expect("valid patterns")
    }

    #[test]
    fn basename_patterns_match_at_any_depth() {
        let ignore = list(&["*.tmp"]);
        assert!(ignore.is_ignored("a.tmp", false));
        assert!(ignore.is_ignored("deep/er/B.TMP", false));
        assert!(!ignore.is_ignored("a.tmp.txt", false));
    }

    #[test]
    fn anchored_and_slashed_patterns_match_whole_path() {
        let ignore = list(&["/build", "docs/*.pdf"]);
        assert!(ignore.is_ignored("build", true));
        assert!(!ignore.is_ignored("src/build", true));
        assert!(ignore.is_ignored("docs/a.pdf", false));
        assert!(!ignore.is_ignored("x/docs/a.pdf", false));
    }

    #[test]
    fn trailing_slash_means_directories_only() {
        let ignore = list(&["cache/"]);
        assert!(ignore.is_ignored("a/cache", true));
        assert!(!ignore.is_ignored("a/cache", false));
    }

    #[test]
    fn later_negation_wins() {
        let ignore = list(&["*.log", "!keep.log"]);
        assert!(ignore.is_ignored("x.log", false));
        assert!(!ignore.is_ignored("keep.log", false));
        let reversed = list(&["!keep.log", "*.log"]);
        assert!(reversed.is_ignored("keep.log", false));
    }

    #[test]
    fn double_star_spans_directories() {
        let ignore = list(&["**/node_modules", "logs/**"]);
        assert!(ignore.is_ignored("node_modules", true));
        assert!(ignore.is_ignored("a/b/node_modules", true));
        assert!(ignore.is_ignored("logs/2024/x", false));
        assert!(!ignore.is_ignored("logs", true));
    }

    #[test]
    fn character_classes_and_escapes() {
        let ignore = list(&["file[0-9].txt", "x[!a]y", "\\#literal", "a+b"]);
        assert!(ignore.is_ignored("file7.txt", false));
        assert!(!ignore.is_ignored("fileA.txt", false));
        assert!(ignore.is_ignored("xby", false));
        assert!(!ignore.is_ignored("xay", false));
        assert!(ignore.is_ignored("#literal", false));
        assert!(ignore.is_ignored("a+b", false));
        assert!(!ignore.is_ignored("aab", false));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let ignore = list(&["# note", "", "*.bak"]);
        assert_eq!(ignore.rule_count(), 1);
    }

    #[test]
    fn validate_rejects_empty_and_broken_patterns() {
        assert!(validate_pattern("*.tmp").is_ok());
        assert!(validate_pattern("/").is_err());
        assert!(validate_pattern("!").is_err());
        assert!(validate_pattern("[z-a]").is_err());
    }

    #[test]
    fn load_creates_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg/ignore");
        let ignore = IgnoreList::load(&path).expect("load");
        assert!(path.exists());
        assert_eq!(ignore.rule_count(), 0);
        assert!(!ignore.is_ignored("a", false));
    }

    #[test]
    fn extra_patterns_override_file_rules() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ignore");
        fs::write(&path, "*.txt\n").expect("write");
        let ignore = IgnoreList::load(&path)
            .expect("load")
            .with_extra(&["!keep.txt".to_string()])
            .expect("extra");
        assert!(ignore.is_ignored("a.txt", false));
        assert!(!ignore.is_ignored("keep.txt", false));
    }

    #[test]
    fn reloads_when_file_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ignore");
        fs::write(&path, "*.a\n").expect("write");
        let ignore = IgnoreList::load(&path)
            .expect("load")
            .with_reload_interval(Duration::ZERO);
        assert!(ignore.is_ignored("x.a", false));

        fs::write(&path, "*.b\n").expect("rewrite");
        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(2_000_000_000, 0))
            .expect("bump mtime");
        assert!(!ignore.is_ignored("x.a", false));
        assert!(ignore.is_ignored("x.b", false));
    }
}
