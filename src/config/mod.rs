//! Parser for OpenSSL-style configuration files.
//!
//! The format is the one `openssl ca` and `openssl req` read: `[ section ]`
//! headers, `name = value` assignments, `#` comments, quoting, backslash
//! escapes, line continuations and `$var` / `${section::var}` expansion.
//! Assignments made before the first header land in the `default` section,
//! which also serves as the fallback for lookups and expansions.
//!
//! ```
//! use cakit::config::Config;
//!
//! let config = Config::parse(
//!     "dir = /etc/ca\n[ CA_default ]\ndatabase = $dir/index.txt # db\n",
//! ).unwrap();
//! assert_eq!(config.get("CA_default", "database"), Some("/etc/ca/index.txt"));
//! assert_eq!(config.get("CA_default", "dir"), Some("/etc/ca"));
//! ```

pub mod ca;
pub mod extensions;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CaKitError;

pub type Result<T> = std::result::Result<T, CaKitError>;

/// Name of the implicit section holding assignments made before any header.
pub const DEFAULT_SECTION: &str = "default";

static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\s*([A-Za-z0-9_.$]+)\s*\]$").expect("valid regex"));

static ASSIGNMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_.;,!]+)\s*=\s*(.*)$").expect("valid regex"));

/// One `name = value` assignment, after quoting and expansion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: String,
    /// 1-based line the assignment started on.
    pub line: usize,
}

/// A named section; entries keep file order, duplicates included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub entries: Vec<Entry>,
}

impl Section {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    /// The value of the last assignment to `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().rev().find(|e| e.key == key)
    }
}

/// A parsed configuration file.
#[derive(Clone, Debug, Default)]
pub struct Config {
    sections: Vec<Section>,
    base_dir: Option<PathBuf>,
}

impl Config {
    /// Parses configuration text. Relative paths resolve against the
    /// current directory.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Config {
            sections: vec![Section::new(DEFAULT_SECTION)],
            base_dir: None,
        };
        let mut current = DEFAULT_SECTION.to_string();

        for (line_no, line) in logical_lines(text) {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            if trimmed.starts_with('[') {
                let header = strip_comment(trimmed);
                let caps = SECTION_HEADER.captures(header).ok_or_else(|| {
                    CaKitError::config_at(line_no, format!("malformed section header '{header}'"))
                })?;
                current = caps[1].to_string();
                if config.section(&current).is_none() {
                    config.sections.push(Section::new(&current));
                }
                continue;
            }

            if let Some(directive) = trimmed.strip_prefix('.') {
                let directive = strip_comment(directive);
                if directive.starts_with("pragma") {
                    log::debug!("ignoring directive .{directive} on line {line_no}");
                    continue;
                }
                return Err(CaKitError::config_at(
                    line_no,
                    format!("unsupported directive .{directive}"),
                ));
            }

            let caps = ASSIGNMENT.captures(trimmed).ok_or_else(|| {
                CaKitError::config_at(line_no, format!("expected 'name = value', found '{trimmed}'"))
            })?;
            let key = caps[1].to_string();
            let value = config.expand_value(&caps[2], &current, line_no)?;

            let section = config
                .sections
                .iter_mut()
                .find(|s| s.name == current)
                .ok_or_else(|| CaKitError::config_at(line_no, format!("no section [{current}]")))?;
            section.entries.push(Entry {
                key,
                value,
                line: line_no,
            });
        }

        log::debug!("parsed configuration with {} sections", config.sections.len());
        Ok(config)
    }

    /// Loads and parses a file. Relative paths inside it resolve against
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| CaKitError::io(path, e))?;
        let mut config = Self::parse(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Overrides the directory relative paths resolve against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn require_section(&self, name: &str) -> Result<&Section> {
        self.section(name)
            .ok_or_else(|| CaKitError::config(format!("section [{name}] is missing")))
    }

    /// Looks `key` up in `section`, falling back to the default section.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.section(DEFAULT_SECTION).and_then(|s| s.get(key)))
    }

    pub fn require(&self, section: &str, key: &str) -> Result<&str> {
        self.get(section, key).ok_or_else(|| {
            CaKitError::config(format!("'{key}' is not set in section [{section}]"))
        })
    }

    /// Reads a yes/no style flag.
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        let Some(value) = self.get(section, key) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "yes" | "y" | "true" | "on" | "1" => Ok(Some(true)),
            "no" | "n" | "false" | "off" | "0" => Ok(Some(false)),
            _ => Err(self.error_for(
                section,
                key,
                format!("'{key}' must be yes or no, found '{value}'"),
            )),
        }
    }

    pub fn get_number<T: std::str::FromStr>(&self, section: &str, key: &str) -> Result<Option<T>> {
        self.get(section, key)
            .map(|value| {
                value.parse::<T>().map_err(|_| {
                    self.error_for(
                        section,
                        key,
                        format!("'{key}' must be a number, found '{value}'"),
                    )
                })
            })
            .transpose()
    }

    /// Resolves a path value against the base directory.
    pub fn resolve_path(&self, value: &str) -> PathBuf {
        let path = Path::new(value);
        match &self.base_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// A config error pinned to the line where `key` was assigned.
    pub fn error_for(&self, section: &str, key: &str, message: impl Into<String>) -> CaKitError {
        let line = self
            .section(section)
            .and_then(|s| s.entry(key))
            .or_else(|| self.section(DEFAULT_SECTION).and_then(|s| s.entry(key)))
            .map(|e| e.line);
        CaKitError::ConfigError {
            line,
            message: message.into(),
        }
    }

    fn lookup_variable(&self, section: Option<&str>, current: &str, name: &str) -> Option<&str> {
        match section {
            Some(section) => self.get(section, name),
            None => self.get(current, name),
        }
    }

    fn expand_value(&self, raw: &str, current: &str, line: usize) -> Result<String> {
        let mut out = String::new();
        // Length of `out` that must survive trailing-whitespace trimming.
        let mut keep = 0;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '#' => break,
                '"' | '\'' => {
                    let quote = c;
                    let mut closed = false;
                    while let Some(q) = chars.next() {
                        if q == quote {
                            closed = true;
                            break;
                        }
                        if q == '\\' {
                            if let Some(escaped) = chars.next() {
                                out.push(unescape(escaped));
                            }
                            continue;
                        }
                        out.push(q);
                    }
                    if !closed {
                        return Err(CaKitError::config_at(line, "unterminated quoted value"));
                    }
                    keep = out.len();
                }
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(unescape(escaped));
                        keep = out.len();
                    }
                }
                '$' => {
                    let (section, name) = read_variable(&mut chars, line)?;
                    let value = self
                        .lookup_variable(section.as_deref(), current, &name)
                        .ok_or_else(|| {
                            let full = match &section {
                                Some(s) => format!("{s}::{name}"),
                                None => name.clone(),
                            };
                            CaKitError::config_at(line, format!("variable '{full}' has no value"))
                        })?;
                    out.push_str(value);
                    keep = out.len();
                }
                c => {
                    out.push(c);
                    if !c.is_whitespace() {
                        keep = out.len();
                    }
                }
            }
        }

        out.truncate(keep);
        Ok(out)
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        'r' => '\r',
        't' => '\t',
        'b' => '\u{8}',
        other => other,
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Reads the variable reference following a `$`.
fn read_variable(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    line: usize,
) -> Result<(Option<String>, String)> {
    let closing = match chars.peek() {
        Some('{') => Some('}'),
        Some('(') => Some(')'),
        _ => None,
    };

    let mut reference = String::new();
    if let Some(close) = closing {
        chars.next();
        loop {
            match chars.next() {
                Some(c) if c == close => break,
                Some(c) => reference.push(c),
                None => {
                    return Err(CaKitError::config_at(line, "unterminated variable reference"));
                }
            }
        }
    } else {
        while let Some(&c) = chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                reference.push(c);
                chars.next();
            } else {
                break;
            }
        }
    }

    let (section, name) = match reference.split_once("::") {
        Some((section, name)) => (Some(section.to_string()), name.to_string()),
        None => (None, reference),
    };
    if name.is_empty() || !name.chars().all(is_name_char) {
        return Err(CaKitError::config_at(
            line,
            format!("invalid variable reference '${name}'"),
        ));
    }
    Ok((section, name))
}

/// Drops a trailing `# comment` from a header or directive line.
fn strip_comment(s: &str) -> &str {
    s.split('#').next().unwrap_or(s).trim()
}

/// Joins backslash-continued physical lines; yields the starting line number.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let (start, mut buf) = pending.take().unwrap_or((line_no, String::new()));
        let trailing = raw.chars().rev().take_while(|c| *c == '\\').count();
        if trailing % 2 == 1 {
            buf.push_str(&raw[..raw.len() - 1]);
            pending = Some((start, buf));
        } else {
            buf.push_str(raw);
            out.push((start, buf));
        }
    }
    if let Some(rest) = pending {
        out.push(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_and_order() {
        let config = Config::parse(
            "[ alt_names ]\nDNS.1 = a\nDNS.2 = b\n#DNS.3 = c\nIP.1 = 10.0.0.1\n",
        )
        .unwrap();
        let keys: Vec<_> = config
            .section("alt_names")
            .unwrap()
            .entries
            .iter()
            .map(|e| e.key.as_str())
            .collect();
        assert_eq!(keys, ["DNS.1", "DNS.2", "IP.1"]);
    }

    #[test]
    fn test_comments_quotes_and_escapes() {
        let config = Config::parse(
            "[s]\na = value # trailing comment\nb = \"quoted # not a comment\"\nc = one\\#two\nd = 'single'   \ne =   spaced out   \n",
        )
        .unwrap();
        assert_eq!(config.get("s", "a"), Some("value"));
        assert_eq!(config.get("s", "b"), Some("quoted # not a comment"));
        assert_eq!(config.get("s", "c"), Some("one#two"));
        assert_eq!(config.get("s", "d"), Some("single"));
        assert_eq!(config.get("s", "e"), Some("spaced out"));
    }

    #[test]
    fn test_variable_expansion() {
        let config = Config::parse(
            "dir = /srv/ca\n[ paths ]\nname = index\n[ CA_default ]\ndb = $dir/${paths::name}.txt\nserial = $(dir)/serial\nlocal = x\nboth = ${local}-$paths::name\n",
        )
        .unwrap();
        assert_eq!(config.get("CA_default", "db"), Some("/srv/ca/index.txt"));
        assert_eq!(config.get("CA_default", "serial"), Some("/srv/ca/serial"));
        assert_eq!(config.get("CA_default", "both"), Some("x-index"));
    }

    #[test]
    fn test_unknown_variable_reports_line() {
        let err = Config::parse("[s]\n\na = $missing\n").unwrap_err();
        match err {
            CaKitError::ConfigError { line, message } => {
                assert_eq!(line, Some(3));
                assert!(message.contains("missing"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_line_continuation() {
        let config = Config::parse("[s]\nlong = first \\\nsecond\nafter = x\n").unwrap();
        assert_eq!(config.get("s", "long"), Some("first second"));
        assert_eq!(config.section("s").unwrap().entries[1].line, 4);
    }

    #[test]
    fn test_last_assignment_wins_and_default_fallback() {
        let config = Config::parse("shared = d\n[s]\nk = 1\nk = 2\n").unwrap();
        assert_eq!(config.get("s", "k"), Some("2"));
        assert_eq!(config.get("s", "shared"), Some("d"));
        assert_eq!(config.get("nope", "shared"), Some("d"));
        assert_eq!(config.get("s", "absent"), None);
    }

    #[test]
    fn test_malformed_lines() {
        assert!(Config::parse("[unterminated\n").is_err());
        assert!(Config::parse("[s]\njust words\n").is_err());
        assert!(Config::parse(".include other.cnf\n").is_err());
        assert!(Config::parse("[s]\na = \"open\n").is_err());
        assert!(Config::parse(".pragma dollarid:on\n[s]\n").is_ok());
    }

    #[test]
    fn test_bool_and_number() {
        let config = Config::parse("[s]\nyes = yes\nno = no\nbad = maybe\nn = 365\n").unwrap();
        assert_eq!(config.get_bool("s", "yes").unwrap(), Some(true));
        assert_eq!(config.get_bool("s", "no").unwrap(), Some(false));
        assert_eq!(config.get_bool("s", "absent").unwrap(), None);
        assert!(config.get_bool("s", "bad").is_err());
        assert_eq!(config.get_number::<i64>("s", "n").unwrap(), Some(365));
        assert!(config.get_number::<i64>("s", "yes").is_err());
    }

    #[test]
    fn test_resolve_path() {
        let config = Config::parse("").unwrap().with_base_dir("/etc/ca");
        assert_eq!(config.resolve_path("index.txt"), PathBuf::from("/etc/ca/index.txt"));
        assert_eq!(config.resolve_path("/abs/serial"), PathBuf::from("/abs/serial"));
    }
}
