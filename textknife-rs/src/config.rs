//! Engine configuration file parser.
//!
//! A config file is a list of `key = value` lines:
//!
//! | Key              | Value                     | Default  |
//! |------------------|---------------------------|----------|
//! | `sigils`         | `dollar` or `bang`        | `dollar` |
//! | `max_call_depth` | positive integer          | `200`    |
//! | `trace`          | file path, or `-` (stderr)| off      |
//! | `define <name>`  | any text                  |          |
//!
//! Lines starting with `#` or `;` are comments.  Malformed lines are
//! reported and skipped; the rest of the file still applies.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::script::expand::{is_ident, SigilProfile};
use crate::script::interp::DEFAULT_MAX_CALL_DEPTH;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Settings applied to a [`ScriptEngine`](crate::engine::ScriptEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub sigils: SigilProfile,
    pub max_call_depth: usize,
    /// `-` for stderr, anything else is a file path.
    pub trace: Option<String>,
    /// Variables pre-seeded into every run's root scope.
    pub defines: Vec<(String, String)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            sigils: SigilProfile::Dollar,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace: None,
            defines: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config string.
    ///
    /// Returns the config and a list of any errors; lines in error leave the
    /// corresponding setting at its previous value.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = EngineConfig::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Err(message) = config.apply_line(line) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// `<config dir>/textknife/config` for the current user, if a home
    /// directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "textknife").map(|dirs| dirs.config_dir().join("config"))
    }

    fn apply_line(&mut self, line: &str) -> Result<(), String> {
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("expected 'key = value', got '{line}'"));
        };
        let key = key.trim();
        let value = unquote(value.trim());

        let define = key
            .strip_prefix("define")
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
        if let Some(name) = define {
            let name = name.trim();
            if !is_ident(name) {
                return Err(format!("'define' needs a variable name, got '{key}'"));
            }
            self.defines.retain(|(n, _)| n != name);
            self.defines.push((name.to_owned(), value.to_owned()));
            return Ok(());
        }

        match key {
            "sigils" => self.sigils = value.parse()?,
            "max_call_depth" => {
                self.max_call_depth = parse_depth(value)?;
            }
            "trace" => {
                self.trace = match value {
                    "" | "off" | "none" => None,
                    v => Some(v.to_owned()),
                };
            }
            other => return Err(format!("unknown setting '{other}'")),
        }
        Ok(())
    }
}

/// Parse a call-depth limit; zero is rejected.
pub fn parse_depth(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("max_call_depth must be a positive integer, got '{s}'")),
        Ok(n) => Ok(n),
    }
}

/// Strip one pair of surrounding double quotes.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .unwrap_or(s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_default() {
        let (cfg, errs) = EngineConfig::load_str("");
        assert!(errs.is_empty());
        assert_eq!(cfg, EngineConfig::default());
        assert_eq!(cfg.max_call_depth, 200);
    }

    #[test]
    fn all_keys() {
        let src = "sigils = bang\nmax_call_depth = 50\ntrace = -\n";
        let (cfg, errs) = EngineConfig::load_str(src);
        assert!(errs.is_empty(), "{errs:?}");
        assert_eq!(cfg.sigils, SigilProfile::Bang);
        assert_eq!(cfg.max_call_depth, 50);
        assert_eq!(cfg.trace.as_deref(), Some("-"));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let src = "# hash comment\n; semicolon comment\n\n   \nsigils = dollar\n";
        let (cfg, errs) = EngineConfig::load_str(src);
        assert!(errs.is_empty());
        assert_eq!(cfg.sigils, SigilProfile::Dollar);
    }

    #[test]
    fn quoted_trace_path() {
        let (cfg, _) = EngineConfig::load_str("trace = \"/tmp/my trace.log\"");
        assert_eq!(cfg.trace.as_deref(), Some("/tmp/my trace.log"));
    }

    #[test]
    fn trace_off() {
        let (cfg, errs) = EngineConfig::load_str("trace = -\ntrace = off");
        assert!(errs.is_empty());
        assert_eq!(cfg.trace, None);
    }

    #[test]
    fn defines_last_wins() {
        let src = "define user = ann\ndefine out = /tmp/x\ndefine user = bob";
        let (cfg, errs) = EngineConfig::load_str(src);
        assert!(errs.is_empty());
        assert_eq!(
            cfg.defines,
            vec![
                ("out".to_owned(), "/tmp/x".to_owned()),
                ("user".to_owned(), "bob".to_owned()),
            ]
        );
    }

    #[test]
    fn bad_define_name() {
        let (cfg, errs) = EngineConfig::load_str("define = x\ndefine 9lives = x\ndefinex = 1");
        assert_eq!(errs.len(), 3);
        assert!(cfg.defines.is_empty());
    }

    #[test]
    fn errors_carry_line_numbers_and_are_skipped() {
        let src = "sigils = dollar\nbogus line\nmax_call_depth = 0\ncolour = red\nsigils = bang";
        let (cfg, errs) = EngineConfig::load_str(src);
        let lines: Vec<usize> = errs.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![2, 3, 4]);
        assert_eq!(cfg.sigils, SigilProfile::Bang);
        assert_eq!(cfg.max_call_depth, 200);
        assert_eq!(errs[2].to_string(), "line 4: unknown setting 'colour'");
    }

    #[test]
    fn bad_sigil_profile() {
        let (_, errs) = EngineConfig::load_str("sigils = percent");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("percent"));
    }

    #[test]
    fn load_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "max_call_depth = 12\n").unwrap();
        let (cfg, errs) = EngineConfig::load_file(&path).unwrap();
        assert!(errs.is_empty());
        assert_eq!(cfg.max_call_depth, 12);
    }

    #[test]
    fn load_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EngineConfig::load_file(&dir.path().join("nope")).is_err());
    }
}
