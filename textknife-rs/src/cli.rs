//! Command-line argument parsing.
//!
//! Usage:
//!   textknife [-c<config> | -n] [-s<sigils>] [-t<trace>] [-d<depth>] [-D<name>=<value>]... <script> [<arg>...]
//!
//! Option values may be attached (`-sbang`) or separate (`-s bang`).
//! Everything after the script path is handed to the script untouched.

use std::path::PathBuf;

use crate::config::parse_depth;
use crate::script::expand::{is_ident, SigilProfile};

pub const USAGE: &str = "Usage: textknife [-c<config> | -n] [-s<dollar|bang>] [-t<trace|->] \
                         [-d<depth>] [-D<name>=<value>]... <script> [<arg>...]";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Config-file specification.
    pub config: ConfigFile,
    /// Sigil profile override (`-s`).
    pub sigils: Option<SigilProfile>,
    /// Trace sink override (`-t`); `-` is stderr.
    pub trace: Option<String>,
    /// Call depth override (`-d`).
    pub max_call_depth: Option<usize>,
    /// `-D name=value` definitions, in command-line order.
    pub defines: Vec<(String, String)>,
    /// The script to run.
    pub script: PathBuf,
    /// Arguments after the script path.
    pub script_args: Vec<String>,
    /// `-h`: print usage and exit.
    pub help: bool,
}

/// How to choose the config file.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConfigFile {
    /// The per-user config file, if present (default).
    #[default]
    Search,
    /// `-n`: no config file.
    Skip,
    /// `-c<file>`: this file, which must exist.
    Explicit(PathBuf),
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut script: Option<PathBuf> = None;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        // `--` ends flag processing; the next word is the script.
        if arg == "--" {
            i += 1;
            break;
        }

        // First non-flag argument is the script; the rest belong to it.
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'h' => args.help = true,
                'n' => args.config = ConfigFile::Skip,

                flag @ ('c' | 's' | 't' | 'd' | 'D') => {
                    let value = if j + 1 < chars.len() {
                        // Embedded: -s<value>
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        // Separate: -s <value>
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err(format!("-{flag} requires an argument"));
                    };
                    apply_option(&mut args, flag, value)?;
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if i < argv.len() {
        script = Some(PathBuf::from(&argv[i]));
        args.script_args = argv[i + 1..].to_vec();
    }

    match script {
        Some(path) => args.script = path,
        None if args.help => {}
        None => return Err("no script given".to_owned()),
    }
    Ok(args)
}

fn apply_option(args: &mut CliArgs, flag: char, value: String) -> Result<(), String> {
    match flag {
        'c' => args.config = ConfigFile::Explicit(PathBuf::from(value)),
        's' => args.sigils = Some(value.parse()?),
        't' => args.trace = Some(value),
        'd' => args.max_call_depth = Some(parse_depth(&value)?),
        _ => {
            let (name, val) = value
                .split_once('=')
                .ok_or_else(|| format!("-D expects name=value, got '{value}'"))?;
            let name = name.trim();
            if !is_ident(name) {
                return Err(format!("-D: '{name}' is not a valid variable name"));
            }
            args.defines.push((name.to_owned(), val.to_owned()));
        }
    }
    Ok(())
}

/// Root-scope variables for the script's own arguments: `argc` and
/// `arg1` … `argN`.
pub fn script_arg_vars(script_args: &[String]) -> Vec<(String, String)> {
    let mut vars = vec![("argc".to_owned(), script_args.len().to_string())];
    vars.extend(
        script_args
            .iter()
            .enumerate()
            .map(|(n, a)| (format!("arg{}", n + 1), a.clone())),
    );
    vars
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn script_only() {
        let a = parse_argv(&argv(&["fix.tk"])).unwrap();
        assert_eq!(a.script, PathBuf::from("fix.tk"));
        assert!(a.script_args.is_empty());
        assert_eq!(a.config, ConfigFile::Search);
        assert!(a.sigils.is_none());
    }

    #[test]
    fn no_script_is_error() {
        assert!(parse_argv(&argv(&[])).is_err());
        assert!(parse_argv(&argv(&["-sbang"])).is_err());
    }

    #[test]
    fn help_without_script() {
        let a = parse_argv(&argv(&["-h"])).unwrap();
        assert!(a.help);
    }

    #[test]
    fn script_args_pass_through() {
        let a = parse_argv(&argv(&["run.tk", "-x", "in.txt", "--", "-d"])).unwrap();
        assert_eq!(a.script, PathBuf::from("run.tk"));
        assert_eq!(a.script_args, argv(&["-x", "in.txt", "--", "-d"]));
    }

    #[test]
    fn double_dash_before_script() {
        let a = parse_argv(&argv(&["-n", "--", "-odd-name.tk", "a"])).unwrap();
        assert_eq!(a.script, PathBuf::from("-odd-name.tk"));
        assert_eq!(a.script_args, argv(&["a"]));
    }

    #[test]
    fn config_attached_and_separate() {
        let a = parse_argv(&argv(&["-c/etc/tk.conf", "s.tk"])).unwrap();
        assert_eq!(a.config, ConfigFile::Explicit(PathBuf::from("/etc/tk.conf")));
        let a = parse_argv(&argv(&["-c", "my.conf", "s.tk"])).unwrap();
        assert_eq!(a.config, ConfigFile::Explicit(PathBuf::from("my.conf")));
    }

    #[test]
    fn skip_config() {
        let a = parse_argv(&argv(&["-n", "s.tk"])).unwrap();
        assert_eq!(a.config, ConfigFile::Skip);
    }

    #[test]
    fn sigils_and_depth() {
        let a = parse_argv(&argv(&["-sbang", "-d", "32", "s.tk"])).unwrap();
        assert_eq!(a.sigils, Some(SigilProfile::Bang));
        assert_eq!(a.max_call_depth, Some(32));
    }

    #[test]
    fn bad_values() {
        assert!(parse_argv(&argv(&["-s", "percent", "s.tk"])).is_err());
        assert!(parse_argv(&argv(&["-d0", "s.tk"])).is_err());
        assert!(parse_argv(&argv(&["-dmany", "s.tk"])).is_err());
    }

    #[test]
    fn trace_dash_is_value() {
        let a = parse_argv(&argv(&["-t", "-", "s.tk"])).unwrap();
        assert_eq!(a.trace.as_deref(), Some("-"));
    }

    #[test]
    fn combined_flags() {
        let a = parse_argv(&argv(&["-nhsbang", "s.tk"])).unwrap();
        assert_eq!(a.config, ConfigFile::Skip);
        assert!(a.help);
        assert_eq!(a.sigils, Some(SigilProfile::Bang));
    }

    #[test]
    fn defines_in_order() {
        let a = parse_argv(&argv(&["-Dout=/tmp/x", "-D", "mode=a=b", "s.tk"])).unwrap();
        assert_eq!(
            a.defines,
            vec![
                ("out".to_owned(), "/tmp/x".to_owned()),
                ("mode".to_owned(), "a=b".to_owned()),
            ]
        );
    }

    #[test]
    fn bad_define() {
        assert!(parse_argv(&argv(&["-Dnoequals", "s.tk"])).is_err());
        assert!(parse_argv(&argv(&["-D1x=2", "s.tk"])).is_err());
    }

    #[test]
    fn missing_option_value() {
        let e = parse_argv(&argv(&["-c"])).unwrap_err();
        assert_eq!(e, "-c requires an argument");
    }

    #[test]
    fn unknown_option() {
        let e = parse_argv(&argv(&["-z", "s.tk"])).unwrap_err();
        assert_eq!(e, "unknown option: -z");
    }

    #[test]
    fn arg_vars() {
        let vars = script_arg_vars(&argv(&["a", "b c"]));
        assert_eq!(
            vars,
            vec![
                ("argc".to_owned(), "2".to_owned()),
                ("arg1".to_owned(), "a".to_owned()),
                ("arg2".to_owned(), "b c".to_owned()),
            ]
        );
    }
}
