//! Variable and buffer interpolation.
//!
//! Two sigil profiles are supported; the engine picks one per instance:
//!
//! | Sequence  | [`SigilProfile::Dollar`] | [`SigilProfile::Bang`] |
//! |-----------|--------------------------|------------------------|
//! | variable  | `$(name)`                | `!(name)`              |
//! | buffer    | `~name`                  | `!name`                |
//! | literal   | `$$` → `$`               | `!!` → `!`             |
//!
//! Variable names may themselves contain references (`$(arg$(i))`); the
//! inner reference is expanded first.  The substituted value is inserted
//! as-is and not expanded again.  A buffer reference expands to the buffer's
//! lines joined with `\n` and only when that buffer exists; otherwise the text
//! is left untouched.  An unbound variable expands to the empty string.

use std::fmt;
use std::str::FromStr;

use super::expr::EvalContext;

/// Which pair of sigils marks variable and buffer references.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SigilProfile {
    #[default]
    Dollar,
    Bang,
}

impl SigilProfile {
    /// The character introducing a `(name)` variable reference.
    pub fn var_sigil(self) -> char {
        match self {
            SigilProfile::Dollar => '$',
            SigilProfile::Bang => '!',
        }
    }

    /// The character introducing a buffer reference.
    pub fn buffer_sigil(self) -> char {
        match self {
            SigilProfile::Dollar => '~',
            SigilProfile::Bang => '!',
        }
    }

    /// If `token` is a buffer reference (`~name` / `!name`), return the name.
    pub fn buffer_ref(self, token: &str) -> Option<&str> {
        let name = token.strip_prefix(self.buffer_sigil())?;
        (!name.is_empty() && name.chars().all(is_buffer_name_char)).then_some(name)
    }
}

impl fmt::Display for SigilProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SigilProfile::Dollar => "dollar",
            SigilProfile::Bang => "bang",
        })
    }
}

impl FromStr for SigilProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dollar" | "$" => Ok(SigilProfile::Dollar),
            "bang" | "!" => Ok(SigilProfile::Bang),
            other => Err(format!("unknown sigil profile '{other}' (expected dollar or bang)")),
        }
    }
}

/// `true` for a variable name: a letter or `_`, then letters, digits, `_`.
pub fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn is_buffer_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Expand every reference in `src`.
pub fn interpolate(src: &str, ctx: &dyn EvalContext) -> String {
    expand(src, ctx, false)
}

/// Expand references in a regex pattern.  A backslash escape such as `\$`
/// is copied through untouched and never starts a reference.
pub fn interpolate_pattern(src: &str, ctx: &dyn EvalContext) -> String {
    expand(src, ctx, true)
}

fn expand(src: &str, ctx: &dyn EvalContext, keep_escapes: bool) -> String {
    let profile = ctx.sigils();
    let var = profile.var_sigil();
    let buf = profile.buffer_sigil();
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if keep_escapes && c == '\\' {
            out.extend(chars[i..].iter().take(2));
            i += 2;
            continue;
        }
        if c == var && chars.get(i + 1) == Some(&var) {
            out.push(var);
            i += 2;
            continue;
        }
        if c == var && chars.get(i + 1) == Some(&'(') {
            if let Some(close) = matching_paren(&chars, i + 1) {
                let raw: String = chars[i + 2..close].iter().collect();
                let name = expand(&raw, ctx, false);
                let value = ctx.get_var(name.trim()).unwrap_or_default();
                out.push_str(&value.to_string());
                i = close + 1;
                continue;
            }
        }
        if c == buf {
            let len = chars[i + 1..]
                .iter()
                .take_while(|&&c| is_buffer_name_char(c))
                .count();
            if len > 0 {
                let name: String = chars[i + 1..i + 1 + len].iter().collect();
                if let Some(text) = ctx.buffer_text(&name) {
                    out.push_str(&text);
                    i += 1 + len;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Index of the `)` closing the `(` at `open`, honouring nesting.
fn matching_paren(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, &c) in chars.iter().enumerate().skip(open) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::Value;
    use std::collections::HashMap;

    struct Ctx {
        profile: SigilProfile,
        vars: HashMap<String, Value>,
        buffers: HashMap<String, Vec<String>>,
    }

    impl Ctx {
        fn new(profile: SigilProfile) -> Self {
            Ctx {
                profile,
                vars: HashMap::new(),
                buffers: HashMap::new(),
            }
        }
        fn var(mut self, k: &str, v: impl Into<Value>) -> Self {
            self.vars.insert(k.into(), v.into());
            self
        }
        fn buffer(mut self, k: &str, lines: &[&str]) -> Self {
            self.buffers
                .insert(k.into(), lines.iter().map(|&s| s.to_owned()).collect());
            self
        }
    }

    impl EvalContext for Ctx {
        fn get_var(&self, name: &str) -> Option<Value> {
            self.vars.get(name).cloned()
        }
        fn buffer_text(&self, name: &str) -> Option<String> {
            self.buffers.get(name).map(|l| l.join("\n"))
        }
        fn sigils(&self) -> SigilProfile {
            self.profile
        }
    }

    #[test]
    fn dollar_variables() {
        let ctx = Ctx::new(SigilProfile::Dollar).var("name", "World").var("n", 3i64);
        assert_eq!(interpolate("Hello $(name) x$(n)", &ctx), "Hello World x3");
        assert_eq!(interpolate("cost: $$5", &ctx), "cost: $5");
        assert_eq!(interpolate("unbound [$(nope)]", &ctx), "unbound []");
    }

    #[test]
    fn nested_names() {
        let ctx = Ctx::new(SigilProfile::Dollar).var("i", 2i64).var("arg2", "second");
        assert_eq!(interpolate("$(arg$(i))", &ctx), "second");
    }

    #[test]
    fn values_not_reexpanded() {
        let ctx = Ctx::new(SigilProfile::Dollar).var("a", "$(b)").var("b", "no");
        assert_eq!(interpolate("$(a)", &ctx), "$(b)");
    }

    #[test]
    fn buffers_expand_only_when_present() {
        let ctx = Ctx::new(SigilProfile::Dollar).buffer("data", &["a", "b"]);
        assert_eq!(interpolate("[~data]", &ctx), "[a\nb]");
        assert_eq!(interpolate("~/home ~missing", &ctx), "~/home ~missing");
    }

    #[test]
    fn bang_profile() {
        let ctx = Ctx::new(SigilProfile::Bang)
            .var("x", "1")
            .buffer("b", &["line"]);
        assert_eq!(interpolate("!(x) !b !! $(x)", &ctx), "1 line ! $(x)");
        assert_eq!(interpolate("Hello!", &ctx), "Hello!");
    }

    #[test]
    fn unterminated_reference_is_literal() {
        let ctx = Ctx::new(SigilProfile::Dollar).var("x", "1");
        assert_eq!(interpolate("$(x", &ctx), "$(x");
    }

    #[test]
    fn pattern_escapes_stay_literal() {
        let ctx = Ctx::new(SigilProfile::Dollar).var("x", "bc").var("d", "7");
        assert_eq!(interpolate_pattern("a$(x)$", &ctx), "abc$");
        assert_eq!(interpolate_pattern(r"\$(\d+) $(d)", &ctx), r"\$(\d+) 7");
        assert_eq!(interpolate_pattern(r"a\\$(x)", &ctx), r"a\\bc");
    }

    #[test]
    fn profile_parsing() {
        assert_eq!("bang".parse::<SigilProfile>(), Ok(SigilProfile::Bang));
        assert_eq!("Dollar".parse::<SigilProfile>(), Ok(SigilProfile::Dollar));
        assert!("hash".parse::<SigilProfile>().is_err());
        assert_eq!(SigilProfile::Bang.buffer_ref("!data"), Some("data"));
        assert_eq!(SigilProfile::Dollar.buffer_ref("~"), None);
        assert_eq!(SigilProfile::Dollar.buffer_ref("data"), None);
        assert!(is_ident("__start") && is_ident("x1"));
        assert!(!is_ident("1x") && !is_ident("a.b") && !is_ident(""));
    }
}
