//! Source rewrites applied to a program before it is analyzed and run.
//!
//! Programs are written by a generator that likes ES module syntax and is
//! careless with slashes inside regex literals. The isolate evaluates plain
//! scripts, so exports are folded into ordinary declarations and unescaped
//! slashes inside regex bodies are wrapped in a character class.

use once_cell::sync::Lazy;
use regex::Regex;

/// Global that a default export is bound to.
pub const DEFAULT_EXPORT: &str = "__default_export";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("export rule regex")
}

static EXPORT_DEFAULT_NAMED: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?m)^([ \t]*)export\s+default\s+((?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)|class\s+([A-Za-z_$][\w$]*))",
    )
});
static EXPORT_DEFAULT: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^([ \t]*)export\s+default\s+"));
static EXPORT_LIST: Lazy<Regex> = Lazy::new(|| {
    compile(r#"(?m)^([ \t]*)export\s*(\{[^}]*\})\s*(from\s*['"][^'"\n]*['"])?[ \t]*;?"#)
});
static AS_DEFAULT: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|[{,\s])([A-Za-z_$][\w$]*)\s+as\s+default\b"));
static EXPORT_STAR: Lazy<Regex> =
    Lazy::new(|| compile(r#"(?m)^([ \t]*)export\s*\*\s*(?:as\s+[\w$]+\s+)?from\s*['"][^'"\n]*['"][ \t]*;?"#));
static EXPORT_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?m)^([ \t]*)export\s+((?:async\s+)?function\b|const\b|let\b|var\b|class\b)")
});
static MODULE_EXPORTS: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^([ \t]*)module\.exports\s*="));
static NAMED_EXPORTS: Lazy<Regex> =
    Lazy::new(|| compile(r"(?m)^([ \t]*)exports\.([A-Za-z_$][\w$]*)\s*="));

/// Full pipeline: export folding, then regex slash repair. Idempotent.
pub fn normalize(program: &str) -> String {
    repair_regex_slashes(&normalize_exports(program))
}

/// Rewrite module export syntax into script declarations.
pub fn normalize_exports(program: &str) -> String {
    let mut default_names = Vec::new();
    for caps in EXPORT_DEFAULT_NAMED.captures_iter(program) {
        if let Some(name) = caps.get(3).or_else(|| caps.get(4)) {
            default_names.push(name.as_str().to_string());
        }
    }

    let text = EXPORT_DEFAULT_NAMED.replace_all(program, "${1}${2}");
    let text = EXPORT_DEFAULT.replace_all(&text, "${1}var __default_export = ");
    let text = EXPORT_LIST.replace_all(&text, |caps: &regex::Captures<'_>| {
        if caps.get(3).is_none() {
            if let Some(local) = AS_DEFAULT.captures(&caps[2]) {
                default_names.push(local[1].to_string());
            }
        }
        caps[1].to_string()
    });
    let text = EXPORT_STAR.replace_all(&text, "${1}");
    let text = EXPORT_DECLARATION.replace_all(&text, "${1}${2}");
    let text = MODULE_EXPORTS.replace_all(&text, "${1}var __default_export =");
    let text = NAMED_EXPORTS.replace_all(&text, "${1}var ${2} =");

    let mut text = text.into_owned();
    if let Some(name) = default_names.last() {
        text.push_str(&format!("\nvar {DEFAULT_EXPORT} = {name};\n"));
    }
    text
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Start,
    Punct,
    Dot,
    Keyword,
    Value,
    Close,
}

impl Token {
    fn allows_regex(self) -> bool {
        matches!(self, Token::Start | Token::Punct | Token::Keyword)
    }
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Template,
    Interpolation { depth: usize },
}

/// Keywords after which a `/` starts a regex rather than a division.
const EXPRESSION_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

const REGEX_FLAGS: &str = "dgimsuyv";
const REGEX_TERMINATORS: &str = ")]},;.:?|&!=+-*%<>^";
/// Words that may follow a regex literal on the same line.
const REGEX_FOLLOWING_WORDS: &[&str] = &["in", "instanceof", "of"];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Wrap unescaped `/` inside regex literal bodies in `[...]`.
///
/// Strings, comments and template text are copied untouched. A regex body
/// is bounded by its line; the closing slash is the first candidate that is
/// followed by flags and then something that can legally follow a regex.
pub fn repair_regex_slashes(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len() + 16);
    let mut frames: Vec<Frame> = Vec::new();
    let mut last = Token::Start;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if let Some(Frame::Template) = frames.last() {
            match c {
                '\\' => {
                    out.push(c);
                    if let Some(n) = next {
                        out.push(n);
                    }
                    i += 2;
                }
                '`' => {
                    out.push(c);
                    frames.pop();
                    last = Token::Value;
                    i += 1;
                }
                '$' if next == Some('{') => {
                    out.push_str("${");
                    frames.push(Frame::Interpolation { depth: 0 });
                    last = Token::Start;
                    i += 2;
                }
                _ => {
                    out.push(c);
                    i += 1;
                }
            }
            continue;
        }

        match c {
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            '/' if next == Some('/') => {
                let end = line_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '/' if next == Some('*') => {
                let mut end = i + 2;
                while end < chars.len() && !(chars[end] == '*' && chars.get(end + 1) == Some(&'/')) {
                    end += 1;
                }
                let end = (end + 2).min(chars.len());
                out.extend(&chars[i..end]);
                i = end;
            }
            '\'' | '"' => {
                let end = string_end(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
                last = Token::Value;
            }
            '`' => {
                out.push(c);
                frames.push(Frame::Template);
                i += 1;
            }
            '{' => {
                if let Some(Frame::Interpolation { depth }) = frames.last_mut() {
                    *depth += 1;
                }
                out.push(c);
                last = Token::Punct;
                i += 1;
            }
            '}' => {
                out.push(c);
                i += 1;
                match frames.last_mut() {
                    Some(Frame::Interpolation { depth }) if *depth == 0 => {
                        frames.pop();
                    }
                    Some(Frame::Interpolation { depth }) => *depth -= 1,
                    _ => {}
                }
                last = Token::Punct;
            }
            ')' | ']' => {
                out.push(c);
                last = Token::Close;
                i += 1;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                out.push(c);
                last = Token::Dot;
                i += 1;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_part(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                last = if last != Token::Dot && EXPRESSION_KEYWORDS.contains(&word.as_str()) {
                    Token::Keyword
                } else {
                    Token::Value
                };
                out.push_str(&word);
            }
            c if c.is_ascii_digit() || c == '.' => {
                while i < chars.len() && (is_ident_part(chars[i]) || chars[i] == '.') {
                    out.push(chars[i]);
                    i += 1;
                }
                last = Token::Value;
            }
            '+' | '-' if next == Some(c) => {
                out.push(c);
                out.push(c);
                last = Token::Value;
                i += 2;
            }
            '/' if last.allows_regex() => {
                i = copy_regex(&chars, i, &mut out);
                last = Token::Value;
            }
            _ => {
                out.push(c);
                last = Token::Punct;
                i += 1;
            }
        }
    }

    out
}

fn line_end(chars: &[char], from: usize) -> usize {
    chars[from..]
        .iter()
        .position(|&c| c == '\n')
        .map_or(chars.len(), |p| from + p)
}

fn string_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Copies a regex literal starting at `start` (the opening slash) and
/// returns the index just past its closing slash.
fn copy_regex(chars: &[char], start: usize, out: &mut String) -> usize {
    let end = line_end(chars, start);

    let mut candidates = Vec::new();
    let mut in_class = false;
    let mut i = start + 1;
    while i < end {
        match chars[i] {
            '\\' => {
                i += 2;
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '/' if !in_class => candidates.push(i),
            _ => {}
        }
        i += 1;
    }

    let Some(&first) = candidates.first() else {
        out.extend(&chars[start..end]);
        return end;
    };

    let close = candidates
        .iter()
        .copied()
        .find(|&candidate| closes_regex(chars, candidate, end))
        .unwrap_or(first);

    out.push('/');
    let mut in_class = false;
    let mut i = start + 1;
    while i < close {
        let c = chars[i];
        match c {
            '\\' => {
                out.push(c);
                if i + 1 < close {
                    out.push(chars[i + 1]);
                }
                i += 2;
                continue;
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '/' if !in_class => {
                out.push_str("[/]");
                i += 1;
                continue;
            }
            _ => {}
        }
        out.push(c);
        i += 1;
    }
    out.push('/');
    close + 1
}

fn closes_regex(chars: &[char], candidate: usize, end: usize) -> bool {
    let mut k = candidate + 1;
    while k < end && REGEX_FLAGS.contains(chars[k]) {
        k += 1;
    }
    if k < end && is_ident_part(chars[k]) {
        return false;
    }
    while k < end && chars[k].is_whitespace() {
        k += 1;
    }
    if k >= end || REGEX_TERMINATORS.contains(chars[k]) {
        return true;
    }

    let word: String = chars[k..end].iter().take_while(|&&c| is_ident_part(c)).collect();
    REGEX_FOLLOWING_WORDS.contains(&word.as_str())
}
