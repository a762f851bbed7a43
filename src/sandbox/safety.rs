//! Static rejection of obviously hostile program text.
//!
//! This runs before any isolate is built. It is deliberately textual: it
//! cannot prove a program safe, it only refuses the constructs that have no
//! business in a data-collection program.

use once_cell::sync::Lazy;
use regex::Regex;

struct Rule {
    name: &'static str,
    reason: &'static str,
    pattern: Regex,
}

fn rule(name: &'static str, reason: &'static str, pattern: &str) -> Rule {
    Rule {
        name,
        reason,
        pattern: Regex::new(pattern).expect("safety rule regex"),
    }
}

/// Ordered; the first matching rule wins.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        rule(
            "require",
            "dynamic module loading via require() is not allowed",
            r"\brequire\s*\(",
        ),
        rule(
            "dynamic-import",
            "dynamic module loading via import() is not allowed",
            r"\bimport\s*\(",
        ),
        rule(
            "process",
            "access to the process object is not allowed",
            r"\bprocess\s*(?:\.|\[)",
        ),
        rule(
            "child-process",
            "child_process is not allowed",
            r"\bchild_process\b",
        ),
        rule(
            "deno",
            "access to the Deno namespace is not allowed",
            r"\bDeno\s*(?:\.|\[)",
        ),
        rule("eval", "eval() is not allowed", r"\beval\s*\("),
        rule(
            "function-constructor",
            "constructing functions from strings is not allowed",
            r"\bFunction\s*\(",
        ),
        rule(
            "constructor-chain",
            "reaching the Function constructor through .constructor is not allowed",
            r"\.\s*constructor\s*(?:\.|\[)\s*['\x22]?constructor",
        ),
        rule(
            "constructor-call",
            "calling a .constructor with source text is not allowed",
            r"\.\s*constructor\s*\(\s*['\x22\x60]",
        ),
        rule(
            "spawn",
            "process spawning primitives are not allowed",
            r"(?:^|[^.\w$])(?:exec|execSync|execFile|execFileSync|spawn|spawnSync|fork)\s*\(",
        ),
        rule(
            "global-this",
            "direct access to globalThis is not allowed",
            r"\bglobalThis\s*(?:\.|\[)",
        ),
        rule(
            "global",
            "direct access to the global object is not allowed",
            r"(?:^|[^.\w$])global\s*(?:\.|\[)",
        ),
    ]
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyViolation {
    pub rule: &'static str,
    pub reason: &'static str,
    pub snippet: String,
}

impl std::fmt::Display for SafetyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (found `{}`)", self.reason, self.snippet)
    }
}

/// Scan the program against the forbidden-pattern list.
pub fn check(program: &str) -> Result<(), SafetyViolation> {
    for rule in RULES.iter() {
        if let Some(found) = rule.pattern.find(program) {
            return Err(SafetyViolation {
                rule: rule.name,
                reason: rule.reason,
                snippet: found.as_str().trim().to_string(),
            });
        }
    }
    Ok(())
}
