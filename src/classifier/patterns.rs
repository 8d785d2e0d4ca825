//! # Signature Sets
//!
//! The fixed pattern tables behind the signature detectors: SQL injection,
//! cross-site scripting, command injection, directory traversal, and
//! offensive-tooling user agents.
//!
//! All patterns are matched case-insensitively. Each set reports only its
//! first matching pattern per input - one finding per category per request,
//! with the raw pattern carried as evidence.
//!
//! There is exactly one authoritative copy of these tables; both the
//! per-request analyzer and the periodic sweep go through this module, so
//! the pattern sets cannot diverge.

use regex::{Regex, RegexBuilder};

use crate::{VigilError, VigilResult};

/// SQL injection signatures: quote/comment markers, boolean tautologies,
/// UNION and stored-procedure abuse, schema discovery, destructive
/// statements, and time-delay payloads.
pub const SQL_INJECTION: &[&str] = &[
    "(%27)|(')|(--)|(%23)|(#)",
    "((%3d)|(=))[^\n]*((%27)|(')|(--)|(%3b)|(;))",
    "\\w*((%27)|('))((%6f)|o|(%4f))((%72)|r|(%52))",
    "((%27)|('))union",
    "exec(\\s|\\+)+(s|x)p\\w+",
    "select.*from.*information_schema",
    "insert\\s+into.*values",
    "drop\\s+(table|database)",
    "update.*set.*=",
    "delete\\s+from",
    "(sleep|benchmark|waitfor)\\s*\\(",
];

/// Cross-site scripting signatures: script/iframe/object injection,
/// javascript/vbscript protocols, inline event handlers, CSS expressions.
pub const XSS: &[&str] = &[
    "<script[^>]*>.*?</script>",
    "javascript:",
    "on\\w+\\s*=",
    "<iframe[^>]*>",
    "<object[^>]*>",
    "<embed[^>]*>",
    "<link[^>]*>",
    "<meta[^>]*>",
    "expression\\s*\\(",
    "vbscript:",
];

/// Command injection signatures: shell separators, command substitution,
/// and common tool/file-manipulation commands.
pub const COMMAND_INJECTION: &[&str] = &[
    "[;&|`]",
    "\\$\\([^)]*\\)",
    "`[^`]*`",
    "(nc|netcat|wget|curl|ping|nslookup)",
    "(cat|type|more|less)\\s+",
    "(rm|del|rmdir)\\s+",
];

/// Directory traversal signatures, plain and URL-encoded, both separators.
pub const DIRECTORY_TRAVERSAL: &[&str] = &[
    "\\.\\./",
    "\\.\\.\\\\",
    "%2e%2e%2f",
    "%2e%2e%5c",
    "\\.\\.%2f",
    "\\.\\.%5c",
];

/// Known offensive-tooling user-agent substrings.
pub const SUSPICIOUS_USER_AGENTS: &[&str] = &[
    "sqlmap", "nmap", "nikto", "burp", "w3af", "acunetix", "nessus", "openvas", "masscan",
    "zap",
];

/// A compiled, ordered set of case-insensitive signatures.
pub struct SignatureSet {
    patterns: Vec<(&'static str, Regex)>,
}

impl SignatureSet {
    /// Compile a pattern table. A pattern that fails to compile is a
    /// startup error, never a request-time one.
    pub fn compile(patterns: &[&'static str]) -> VigilResult<Self> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for &pattern in patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    VigilError::Config(format!("Bad signature pattern {:?}: {}", pattern, e))
                })?;
            compiled.push((pattern, regex));
        }
        Ok(Self { patterns: compiled })
    }

    /// Return the first pattern in declaration order that matches `text`.
    pub fn first_match(&self, text: &str) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|(_, regex)| regex.is_match(text))
            .map(|(pattern, _)| *pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_builtin_tables_compile() {
        for table in [SQL_INJECTION, XSS, COMMAND_INJECTION, DIRECTORY_TRAVERSAL] {
            assert!(SignatureSet::compile(table).is_ok());
        }
        assert!(SignatureSet::compile(SUSPICIOUS_USER_AGENTS).is_ok());
    }

    #[test]
    fn test_sql_tautology_matches() {
        let set = SignatureSet::compile(SQL_INJECTION).unwrap();
        assert!(set.first_match("' OR '1'='1").is_some());
        assert!(set.first_match("1; DROP TABLE users").is_some());
        assert!(set.first_match("select password from information_schema.tables").is_some());
        assert!(set.first_match("plain text with no quoting").is_none());
    }

    #[test]
    fn test_xss_script_tag_matches() {
        let set = SignatureSet::compile(XSS).unwrap();
        assert_eq!(
            set.first_match("<script>alert(1)</script>"),
            Some("<script[^>]*>.*?</script>")
        );
        assert!(set.first_match("<SCRIPT SRC=x></SCRIPT>").is_some());
        assert!(set.first_match("onerror=alert(1)").is_some());
        assert!(set.first_match("a perfectly ordinary sentence").is_none());
    }

    #[test]
    fn test_command_injection_separators() {
        let set = SignatureSet::compile(COMMAND_INJECTION).unwrap();
        assert!(set.first_match("x; rm -rf /").is_some());
        assert!(set.first_match("$(id)").is_some());
        assert!(set.first_match("`whoami`").is_some());
        assert!(set.first_match("hello world").is_none());
    }

    #[test]
    fn test_traversal_encodings() {
        let set = SignatureSet::compile(DIRECTORY_TRAVERSAL).unwrap();
        assert!(set.first_match("/files/../../etc/passwd").is_some());
        assert!(set.first_match("..\\..\\windows\\system32").is_some());
        assert!(set.first_match("%2e%2e%2fetc%2fpasswd").is_some());
        assert!(set.first_match("/files/report.pdf").is_none());
    }

    #[test]
    fn test_user_agent_tooling() {
        let set = SignatureSet::compile(SUSPICIOUS_USER_AGENTS).unwrap();
        assert!(set.first_match("sqlmap/1.7.2#stable").is_some());
        assert!(set.first_match("Mozilla/5.0 (Windows NT 10.0)").is_none());
    }

    #[test]
    fn test_first_match_respects_declaration_order() {
        let set = SignatureSet::compile(&["bbb", "aaa"]).unwrap();
        assert_eq!(set.first_match("aaa bbb"), Some("bbb"));
    }
}
