//! Compiled regex tables for command classification and payload parsing.
//!
//! These are data, not control flow: the classifier walks the tables in
//! order, so rules can be extended or unit-tested without touching the
//! state machine. All patterns are compiled once on first use.

use crate::types::Category;
use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Category Rules (ordered, first match wins)
// ═══════════════════════════════════════════════════════════════════════════════

pub static CATEGORY_RULES: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    vec![
        (
            Category::Build,
            Regex::new(r"(?i)^(npm|yarn|pnpm|make|cargo|go)\s+(run\s+)?(build|compile)").unwrap(),
        ),
        (
            Category::Test,
            Regex::new(r"(?i)^(npm|yarn|jest|mocha|pytest|cargo|go)\s+(run\s+)?(test|spec)")
                .unwrap(),
        ),
        (
            Category::Deploy,
            Regex::new(r"(?i)^(deploy|push|publish|release)").unwrap(),
        ),
        (Category::VersionControl, Regex::new(r"(?i)^git\s+").unwrap()),
        (
            Category::FileSystem,
            Regex::new(r"(?i)^(ls|cd|mkdir|rm|cp|mv|find|grep|cat|echo|touch)\b").unwrap(),
        ),
        (
            Category::System,
            Regex::new(r"(?i)^(ps|top|kill|df|du|free|systemctl|service)\b").unwrap(),
        ),
        (
            Category::Install,
            Regex::new(r"(?i)^(npm|yarn|pnpm|pip|gem|apt|brew|cargo)\s+(install|add|i)\b")
                .unwrap(),
        ),
        (
            Category::ToolSpecific,
            Regex::new(r"(?i)^(termlens|\./termlens|\.\./.*termlens)").unwrap(),
        ),
    ]
});

// ═══════════════════════════════════════════════════════════════════════════════
// Sensitivity Rules (dangerous checked first, short-circuits)
// ═══════════════════════════════════════════════════════════════════════════════

pub static DANGEROUS_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Anchored to the filesystem root: `rm -rf /` (with or without
        // trailing flags) is dangerous, `rm -rf /tmp/foo` is not.
        Regex::new(r"rm\s+-rf\s+/(\s|$)").unwrap(),
        // Fork bomb shape.
        Regex::new(r":\(\)\{ :\|:& \};:").unwrap(),
        // Raw writes onto block devices.
        Regex::new(r"dd\s+if=.*of=/dev/").unwrap(),
        Regex::new(r"\bmkfs").unwrap(),
        Regex::new(r">\s*/dev/sd[a-z]").unwrap(),
    ]
});

pub static SENSITIVE_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)password|passwd|token|secret|key|credential").unwrap(),
        Regex::new(r"\bssh\s").unwrap(),
        Regex::new(r"\bsudo\s").unwrap(),
        Regex::new(r"chmod\s+777").unwrap(),
        // curl uploading data somewhere.
        Regex::new(r"curl.*(\s-d\b|--data)").unwrap(),
    ]
});

// ═══════════════════════════════════════════════════════════════════════════════
// Payload Shapes
// ═══════════════════════════════════════════════════════════════════════════════

/// Shell prompt prefix: anything up through a trailing `$`, `#`, `%`, or
/// `>` followed by whitespace. The capture is the command text.
pub static RE_PROMPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:.*?[$#%>]\s+)(.*)$").unwrap());

/// `file://host/path` working-directory payloads (OSC 7).
pub static RE_FILE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^file://[^/]*(/.*)$").unwrap());

/// Generic `key=value` extension payloads (OSC 633).
pub static RE_KEY_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^=]+)=(.*)$").unwrap());

/// The one observed mis-decoding produced runs of kana or replacement
/// characters; recovered text containing them is treated as garbage. This
/// is a known-narrow detector, not a general mojibake check.
pub static RE_GARBLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x{3040}-\x{30FF}\x{FFFD}]").unwrap());
