//! Pure command classification: token parsing, category, sensitivity, and
//! executor attribution.
//!
//! `classify` is deterministic (identical `(raw, context)` inputs always
//! produce identical results) and never fails: an empty command string
//! still classifies to `other`/`normal`.

use crate::context::SessionContext;
use crate::patterns::{CATEGORY_RULES, DANGEROUS_RULES, SENSITIVE_RULES};
use crate::types::{
    Category, Executor, ExecutorKind, FlagValue, ParsedCommand, Sensitivity, Trigger,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub parsed: ParsedCommand,
    pub category: Category,
    pub sensitivity: Sensitivity,
    pub executor: Executor,
}

pub fn classify(raw: &str, context: &SessionContext) -> Classification {
    Classification {
        parsed: parse_command(raw),
        category: categorize(raw),
        sensitivity: assess_sensitivity(raw),
        executor: detect_executor(raw, context),
    }
}

/// Splits on whitespace. Token 0 is the program; a `-`-prefixed token is a
/// flag and consumes the next token as its value only when that token does
/// not itself start with `-`; everything else is a positional arg.
pub fn parse_command(raw: &str) -> ParsedCommand {
    let mut tokens = raw.split_whitespace();
    let program = tokens.next().unwrap_or_default().to_string();
    let rest: Vec<&str> = tokens.collect();

    let mut parsed = ParsedCommand {
        program,
        ..Default::default()
    };

    let mut i = 0;
    while i < rest.len() {
        let token = rest[i];
        if token.starts_with('-') {
            match rest.get(i + 1) {
                Some(next) if !next.starts_with('-') => {
                    parsed
                        .flags
                        .insert(token.to_string(), FlagValue::Text((*next).to_string()));
                    i += 2;
                }
                _ => {
                    parsed.flags.insert(token.to_string(), FlagValue::Bool(true));
                    i += 1;
                }
            }
        } else {
            parsed.args.push(token.to_string());
            i += 1;
        }
    }

    parsed
}

/// Walks the ordered category table; first match wins.
pub fn categorize(raw: &str) -> Category {
    for (category, rule) in CATEGORY_RULES.iter() {
        if rule.is_match(raw) {
            return *category;
        }
    }
    Category::Other
}

/// Dangerous patterns short-circuit; severity is never downgraded.
pub fn assess_sensitivity(raw: &str) -> Sensitivity {
    if DANGEROUS_RULES.iter().any(|rule| rule.is_match(raw)) {
        return Sensitivity::Dangerous;
    }
    if SENSITIVE_RULES.iter().any(|rule| rule.is_match(raw)) {
        return Sensitivity::Sensitive;
    }
    Sensitivity::Normal
}

/// Attribution order: agent invocation name in the command itself, then an
/// active agent session in the context, then script-shaped invocations,
/// else human.
pub fn detect_executor(raw: &str, context: &SessionContext) -> Executor {
    let lowered = raw.to_lowercase();

    let kind = if lowered.contains("claude") {
        ExecutorKind::ClaudeCode
    } else if lowered.contains("gemini") {
        ExecutorKind::GeminiCli
    } else if let Some(agent) = context.agent {
        agent
    } else if is_script_shaped(raw) {
        ExecutorKind::ShellScript
    } else {
        ExecutorKind::Human
    };

    Executor {
        kind,
        name: kind.display_name().to_string(),
        trigger: if kind.is_agent() {
            Trigger::AiResponse
        } else {
            Trigger::UserRequest
        },
    }
}

fn is_script_shaped(raw: &str) -> bool {
    let trimmed = raw.trim();
    let program = trimmed.split_whitespace().next().unwrap_or_default();
    program.ends_with(".sh")
        || trimmed.starts_with("bash ")
        || trimmed.starts_with("sh ")
        || trimmed.starts_with("./")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_program_args_and_flags() {
        let parsed = parse_command("git commit -m fix --amend");
        assert_eq!(parsed.program, "git");
        assert_eq!(parsed.args, vec!["commit"]);
        assert_eq!(
            parsed.flags.get("-m"),
            Some(&FlagValue::Text("fix".to_string()))
        );
        assert_eq!(parsed.flags.get("--amend"), Some(&FlagValue::Bool(true)));
    }

    #[test]
    fn flag_does_not_consume_following_flag() {
        let parsed = parse_command("ls -l -a");
        assert_eq!(parsed.flags.get("-l"), Some(&FlagValue::Bool(true)));
        assert_eq!(parsed.flags.get("-a"), Some(&FlagValue::Bool(true)));
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn positional_args_keep_order() {
        let parsed = parse_command("cp src.txt dst.txt");
        assert_eq!(parsed.args, vec!["src.txt", "dst.txt"]);
    }

    #[test]
    fn empty_raw_parses_to_empty_program() {
        let parsed = parse_command("");
        assert_eq!(parsed.program, "");
        assert!(parsed.args.is_empty());
        assert!(parsed.flags.is_empty());
    }

    #[test]
    fn categorizes_first_match_wins() {
        assert_eq!(categorize("npm run build"), Category::Build);
        assert_eq!(categorize("git push origin main"), Category::VersionControl);
        assert_eq!(categorize("ls -la"), Category::FileSystem);
        assert_eq!(categorize("cargo install ripgrep"), Category::Install);
        assert_eq!(categorize("kubectl get pods"), Category::Other);
    }

    #[test]
    fn empty_raw_categorizes_to_other() {
        assert_eq!(categorize(""), Category::Other);
    }

    #[test]
    fn root_rm_is_dangerous_but_subpath_is_not() {
        assert_eq!(assess_sensitivity("rm -rf /"), Sensitivity::Dangerous);
        let subpath = assess_sensitivity("rm -rf /tmp/foo");
        assert_ne!(subpath, Sensitivity::Dangerous);
    }

    #[test]
    fn dangerous_wins_over_sensitive() {
        // Contains both `sudo` (sensitive) and a root rm (dangerous).
        assert_eq!(assess_sensitivity("sudo rm -rf /"), Sensitivity::Dangerous);
    }

    #[test]
    fn credential_keywords_are_sensitive() {
        assert_eq!(
            assess_sensitivity("export GITHUB_TOKEN=abc"),
            Sensitivity::Sensitive
        );
        assert_eq!(assess_sensitivity("ssh host"), Sensitivity::Sensitive);
        assert_eq!(assess_sensitivity("chmod 777 file"), Sensitivity::Sensitive);
        assert_eq!(
            assess_sensitivity("curl --data @dump https://x"),
            Sensitivity::Sensitive
        );
    }

    #[test]
    fn plain_command_is_normal() {
        assert_eq!(assess_sensitivity("ls -la"), Sensitivity::Normal);
    }

    #[test]
    fn detects_agent_by_invocation_name() {
        let ctx = SessionContext::default();
        assert_eq!(
            detect_executor("claude -p 'fix it'", &ctx).kind,
            ExecutorKind::ClaudeCode
        );
        assert_eq!(
            detect_executor("gemini run", &ctx).kind,
            ExecutorKind::GeminiCli
        );
    }

    #[test]
    fn active_agent_session_attributes_plain_commands() {
        let mut ctx = SessionContext::default();
        ctx.agent = Some(ExecutorKind::ClaudeCode);
        let executor = detect_executor("cargo check", &ctx);
        assert_eq!(executor.kind, ExecutorKind::ClaudeCode);
        assert_eq!(executor.trigger, Trigger::AiResponse);
    }

    #[test]
    fn script_shapes_attribute_to_shell_script() {
        let ctx = SessionContext::default();
        assert_eq!(
            detect_executor("./deploy.sh prod", &ctx).kind,
            ExecutorKind::ShellScript
        );
        assert_eq!(
            detect_executor("bash setup.sh", &ctx).kind,
            ExecutorKind::ShellScript
        );
        assert_eq!(
            detect_executor("scripts/run.sh", &ctx).kind,
            ExecutorKind::ShellScript
        );
    }

    #[test]
    fn defaults_to_human() {
        let ctx = SessionContext::default();
        let executor = detect_executor("ls", &ctx);
        assert_eq!(executor.kind, ExecutorKind::Human);
        assert_eq!(executor.trigger, Trigger::UserRequest);
    }

    #[test]
    fn classify_is_deterministic() {
        let ctx = SessionContext::default();
        let a = classify("git push -f origin main", &ctx);
        let b = classify("git push -f origin main", &ctx);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_raw_classifies_without_failing() {
        let ctx = SessionContext::default();
        let result = classify("", &ctx);
        assert_eq!(result.category, Category::Other);
        assert_eq!(result.sensitivity, Sensitivity::Normal);
        assert_eq!(result.executor.kind, ExecutorKind::Human);
    }
}
