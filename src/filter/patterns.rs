//! Built-in prompt, noise and escape patterns.

/// Idle prompt: a bare `>` or a mode-prefixed one such as `architect>`.
pub const DEFAULT_PROMPT_PATTERN: &str = r"^(>|\w+>)\s*$";

/// Startup banner and status lines printed by the assistant.
pub const DEFAULT_NOISE_PATTERNS: &[&str] = &[
    r"^Aider v\d+(\.\d+)*",
    r"^Model: .* with .* edit format",
    r"^(Main|Editor|Weak) model: ",
    r"infinite output",
    r"^Git repo: ",
    r"^Repo-map: ",
    r"^Note: in-chat filenames are always relative to the git working dir, not the",
    r"^current working dir\.$",
    r"^Cur working dir: ",
    r"^Git working dir: ",
    r"^Use /help <question> for help",
    r"^[─━-]{10,}$",
];

/// CSI, OSC and two-byte escapes, then any stray C0 control except tab.
pub const ESCAPE_PATTERN: &str =
    r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]|[\x00-\x08\x0b-\x1f\x7f]";
