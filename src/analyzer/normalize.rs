use regex::Regex;
use std::sync::LazyLock;

// Suffix our own MTA appends to every timed-out delivery.
const LOCAL_MTA_SUFFIX: &str = "retry timeout exceeded";
const BOGUS_SYMBOLS: [char; 4] = ['\'', '"', ',', ':'];

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<?\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b>?").expect("hard-coded pattern")
});
static BOGUS_STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d\.\d\.\d+)").expect("hard-coded pattern"));
static SPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("hard-coded pattern"));

/// Canonicalizes a raw diagnostic reason for rule matching: message-specific
/// noise (quoting, embedded addresses, status-code decorations, our MTA's
/// trailing boilerplate) would otherwise defeat the pattern tables.
///
/// The transforms are destructive and order-dependent. Total over any input
/// and idempotent.
pub fn normalize_reason(reason: &str) -> String {
    let mut reason = reason.trim().to_lowercase();

    if let Some(stripped) = reason.strip_suffix(LOCAL_MTA_SUFFIX) {
        reason = stripped.to_string();
    }

    reason.retain(|c| !BOGUS_SYMBOLS.contains(&c));

    let reason = EMAIL_REGEX.replace_all(&reason, "");
    let reason = reason.replace('-', " ");
    let reason = SPACE_REGEX.replace_all(&reason, " ");
    let reason = BOGUS_STATUS_REGEX.replace_all(&reason, "$1");

    reason.trim().to_string()
}
