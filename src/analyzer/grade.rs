use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use super::normalize::normalize_reason;
use super::{RecordInfo, UNROUTEABLE_STRING};

const MAIL_FORMAT_ERROR_TTL: Duration = Duration::ZERO;
const DNS_ERROR_TTL: Duration = Duration::ZERO;
const ICLOUD_FULL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const ICLOUD_BAN_TTL: Duration = Duration::ZERO;
const RATE_LIMIT_ERROR_TTL: Duration = Duration::ZERO;
const SPAM_BLOCK_ERROR_TTL: Duration = Duration::ZERO;
const OVER_QUOTA_ERROR_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DISABLED_ERROR_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);
const NO_SUCH_USER_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
const NO_SUCH_DOMAIN_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

const LINE_LENGTH_STRINGS: [&str; 2] = ["line length exceeded", "line too long"];
const LACK_DNS_STRINGS: [&str; 4] = ["mx record", " dkim", " spf ", "find your"];

static PROOFPOINT_REGEXES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^.+ipcheck\.proofpoint\.com.+$"]));

static RATE_LIMIT_REGEXES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^.*too many.*$", r"^.*rate.*$"]));

static SPAM_BLOCK_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^.+(spam|dnsbl|abus|reputat|policy|blacklis|securit|tenantattribution|banned|complain|outside|prohibit|rdeny|allow|aiuthentic|permiso).+$",
        r"^.+sender.+denied.*$",
        r"^.*relay access denied.*$",
        r"^.*service refuse.*$",
        r"^.*rejected by recipient.*$",
        r"^not$",
    ])
});

static OVER_QUOTA_REGEXES: LazyLock<Vec<Regex>> =
    LazyLock::new(|| compile(&[r"^.*quota.*$", r"^.*mailbox.+limit.*$"]));

static DISABLED_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[r"^.*(inactive|blocked|expired|suspend|frozen|disabled|locked|enable).*$"])
});

// The bare `not` catch-all is the broadest pattern of the table, which is
// why this bucket is evaluated last.
static ABSENT_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"^.*(invalid|unknown|rejected|bad|unavailable).*$",
        r"^.*(no such).*$",
        r"^.*not.*$",
        r"^.*no mailbox.*$",
        r"^.*no longer available.*$",
        r"^.*unrouteable address.*$",
        r"^.*delivery error dd.*$",
        r"^.*server disconnected.*$",
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("hard-coded pattern"))
        .collect()
}

/// Maps a classified bounce record to a suppression TTL. A zero duration
/// means "do not suppress, retry normally".
pub fn determine_ttl(record: &RecordInfo) -> Duration {
    // The raw unrouteable literal means the destination domain does not
    // exist at all; it bypasses every text heuristic.
    if record.reason == UNROUTEABLE_STRING {
        return NO_SUCH_DOMAIN_TTL;
    }

    last_hope_determine(record)
}

// Structured code+status checks run before the free-text heuristics; the
// text buckets go from the narrowest failure class to the broadest
// catch-all, and the first match wins.
fn last_hope_determine(record: &RecordInfo) -> Duration {
    if failed_spam_delivery(record) {
        return SPAM_BLOCK_ERROR_TTL;
    }

    let reason = normalize_reason(&record.reason);

    if icloud_overquota(&reason, record) {
        ICLOUD_FULL_TTL
    } else if contains_any(&reason, &LINE_LENGTH_STRINGS) {
        MAIL_FORMAT_ERROR_TTL
    } else if contains_any(&reason, &LACK_DNS_STRINGS) {
        DNS_ERROR_TTL
    } else if matches_any(&reason, &PROOFPOINT_REGEXES) {
        ICLOUD_BAN_TTL
    } else if matches_any(&reason, &RATE_LIMIT_REGEXES) {
        RATE_LIMIT_ERROR_TTL
    } else if matches_any(&reason, &SPAM_BLOCK_REGEXES) {
        SPAM_BLOCK_ERROR_TTL
    } else if matches_any(&reason, &OVER_QUOTA_REGEXES) {
        OVER_QUOTA_ERROR_TTL
    } else if matches_any(&reason, &DISABLED_REGEXES) {
        DISABLED_ERROR_TTL
    } else if matches_any(&reason, &ABSENT_REGEXES) {
        NO_SUCH_USER_TTL
    } else {
        Duration::ZERO
    }
}

// yandex.ru answers 451 4.7.1 on spam blocks.
fn failed_spam_delivery(record: &RecordInfo) -> bool {
    record.smtp_code == 451 && record.smtp_status == "4.7.1"
}

fn icloud_overquota(reason: &str, record: &RecordInfo) -> bool {
    (record.domain == "icloud.com" || record.domain == "me.com")
        && record.smtp_code == 450
        && record.smtp_status == "4.2.2"
        && reason.contains("overquota")
}

fn contains_any(s: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| s.contains(needle))
}

fn matches_any(s: &str, regexes: &[Regex]) -> bool {
    regexes.iter().any(|re| re.is_match(s))
}
