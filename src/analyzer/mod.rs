use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

mod grade;
mod normalize;

pub use grade::determine_ttl;

pub const STATUS_NOT_FOUND: &str = "0.0.0";
pub const UNKNOWN_REASON: &str = "Unable to find reason";

const BAD_EMAIL_ADDRESS_CODE: &str = "5.1.1";
const DIAG_CODE_HEADER: &str = "diagnostic-code:";
const SMTP_CODE_LENGTH: usize = 3;

const UNROUTEABLE_STRING: &str = "unrouteable address";
const NON_EXISTENT_STRING: &str = "all relevant mx records point to non-existent hosts";
const NON_EXIST_SMTP_STRING: &str = "an mx or srv record indicated no smtp service";

static STATUS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d\.\d\.\d+$").expect("hard-coded pattern"));

/// Failure signal pulled out of a bounce body: SMTP reply code, extended
/// status code and the free-text diagnostic reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceSignal {
    pub smtp_code: i32,
    pub smtp_status: String,
    pub reason: String,
}

impl Default for BounceSignal {
    fn default() -> Self {
        Self {
            smtp_code: 0,
            smtp_status: STATUS_NOT_FOUND.to_string(),
            reason: String::new(),
        }
    }
}

impl BounceSignal {
    fn unrouteable() -> Self {
        Self {
            smtp_code: 550,
            smtp_status: BAD_EMAIL_ADDRESS_CODE.to_string(),
            reason: UNROUTEABLE_STRING.to_string(),
        }
    }

    fn unknown() -> Self {
        Self {
            reason: UNKNOWN_REASON.to_string(),
            ..Self::default()
        }
    }
}

/// Record stored in the cache for every processed bounce, keyed by the
/// failed recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordInfo {
    pub domain: String,
    pub reason: String,
    pub reporter: String,
    #[serde(rename = "code")]
    pub smtp_code: i32,
    #[serde(rename = "status")]
    pub smtp_status: String,
    pub date: String,
}

#[derive(Debug, Error)]
enum DiagCodeError {
    #[error("unable to parse diagnostic code")]
    TooFewTokens,
}

/// Scans a bounce body for a failure signal. Malformed or missing
/// diagnostic data degrades to the "Unable to find reason" default,
/// never to an error.
pub fn analyze(body: &[u8]) -> BounceSignal {
    match find_bounce_message(body) {
        Some(signal) => signal,
        None => {
            debug!("no diagnostic signal found in body");
            BounceSignal::unknown()
        }
    }
}

// The Diagnostic-Code of interest sits near the end of a bounce body,
// after the quoted original message, and when several delivery attempts
// are quoted the most recent one is last. Scanning the case-folded
// lines in reverse finds it first.
fn find_bounce_message(body: &[u8]) -> Option<BounceSignal> {
    let body = String::from_utf8_lossy(body).to_lowercase();

    for line in body.split('\n').rev() {
        let line = line.trim();

        let parsed = line
            .strip_prefix(DIAG_CODE_HEADER)
            .map(|rest| parse_diag_code(rest.trim()));

        // A line that is exactly one of the unrouteable phrases wins over
        // a diagnostic-code parse of the same line; all three phrases
        // collapse to the single unrouteable reason.
        if line == UNROUTEABLE_STRING
            || line == NON_EXISTENT_STRING
            || line == NON_EXIST_SMTP_STRING
        {
            return Some(BounceSignal::unrouteable());
        }

        match parsed {
            Some(Ok(signal)) => return Some(signal),
            // A malformed diagnostic line aborts the whole scan.
            Some(Err(_)) => return None,
            None => {}
        }
    }

    None
}

/// Parses the text following a `diagnostic-code:` prefix, e.g.
/// `smtp; 550 5.1.1 user unknown` or the dashed `550-5.1.1 ...` form.
fn parse_diag_code(s: &str) -> Result<BounceSignal, DiagCodeError> {
    let s = s.strip_prefix("smtp;").unwrap_or(s).trim();
    let parts: Vec<&str> = s.split(' ').collect();

    if parts.len() < 2 {
        return Err(DiagCodeError::TooFewTokens);
    }

    let mut signal = BounceSignal::default();

    if parts[0].len() <= SMTP_CODE_LENGTH {
        signal.smtp_code = parse_code(parts[0]);

        if STATUS_REGEX.is_match(parts[1]) {
            signal.smtp_status = parts[1].to_string();
            signal.reason = parts[2..].join(" ");
        } else {
            signal.reason = parts[1..].join(" ");
        }
    } else {
        // Dashed form like `550-5.1.1`. When the part after the dash is
        // not a status code it is folded back into the reason text;
        // downstream rules expect that leftover token.
        let mut rest: Vec<&str> = parts[1..].to_vec();
        let dashed: Vec<&str> = parts[0].split('-').collect();

        if dashed.len() > 1 {
            signal.smtp_code = parse_code(dashed[0]);

            if STATUS_REGEX.is_match(dashed[1]) {
                signal.smtp_status = dashed[1].to_string();
            } else {
                rest.insert(0, dashed[1]);
            }
        }

        signal.reason = rest.join(" ");
    }

    Ok(signal)
}

fn parse_code(s: &str) -> i32 {
    s.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_diag_code_line() {
        let body = b"Diagnostic-Code: smtp; 550 5.1.1 User unknown";
        let signal = analyze(body);
        assert_eq!(signal.smtp_code, 550);
        assert_eq!(signal.smtp_status, "5.1.1");
        assert_eq!(signal.reason, "user unknown");
    }

    #[test]
    fn diag_code_without_status() {
        let signal = analyze(b"Diagnostic-Code: smtp; 550 mailbox is gone");
        assert_eq!(signal.smtp_code, 550);
        assert_eq!(signal.smtp_status, STATUS_NOT_FOUND);
        assert_eq!(signal.reason, "mailbox is gone");
    }

    #[test]
    fn dashed_code_with_status() {
        let signal = analyze(b"Diagnostic-Code: smtp; 550-5.1.1 no such user here");
        assert_eq!(signal.smtp_code, 550);
        assert_eq!(signal.smtp_status, "5.1.1");
        assert_eq!(signal.reason, "no such user here");
    }

    #[test]
    fn dashed_code_with_bogus_status_keeps_token() {
        // The part after the dash is not a status code, so it stays at the
        // front of the reason and the status remains the sentinel.
        let signal = analyze(b"Diagnostic-Code: smtp; 550-sorry no mailbox here");
        assert_eq!(signal.smtp_code, 550);
        assert_eq!(signal.smtp_status, STATUS_NOT_FOUND);
        assert_eq!(signal.reason, "sorry no mailbox here");
    }

    #[test]
    fn non_numeric_code_coerces_to_zero() {
        let signal = analyze(b"Diagnostic-Code: smtp; 5xx 5.1.1 user unknown");
        assert_eq!(signal.smtp_code, 0);
        assert_eq!(signal.smtp_status, "5.1.1");
        assert_eq!(signal.reason, "user unknown");
    }

    #[test]
    fn no_signal_yields_default() {
        let signal = analyze(b"This message was created automatically.\nNothing useful here.\n");
        assert_eq!(signal.smtp_code, 0);
        assert_eq!(signal.smtp_status, STATUS_NOT_FOUND);
        assert_eq!(signal.reason, UNKNOWN_REASON);
    }

    #[test]
    fn malformed_diag_line_aborts_scan() {
        // A single-token diagnostic code cannot be parsed; an earlier line
        // carrying a good one must not be picked up afterwards.
        let body = b"Diagnostic-Code: smtp; 550 5.1.1 user unknown\nDiagnostic-Code: broken\n";
        let signal = analyze(body);
        assert_eq!(signal.smtp_code, 0);
        assert_eq!(signal.reason, UNKNOWN_REASON);
    }

    #[test]
    fn last_diag_code_in_body_wins() {
        let body = b"Diagnostic-Code: smtp; 450 4.2.2 mailbox full\n\
            ...quoted earlier attempt...\n\
            Diagnostic-Code: smtp; 550 5.1.1 user unknown\n";
        let signal = analyze(body);
        assert_eq!(signal.smtp_code, 550);
        assert_eq!(signal.smtp_status, "5.1.1");
        assert_eq!(signal.reason, "user unknown");
    }

    #[test]
    fn unrouteable_phrases_unify() {
        for phrase in [
            "Unrouteable address",
            "all relevant MX records point to non-existent hosts",
            "an MX or SRV record indicated no SMTP service",
        ] {
            let signal = analyze(phrase.as_bytes());
            assert_eq!(signal.smtp_code, 550);
            assert_eq!(signal.smtp_status, "5.1.1");
            assert_eq!(signal.reason, "unrouteable address");
        }
    }

    #[test]
    fn status_is_sentinel_or_dotted() {
        let bodies: [&[u8]; 4] = [
            b"Diagnostic-Code: smtp; 550 5.1.1 User unknown",
            b"Diagnostic-Code: smtp; 550 gone",
            b"Diagnostic-Code: smtp; 550-oops gone",
            b"no diagnostics at all",
        ];
        for body in bodies {
            let signal = analyze(body);
            assert!(
                signal.smtp_status == STATUS_NOT_FOUND || STATUS_REGEX.is_match(&signal.smtp_status)
            );
        }
    }

    #[test]
    fn record_info_json_field_names() {
        let info = RecordInfo {
            domain: "example.com".into(),
            reason: "user unknown".into(),
            reporter: "mailer-daemon@example.com".into(),
            smtp_code: 550,
            smtp_status: "5.1.1".into(),
            date: "Mon, 2 Jan 2006 15:04:05 -0700".into(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["code"], 550);
        assert_eq!(v["status"], "5.1.1");
        assert_eq!(v["domain"], "example.com");
        assert_eq!(v["reporter"], "mailer-daemon@example.com");
        assert!(v.get("rcpt").is_none());
    }
}
