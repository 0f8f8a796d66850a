use anyhow::{bail, Context, Result};
use mail_parser::MessageParser;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const UNKNOWN_REPORTER: &str = "unknown@unknown.tld";
const UNKNOWN_DOMAIN: &str = "unknown.tld";

/// Bounce message with the headers the pipeline needs already extracted.
/// `body` is the raw byte region after the header block.
#[derive(Debug)]
pub struct Bounce {
    pub rcpt: String,
    pub date: String,
    pub reporter: String,
    pub body: Vec<u8>,
}

/// Reads a whole message from the given file, or from stdin when no file
/// was named.
pub fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            debug!(path = %path.display(), "reading bounce message from file");
            fs::read(path).with_context(|| format!("unable to read {}", path.display()))
        }
        None => {
            debug!("reading bounce message from stdin");
            let mut raw = Vec::new();
            std::io::stdin()
                .read_to_end(&mut raw)
                .context("unable to read stdin")?;
            Ok(raw)
        }
    }
}

/// Pulls the failed recipient, date and reporter out of the message headers
/// and hands back the raw body for the diagnostic scan.
pub fn parse_bounce(raw: &[u8]) -> Result<Bounce> {
    let Some(message) = MessageParser::default().parse_headers(raw) else {
        bail!("unable to parse mail message");
    };

    let rcpt = message
        .header("X-Failed-Recipients")
        .and_then(|h| h.as_text())
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let date = message
        .header_raw("Date")
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let reporter = message
        .from()
        .and_then(|from| from.first())
        .and_then(|addr| addr.address.as_deref())
        .unwrap_or(UNKNOWN_REPORTER)
        .to_string();

    Ok(Bounce {
        rcpt,
        date,
        reporter,
        body: body_bytes(raw).to_vec(),
    })
}

/// Domain part of a mail address, `unknown.tld` when there is no `@`.
pub fn domain_from_address(addr: &str) -> String {
    let mut parts = addr.split('@');
    match (parts.next(), parts.next()) {
        (Some(_), Some(domain)) => domain.to_string(),
        _ => UNKNOWN_DOMAIN.to_string(),
    }
}

// Body starts after the first blank line, as in the header/body split the
// content filter does line by line.
fn body_bytes(raw: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\n' {
            if raw[i + 1..].starts_with(b"\n") {
                return &raw[i + 2..];
            }
            if raw[i + 1..].starts_with(b"\r\n") {
                return &raw[i + 3..];
            }
        }
        i += 1;
    }
    &[]
}
