//! `lei`-backed archive: queries via the `lei q` tool, raw messages over HTTPS.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use reqwest::Url;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::archive::MailArchive;
use crate::error::{TrackerError, TransportError};
use crate::tracker::model::RawMessage;

/// Where the tool lives and which public inbox it reads.
#[derive(Debug, Clone)]
pub struct LeiConfig {
    pub lei_path: PathBuf,
    /// Public-inbox base, e.g. `https://lore.kernel.org/all`.
    pub inbox_url: String,
}

impl Default for LeiConfig {
    fn default() -> Self {
        Self {
            lei_path: PathBuf::from("lei"),
            inbox_url: "https://lore.kernel.org/all".to_string(),
        }
    }
}

pub struct LeiArchive {
    config: LeiConfig,
    client: reqwest::Client,
}

impl LeiArchive {
    pub fn new(config: LeiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// `<inbox>/<id>/<tail...>` with the id percent-encoded as one segment.
    fn message_endpoint(&self, message_id: &str, tail: &[&str]) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.config.inbox_url)
            .map_err(|e| TransportError::Malformed(format!("inbox url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TransportError::Malformed("inbox url cannot be a base".into()))?
            .pop_if_empty()
            .push(message_id)
            .extend(tail);
        Ok(url)
    }
}

/// Public-inbox search expression restricted to the last `since`.
pub fn windowed_query(query: &str, since: Duration) -> String {
    format!("({query}) AND d:{}.seconds.ago..", since.as_secs())
}

// ── Output parsing ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LeiRecord {
    m: String,
    #[serde(default)]
    s: String,
    #[serde(default)]
    f: Vec<Vec<Option<String>>>,
    #[serde(default)]
    dt: Option<String>,
    #[serde(default)]
    refs: Vec<String>,
}

fn strip_angles(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}

fn display_sender(from: &[Vec<Option<String>>]) -> String {
    let Some(first) = from.first() else {
        return "Unknown".to_string();
    };
    let name = first.first().cloned().flatten().unwrap_or_default();
    let addr = first.get(1).cloned().flatten().unwrap_or_default();
    match (name.trim().is_empty(), addr.is_empty()) {
        (false, false) => format!("{} <{addr}>", name.trim()),
        (true, false) => addr,
        (false, true) => name.trim().to_string(),
        (true, true) => "Unknown".to_string(),
    }
}

fn record_date(message_id: &str, dt: Option<&str>) -> Result<DateTime<Utc>, TrackerError> {
    let parse_error = |reason: String| TrackerError::Parse {
        message_id: message_id.to_string(),
        reason,
    };
    let raw = dt.ok_or_else(|| parse_error("no date".into()))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| parse_error(format!("date '{raw}': {e}")))
}

/// Parse `lei q -f json` output. Records with an unusable date are skipped.
pub fn parse_lei_output(stdout: &str) -> Result<Vec<RawMessage>, TransportError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let records: Vec<Option<LeiRecord>> = serde_json::from_str(stdout)
        .map_err(|e| TransportError::Malformed(format!("lei json: {e}")))?;

    let mut out = Vec::with_capacity(records.len());
    for record in records.into_iter().flatten() {
        let id = strip_angles(&record.m);
        let date = match record_date(&id, record.dt.as_deref()) {
            Ok(date) => date,
            Err(e) => {
                warn!(message_id = %id, "Skipping message: {e}");
                continue;
            }
        };

        out.push(RawMessage {
            sender: display_sender(&record.f),
            subject: record.s,
            date,
            refs: record.refs.iter().map(|r| strip_angles(r)).collect(),
            id,
        });
    }
    Ok(out)
}

/// Text body of a raw RFC 5322 message.
pub fn extract_body(message_id: &str, raw: &[u8]) -> Result<String, TransportError> {
    let parsed = MessageParser::default().parse(raw).ok_or_else(|| {
        TransportError::Malformed(format!("message {message_id} is not a parseable email"))
    })?;
    parsed
        .body_text(0)
        .map(|text| text.into_owned())
        .ok_or_else(|| TransportError::Malformed(format!("message {message_id} has no text body")))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl MailArchive for LeiArchive {
    async fn query_messages(
        &self,
        query: &str,
        since: Duration,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let search = windowed_query(query, since);
        debug!(query = %search, "Running lei query");

        let output = Command::new(&self.config.lei_path)
            .args(["q", "--only", &self.config.inbox_url, "-f", "json"])
            .arg(&search)
            .output()
            .await
            .map_err(|e| TransportError::QueryFailed {
                query: search.clone(),
                reason: format!("spawn {}: {e}", self.config.lei_path.display()),
            })?;

        if !output.status.success() {
            return Err(TransportError::QueryFailed {
                query: search,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let messages = parse_lei_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(count = messages.len(), "lei query returned");
        Ok(messages)
    }

    async fn fetch_body(&self, message_id: &str) -> Result<String, TransportError> {
        let url = self.message_endpoint(message_id, &["raw"])?;
        let fetch_failed = |reason: String| TransportError::FetchFailed {
            message_id: message_id.to_string(),
            reason,
        };

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(fetch_failed(format!("HTTP {}", resp.status())));
        }

        let raw = resp.bytes().await.map_err(|e| fetch_failed(e.to_string()))?;
        extract_body(message_id, &raw)
    }

    fn message_url(&self, message_id: &str) -> String {
        match self.message_endpoint(message_id, &[""]) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}/{message_id}/",
                self.config.inbox_url.trim_end_matches('/')
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"m": "<20250301.pull@kernel.org>", "s": "[GIT PULL] CXL fixes for 6.14",
         "f": [["Dan Maintainer", "dan@kernel.org"]], "dt": "2025-03-01T12:00:00Z",
         "refs": []},
        {"m": "reply@kernel.org", "s": "Re: [GIT PULL] CXL fixes for 6.14",
         "f": [[null, "pr-tracker-bot@kernel.org"]], "dt": "2025-03-02T08:30:00Z",
         "refs": ["<20250301.pull@kernel.org>"]},
        {"m": "baddate@kernel.org", "s": "whatever", "f": [], "dt": "yesterday"},
        null
    ]"#;

    #[test]
    fn parses_records_and_skips_bad_dates() {
        let msgs = parse_lei_output(SAMPLE).unwrap();
        assert_eq!(msgs.len(), 2);

        assert_eq!(msgs[0].id, "20250301.pull@kernel.org");
        assert_eq!(msgs[0].sender, "Dan Maintainer <dan@kernel.org>");
        assert_eq!(msgs[0].date.to_rfc3339(), "2025-03-01T12:00:00+00:00");

        assert_eq!(msgs[1].sender, "pr-tracker-bot@kernel.org");
        assert_eq!(msgs[1].refs, vec!["20250301.pull@kernel.org".to_string()]);
    }

    #[test]
    fn bad_dates_are_parse_errors() {
        assert!(matches!(
            record_date("x@kernel.org", Some("yesterday")),
            Err(TrackerError::Parse { message_id, .. }) if message_id == "x@kernel.org"
        ));
        assert!(matches!(
            record_date("x@kernel.org", None),
            Err(TrackerError::Parse { .. })
        ));
        assert!(record_date("x@kernel.org", Some("2025-03-01T12:00:00+01:00")).is_ok());
    }

    #[test]
    fn empty_output_is_empty_batch() {
        assert!(parse_lei_output("").unwrap().is_empty());
        assert!(parse_lei_output("[null]").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_malformed() {
        assert!(matches!(
            parse_lei_output("not json"),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn window_expression() {
        assert_eq!(
            windowed_query("l:linux-cxl.vger.kernel.org", Duration::from_secs(3600)),
            "(l:linux-cxl.vger.kernel.org) AND d:3600.seconds.ago.."
        );
    }

    #[test]
    fn body_extraction() {
        let raw = b"From: pr-tracker-bot@kernel.org\r\n\
Subject: Re: [GIT PULL] CXL fixes\r\n\
Message-ID: <reply@kernel.org>\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
The pull request you sent has been merged into torvalds/linux.git:\r\n\
https://git.kernel.org/torvalds/c/0123456789abcdef0123456789abcdef01234567\r\n";
        let body = extract_body("reply@kernel.org", raw).unwrap();
        assert!(body.contains("git.kernel.org/torvalds/c/0123456789ab"));
    }

    #[test]
    fn message_urls_encode_the_id() {
        let archive = LeiArchive::new(LeiConfig::default());
        assert_eq!(
            archive.message_url("20250301.pull@kernel.org"),
            "https://lore.kernel.org/all/20250301.pull@kernel.org/"
        );
        let raw = archive.message_endpoint("a/b@x", &["raw"]).unwrap();
        assert_eq!(raw.as_str(), "https://lore.kernel.org/all/a%2Fb@x/raw");
    }
}
