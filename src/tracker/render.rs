//! Notification rendering for submitted, merged, and pending views.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::archive::MailArchive;
use crate::notify::{Embed, Notification};
use crate::tracker::lifecycle::PendingEntry;
use crate::tracker::model::PullRequest;

pub const SUBMITTED_COLOUR: u32 = 0x0066cc;
pub const MERGED_COLOUR: u32 = 0x00ff00;

const DIGEST_PER_SUBSYSTEM: usize = 10;
const DIGEST_SUBJECT_MAX: usize = 60;
const STALE_AFTER_DAYS: i64 = 7;

pub const EMPTY_DIGEST: &str = "✅ No pending PRs! All caught up.";

pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// `Nd Nh`, `Nh Nm`, or `Nm`.
pub fn format_merge_duration(elapsed: Duration) -> String {
    let total_minutes = elapsed.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

pub fn truncate_subject(subject: &str, max: usize) -> String {
    if subject.chars().count() <= max {
        return subject.to_string();
    }
    let keep: String = subject.chars().take(max.saturating_sub(3)).collect();
    format!("{keep}...")
}

fn age_label(days: i64) -> String {
    if days > 0 {
        format!("{days}d")
    } else {
        "today".to_string()
    }
}

/// Builds notifications, linking each pull request to its archive page.
#[derive(Clone)]
pub struct Renderer {
    archive: Arc<dyn MailArchive>,
}

impl Renderer {
    pub fn new(archive: Arc<dyn MailArchive>) -> Self {
        Self { archive }
    }

    /// Rendering for the row's current state.
    pub fn current(&self, pr: &PullRequest) -> Notification {
        if pr.is_merged() {
            self.merged(pr)
        } else {
            self.submitted(pr)
        }
    }

    pub fn submitted(&self, pr: &PullRequest) -> Notification {
        let embed = Embed {
            title: "📥 Pull Request Submitted".into(),
            description: format!("**{}**: {}", pr.subsystem, pr.subject),
            url: Some(self.archive.message_url(&pr.message_id)),
            colour: SUBMITTED_COLOUR,
            footer: Some("Waiting to be merged".into()),
            ..Default::default()
        }
        .field("From", &pr.sender, true)
        .field("Submit Date", format_date(&pr.submitted_at), true)
        .field("Merge Date", "—", true);

        Notification::embed(embed)
    }

    pub fn merged(&self, pr: &PullRequest) -> Notification {
        let mut embed = Embed {
            title: "✅ PR Merged".into(),
            description: format!("**{}**: {}", pr.subsystem, pr.subject),
            url: Some(self.archive.message_url(&pr.message_id)),
            colour: MERGED_COLOUR,
            ..Default::default()
        }
        .field("From", &pr.sender, true)
        .field("Submit Date", format_date(&pr.submitted_at), true)
        .field(
            "Merge Date",
            pr.merged_at
                .as_ref()
                .map(format_date)
                .unwrap_or_else(|| "Unknown".into()),
            true,
        );

        if let Some(merged_at) = pr.merged_at {
            embed = embed.field(
                "Time to Merge",
                format_merge_duration(merged_at - pr.submitted_at),
                true,
            );
        }

        if let (Some(hash), Some(url)) = (&pr.merge_commit_hash, &pr.merge_url) {
            let short: String = hash.chars().take(12).collect();
            embed = embed.field("Merge Commit", format!("[`{short}`]({url})"), false);
        }

        Notification::embed(embed)
    }

    /// Pending digest grouped by subsystem.
    pub fn pending_digest(&self, entries: &[PendingEntry]) -> Notification {
        if entries.is_empty() {
            return Notification::text(EMPTY_DIGEST);
        }

        let mut by_subsystem: BTreeMap<&str, Vec<&PendingEntry>> = BTreeMap::new();
        for entry in entries {
            by_subsystem
                .entry(entry.pull_request.subsystem.as_str())
                .or_default()
                .push(entry);
        }

        let mut embed = Embed {
            title: "📋 Pending Pull Requests".into(),
            description: format!("Found {} unmerged PR(s)", entries.len()),
            colour: SUBMITTED_COLOUR,
            ..Default::default()
        };

        for (subsystem, group) in &by_subsystem {
            let mut lines: Vec<String> = group
                .iter()
                .take(DIGEST_PER_SUBSYSTEM)
                .map(|e| {
                    format!(
                        "[{}]({}) ({})",
                        truncate_subject(&e.pull_request.subject, DIGEST_SUBJECT_MAX),
                        self.archive.message_url(&e.pull_request.message_id),
                        age_label(e.age_days)
                    )
                })
                .collect();
            if group.len() > DIGEST_PER_SUBSYSTEM {
                lines.push(format!(
                    "_...and {} more_",
                    group.len() - DIGEST_PER_SUBSYSTEM
                ));
            }
            embed = embed.field(
                format!("**{subsystem}** ({})", group.len()),
                lines.join("\n"),
                false,
            );
        }

        let stale = entries
            .iter()
            .filter(|e| e.age_days >= STALE_AFTER_DAYS)
            .count();
        if stale > 0 {
            embed.footer = Some(format!(
                "⚠️  {stale} PR(s) older than {STALE_AFTER_DAYS} days"
            ));
        }

        Notification::embed(embed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::error::TransportError;
    use crate::tracker::model::{PrState, RawMessage};

    struct UrlOnly;

    #[async_trait]
    impl MailArchive for UrlOnly {
        async fn query_messages(
            &self,
            _query: &str,
            _since: std::time::Duration,
        ) -> Result<Vec<RawMessage>, TransportError> {
            Ok(Vec::new())
        }

        async fn fetch_body(&self, message_id: &str) -> Result<String, TransportError> {
            Err(TransportError::Malformed(message_id.to_string()))
        }

        fn message_url(&self, message_id: &str) -> String {
            format!("https://lore.kernel.org/all/{message_id}/")
        }
    }

    fn renderer() -> Renderer {
        Renderer::new(Arc::new(UrlOnly))
    }

    fn pr(id: &str, subsystem: &str) -> PullRequest {
        PullRequest {
            message_id: id.into(),
            subsystem: subsystem.into(),
            subject: "[GIT PULL] CXL fixes for v6.14-rc5".into(),
            sender: "Dan Maintainer <dan@kernel.org>".into(),
            submitted_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            state: PrState::Pending,
            merge_commit_hash: None,
            merge_url: None,
            merged_at: None,
            thread_refs: BTreeSet::new(),
        }
    }

    fn pending(id: &str, subsystem: &str, age_days: i64) -> PendingEntry {
        PendingEntry {
            pull_request: pr(id, subsystem),
            age_days,
        }
    }

    #[test]
    fn submitted_view() {
        let n = renderer().submitted(&pr("m1", "linux-cxl"));
        let e = n.embed.unwrap();
        assert_eq!(e.title, "📥 Pull Request Submitted");
        assert_eq!(e.description, "**linux-cxl**: [GIT PULL] CXL fixes for v6.14-rc5");
        assert_eq!(e.url.as_deref(), Some("https://lore.kernel.org/all/m1/"));
        assert_eq!(e.field_value("Submit Date"), Some("2025-03-01 12:00 UTC"));
        assert_eq!(e.field_value("Merge Date"), Some("—"));
        assert_eq!(e.footer.as_deref(), Some("Waiting to be merged"));
    }

    #[test]
    fn merged_view() {
        let mut p = pr("m1", "linux-cxl");
        p.state = PrState::Merged;
        p.merged_at = Some(p.submitted_at + Duration::days(2) + Duration::hours(3));
        p.merge_commit_hash = Some("abc123def4567890abc123def4567890abc123de".into());
        p.merge_url = Some("https://git.kernel.org/torvalds/c/abc123def4567890abc123def4567890abc123de".into());

        let n = renderer().current(&p);
        let e = n.embed.unwrap();
        assert_eq!(e.title, "✅ PR Merged");
        assert_eq!(e.colour, MERGED_COLOUR);
        assert_eq!(e.field_value("Time to Merge"), Some("2d 3h"));
        assert_eq!(
            e.field_value("Merge Commit"),
            Some("[`abc123def456`](https://git.kernel.org/torvalds/c/abc123def4567890abc123def4567890abc123de)")
        );
        assert!(e.footer.is_none());
    }

    #[test]
    fn merge_duration_formats() {
        assert_eq!(format_merge_duration(Duration::minutes(42)), "42m");
        assert_eq!(format_merge_duration(Duration::minutes(125)), "2h 5m");
        assert_eq!(format_merge_duration(Duration::hours(49)), "2d 1h");
        assert_eq!(format_merge_duration(Duration::minutes(-5)), "0m");
    }

    #[test]
    fn subject_truncation() {
        let long = "x".repeat(61);
        let short = truncate_subject(&long, 60);
        assert_eq!(short.chars().count(), 60);
        assert!(short.ends_with("..."));
        assert_eq!(truncate_subject("short", 60), "short");
    }

    #[test]
    fn empty_digest_is_text() {
        let n = renderer().pending_digest(&[]);
        assert_eq!(n.content.as_deref(), Some(EMPTY_DIGEST));
        assert!(n.embed.is_none());
    }

    #[test]
    fn digest_groups_caps_and_counts_stale() {
        let mut entries: Vec<PendingEntry> = (0..12)
            .map(|i| pending(&format!("cxl{i}"), "linux-cxl", i))
            .collect();
        entries.push(pending("pci0", "linux-pci", 0));

        let e = renderer().pending_digest(&entries).embed.unwrap();
        assert_eq!(e.description, "Found 13 unmerged PR(s)");
        assert_eq!(e.fields.len(), 2);
        assert_eq!(e.fields[0].name, "**linux-cxl** (12)");
        assert!(e.fields[0].value.ends_with("_...and 2 more_"));
        assert!(e.fields[0].value.starts_with("[[GIT PULL] CXL fixes for v6.14-rc5](https://lore.kernel.org/all/cxl0/) (today)"));
        assert_eq!(e.fields[1].name, "**linux-pci** (1)");
        // ages 7..=11
        assert_eq!(e.footer.as_deref(), Some("⚠️  5 PR(s) older than 7 days"));
    }
}
