//! Subscription routing: which channels hear about which subsystem.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::tracker::model::ChannelId;

/// Filter entry matching every subsystem and kernel release.
pub const WILDCARD: &str = "*";

/// Reserved tag for mainline kernel release announcements.
pub const KERNEL_RELEASE_TAG: &str = "kernel-release";

/// A channel's subsystem filter, configured as a list like `["*"]` or
/// `["linux-cxl", "linux-pci"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SubsystemFilter {
    pub wildcard: bool,
    pub tags: BTreeSet<String>,
}

impl SubsystemFilter {
    pub fn wildcard() -> Self {
        Self {
            wildcard: true,
            tags: BTreeSet::new(),
        }
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter().map(Into::into).collect::<Vec<String>>().into()
    }

    fn merge(&mut self, other: &SubsystemFilter) {
        self.wildcard |= other.wildcard;
        self.tags.extend(other.tags.iter().cloned());
    }
}

impl From<Vec<String>> for SubsystemFilter {
    fn from(entries: Vec<String>) -> Self {
        let mut filter = SubsystemFilter::default();
        for entry in entries {
            let entry = entry.trim();
            if entry == WILDCARD {
                filter.wildcard = true;
            } else if !entry.is_empty() {
                filter.tags.insert(entry.to_string());
            }
        }
        filter
    }
}

impl From<SubsystemFilter> for Vec<String> {
    fn from(filter: SubsystemFilter) -> Self {
        let mut out = Vec::with_capacity(filter.tags.len() + 1);
        if filter.wildcard {
            out.push(WILDCARD.to_string());
        }
        out.extend(filter.tags);
        out
    }
}

/// One configured `(guild, channel, filter)` subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub guild_id: u64,
    pub channel_id: ChannelId,
    #[serde(rename = "subsystems")]
    pub filter: SubsystemFilter,
}

/// Resolves subsystem tags to target channels. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRouter {
    subscriptions: Vec<Subscription>,
    github_projects: BTreeSet<String>,
}

impl SubscriptionRouter {
    pub fn new<I, S>(subscriptions: Vec<Subscription>, github_projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subscriptions,
            github_projects: github_projects.into_iter().map(Into::into).collect(),
        }
    }

    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    pub fn is_github_project(&self, tag: &str) -> bool {
        self.github_projects.contains(tag)
    }

    /// Whether `filter` admits `tag`. The wildcard admits subsystem tags and
    /// the kernel-release tag but never a GitHub project.
    pub fn accepts(&self, filter: &SubsystemFilter, tag: &str) -> bool {
        filter.tags.contains(tag) || (filter.wildcard && !self.is_github_project(tag))
    }

    /// Channels subscribed to `tag`, each at most once.
    pub fn resolve(&self, tag: &str) -> BTreeSet<ChannelId> {
        self.subscriptions
            .iter()
            .filter(|sub| self.accepts(&sub.filter, tag))
            .map(|sub| sub.channel_id)
            .collect()
    }

    /// Union of every filter configured for `channel`, or `None` if the
    /// channel has no subscription.
    pub fn filter_for(&self, channel: ChannelId) -> Option<SubsystemFilter> {
        let mut found: Option<SubsystemFilter> = None;
        for sub in self.subscriptions.iter().filter(|s| s.channel_id == channel) {
            found
                .get_or_insert_with(SubsystemFilter::default)
                .merge(&sub.filter);
        }
        found
    }

    /// Filter used for channel-scoped views. Unsubscribed channels see everything.
    pub fn view_filter(&self, channel: ChannelId) -> SubsystemFilter {
        self.filter_for(channel)
            .unwrap_or_else(SubsystemFilter::wildcard)
    }
}
