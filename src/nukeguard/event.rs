use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Categories of guild activity watched by the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    ChannelCreate,
    ChannelDelete,
    RoleCreate,
    RoleDelete,
    MemberBan,
    MemberKick,
    MessageDelete,
    MessageSend,
}

impl EventCategory {
    /// Stable snake_case name, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChannelCreate => "channel_create",
            Self::ChannelDelete => "channel_delete",
            Self::RoleCreate => "role_create",
            Self::RoleDelete => "role_delete",
            Self::MemberBan => "member_ban",
            Self::MemberKick => "member_kick",
            Self::MessageDelete => "message_delete",
            Self::MessageSend => "message_send",
        }
    }

    /// Human label used in audit lines and notices.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ChannelCreate => "channel creation",
            Self::ChannelDelete => "channel deletion",
            Self::RoleCreate => "role creation",
            Self::RoleDelete => "role deletion",
            Self::MemberBan => "member ban",
            Self::MemberKick => "member kick",
            Self::MessageDelete => "message deletion",
            Self::MessageSend => "message flood",
        }
    }
}

/// One normalized gateway event entering the guard pipeline.
///
/// `actor_id` is only what the gateway payload itself carries (message
/// author). For structural actions the platform reports no actor and the
/// detector has to go through the audit log instead.
#[derive(Debug, Clone)]
pub struct GuardEvent {
    pub guild_id: u64,
    pub category: EventCategory,
    pub actor_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub role_id: Option<u64>,
    /// Member on the receiving end of a ban or kick.
    pub target_user: Option<u64>,
    pub message_id: Option<u64>,
    pub content: Option<String>,
    pub at: DateTime<Utc>,
}

impl GuardEvent {
    fn base(guild_id: u64, category: EventCategory) -> Self {
        Self {
            guild_id,
            category,
            actor_id: None,
            channel_id: None,
            role_id: None,
            target_user: None,
            message_id: None,
            content: None,
            at: Utc::now(),
        }
    }

    pub fn channel_create(guild_id: u64, channel_id: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::ChannelCreate);
        e.channel_id = Some(channel_id);
        e
    }

    pub fn channel_delete(guild_id: u64, channel_id: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::ChannelDelete);
        e.channel_id = Some(channel_id);
        e
    }

    pub fn role_create(guild_id: u64, role_id: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::RoleCreate);
        e.role_id = Some(role_id);
        e
    }

    pub fn role_delete(guild_id: u64, role_id: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::RoleDelete);
        e.role_id = Some(role_id);
        e
    }

    pub fn member_ban(guild_id: u64, target_user: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::MemberBan);
        e.target_user = Some(target_user);
        e
    }

    pub fn member_kick(guild_id: u64, target_user: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::MemberKick);
        e.target_user = Some(target_user);
        e
    }

    pub fn message_delete(guild_id: u64, channel_id: u64) -> Self {
        let mut e = Self::base(guild_id, EventCategory::MessageDelete);
        e.channel_id = Some(channel_id);
        e
    }

    pub fn message_send(
        guild_id: u64,
        author_id: u64,
        channel_id: u64,
        message_id: u64,
        content: &str,
    ) -> Self {
        let mut e = Self::base(guild_id, EventCategory::MessageSend);
        e.actor_id = Some(author_id);
        e.channel_id = Some(channel_id);
        e.message_id = Some(message_id);
        e.content = Some(content.to_string());
        e
    }

    /// Override the ingestion timestamp (tests, replay).
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}

/// Which rule produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionRule {
    /// Attributed through the audit log; fires on every occurrence.
    Single(EventCategory),
    /// Sliding-window rule over recent occurrences.
    Mass(EventCategory),
}

/// What the detector decided for one event. At most one per event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Hostile activity, attributed to `actor` when the platform knows one.
    Detected {
        rule: DetectionRule,
        actor: Option<u64>,
    },
    /// Message content breaks the invite policy; removed without punishment.
    ContentViolation,
}

/// Penalty applied to a detected actor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentKind {
    Kick,
    #[default]
    Ban,
    Timeout,
}

impl PunishmentKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "kick" => Some(Self::Kick),
            "ban" => Some(Self::Ban),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Timeout => "timeout",
        }
    }

    /// Past-tense form for audit lines.
    pub fn applied_label(&self) -> &'static str {
        match self {
            Self::Kick => "user kicked",
            Self::Ban => "user banned",
            Self::Timeout => "user timed out",
        }
    }
}

/// Outcome of one remediation pass. `None` phases were not applicable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub reverted: Option<bool>,
    pub punished: Option<bool>,
    pub notified: bool,
    pub audit_line: String,
}
