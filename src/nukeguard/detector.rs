use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use super::GuardApi;
use super::event::{DetectionRule, EventCategory, GuardEvent, Verdict};
use super::exemptions::ExemptionRegistry;
use super::settings::GuardSettings;
use super::window::{WindowKey, WindowTracker};

/* ============================================================
   INVITE FILTER
   ============================================================ */

static RE_INVITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)discord(?:\.gg|(?:app)?\.com/invite)/[A-Za-z0-9-]+").unwrap()
});

fn contains_invite(content: &str) -> bool {
    RE_INVITE.is_match(content)
}

/* ============================================================
   RULE TABLE
   ============================================================ */

/// Categories resolved through the audit log, firing per occurrence.
fn is_single_shot(category: EventCategory) -> bool {
    matches!(
        category,
        EventCategory::ChannelCreate
            | EventCategory::ChannelDelete
            | EventCategory::RoleCreate
            | EventCategory::RoleDelete
            | EventCategory::MemberBan
            | EventCategory::MemberKick
    )
}

/// Categories with a mass window. For single-shot categories the window is
/// the fallback when the audit log yields no actor; channel deletions and
/// kicks have none.
fn has_mass_window(category: EventCategory) -> bool {
    matches!(
        category,
        EventCategory::ChannelCreate
            | EventCategory::RoleCreate
            | EventCategory::RoleDelete
            | EventCategory::MemberBan
            | EventCategory::MessageDelete
            | EventCategory::MessageSend
    )
}

/* ============================================================
   DETECTOR
   ============================================================ */

/// Stateful half of the guard: the per-key windows plus the rule pipeline.
/// Record, threshold check and clear happen under one lock so concurrent
/// events for the same key cannot interleave mid-decision.
#[derive(Debug, Default)]
pub struct Detector {
    windows: Mutex<WindowTracker>,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one event. At most one verdict comes back; `None` means the
    /// event passed without suspicion (or was filtered out early).
    pub async fn evaluate(
        &self,
        api: &impl GuardApi,
        settings: &GuardSettings,
        exemptions: &ExemptionRegistry,
        event: &GuardEvent,
    ) -> Option<Verdict> {
        if let Some(actor) = event.actor_id {
            if exemptions.is_exempt(actor).await {
                return None;
            }
        }

        // Invite policy answers only to its own flag and runs before any
        // counting: it stays active with mass-message detection switched
        // off, and an invite never feeds the flood window.
        if event.category == EventCategory::MessageSend
            && settings.anti_invite_links
            && event.content.as_deref().is_some_and(contains_invite)
        {
            return Some(Verdict::ContentViolation);
        }

        if !settings.category_enabled(event.category) {
            return None;
        }

        if is_single_shot(event.category) {
            match api.latest_actor(event.guild_id, event.category).await {
                Ok(Some(actor)) if actor == api.self_id() => return None,
                Ok(Some(actor)) => {
                    if exemptions.is_exempt(actor).await {
                        return None;
                    }
                    return Some(Verdict::Detected {
                        rule: DetectionRule::Single(event.category),
                        actor: Some(actor),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(
                        error = ?e,
                        guild_id = event.guild_id,
                        category = ?event.category,
                        "audit attribution failed, treating as unresolved"
                    );
                }
            }
            if !has_mass_window(event.category) {
                return None;
            }
        }

        let key = match event.category {
            EventCategory::MessageSend => WindowKey::Actor(event.guild_id, event.actor_id?),
            _ => WindowKey::Guild(event.guild_id, event.category),
        };
        self.check_window(key, event, settings).await
    }

    /// The window trigger: fire iff length hits the threshold exactly and
    /// the oldest retained entry is still inside the timeframe. Fired
    /// windows are cleared before the lock drops.
    async fn check_window(
        &self,
        key: WindowKey,
        event: &GuardEvent,
        settings: &GuardSettings,
    ) -> Option<Verdict> {
        let threshold = settings.mass_message_threshold as usize;
        let timeframe = Duration::seconds(settings.mass_message_timeframe as i64);

        let mut windows = self.windows.lock().await;
        let len = windows.record(key, event.at, threshold);
        if len == threshold {
            let oldest = windows.peek_oldest(&key)?;
            if event.at - oldest < timeframe {
                windows.clear(&key);
                let actor = match key {
                    WindowKey::Actor(_, user_id) => Some(user_id),
                    WindowKey::Guild(..) => None,
                };
                return Some(Verdict::Detected {
                    rule: DetectionRule::Mass(event.category),
                    actor,
                });
            }
        }
        None
    }

    /// Drop windows whose newest entry is older than `max_age`.
    pub async fn sweep_stale(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        self.windows.lock().await.sweep_stale(now, max_age)
    }

    /// Serializable copy of the live windows.
    pub async fn windows_snapshot(&self) -> HashMap<String, Vec<i64>> {
        self.windows.lock().await.snapshot()
    }

    #[cfg(test)]
    pub async fn window_len(&self, key: &WindowKey) -> usize {
        self.windows.lock().await.len(key)
    }
}
