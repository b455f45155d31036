use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use super::GuardApi;
use super::event::{
    DetectionRule, DispatchReport, EventCategory, GuardEvent, PunishmentKind, Verdict,
};
use super::settings::GuardSettings;

/// Reason string attached to punitive platform calls.
const PUNISH_REASON: &str = "Lynx Sentinel: hostile activity detected";

/// Run the remediation sequence for one verdict: revert what can be
/// reverted, punish when an actor is attributed, notify where a channel is
/// known, then produce the audit line. Each phase is best-effort; a failed
/// phase is logged and the sequence keeps going. Nothing is retried.
pub async fn dispatch(
    api: &impl GuardApi,
    settings: &GuardSettings,
    timeout: Duration,
    event: &GuardEvent,
    verdict: &Verdict,
) -> DispatchReport {
    match verdict {
        Verdict::ContentViolation => content_violation(api, timeout, event).await,
        Verdict::Detected { rule, actor } => detected(api, settings, timeout, event, *rule, *actor).await,
    }
}

async fn detected(
    api: &impl GuardApi,
    settings: &GuardSettings,
    timeout: Duration,
    event: &GuardEvent,
    rule: DetectionRule,
    actor: Option<u64>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    report.reverted = revert(api, timeout, event).await;

    report.punished = match actor {
        Some(user_id) => Some(punish(api, settings, timeout, event.guild_id, user_id).await),
        None => None,
    };

    if let DetectionRule::Mass(category) = rule {
        if let Some(channel_id) = event.channel_id {
            let notice = mass_notice(category, actor);
            report.notified = bounded(timeout, "notify", api.notify(channel_id, &notice)).await;
        }
    }

    report.audit_line = audit_line(settings, rule, actor, &report);
    report
}

/// Undo the triggering action where the platform still can: delete what was
/// created, unban what was banned. Deletions and kicks leave nothing to
/// restore, floods have no structural side effect.
async fn revert(api: &impl GuardApi, timeout: Duration, event: &GuardEvent) -> Option<bool> {
    match event.category {
        EventCategory::ChannelCreate => {
            let channel_id = event.channel_id?;
            Some(bounded(timeout, "delete_channel", api.delete_channel(event.guild_id, channel_id)).await)
        }
        EventCategory::RoleCreate => {
            let role_id = event.role_id?;
            Some(bounded(timeout, "delete_role", api.delete_role(event.guild_id, role_id)).await)
        }
        EventCategory::MemberBan => {
            let user_id = event.target_user?;
            Some(bounded(timeout, "unban", api.unban(event.guild_id, user_id)).await)
        }
        _ => None,
    }
}

async fn punish(
    api: &impl GuardApi,
    settings: &GuardSettings,
    timeout: Duration,
    guild_id: u64,
    user_id: u64,
) -> bool {
    match settings.punishment {
        PunishmentKind::Kick => {
            bounded(timeout, "kick", api.kick(guild_id, user_id, PUNISH_REASON)).await
        }
        PunishmentKind::Ban => {
            bounded(timeout, "ban", api.ban(guild_id, user_id, PUNISH_REASON)).await
        }
        PunishmentKind::Timeout => {
            let until = Utc::now() + chrono::Duration::seconds(settings.timeout_secs as i64);
            bounded(timeout, "timeout", api.timeout(guild_id, user_id, until)).await
        }
    }
}

async fn content_violation(
    api: &impl GuardApi,
    timeout: Duration,
    event: &GuardEvent,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    if let (Some(channel_id), Some(message_id)) = (event.channel_id, event.message_id) {
        report.reverted =
            Some(bounded(timeout, "delete_message", api.delete_message(channel_id, message_id)).await);
    }

    if let Some(channel_id) = event.channel_id {
        let notice = match event.actor_id {
            Some(user_id) => format!("🚫 <@{user_id}> invite links are not allowed here."),
            None => "🚫 Invite links are not allowed here.".to_string(),
        };
        report.notified = bounded(timeout, "notify", api.notify(channel_id, &notice)).await;
    }

    report.audit_line = match event.actor_id {
        Some(user_id) => format!("invite link removed, user {user_id} warned"),
        None => "invite link removed".to_string(),
    };
    report
}

fn mass_notice(category: EventCategory, actor: Option<u64>) -> String {
    match (category, actor) {
        (EventCategory::MessageSend, Some(user_id)) => {
            format!("⚠️ <@{user_id}>, slow down. Mass messaging is not allowed.")
        }
        _ => format!("🚨 Mass {} detected!", category.label()),
    }
}

fn audit_line(
    settings: &GuardSettings,
    rule: DetectionRule,
    actor: Option<u64>,
    report: &DispatchReport,
) -> String {
    let mut line = match (rule, actor) {
        (DetectionRule::Single(category), Some(user_id)) => {
            format!("unauthorized {} by user {user_id}", category.label())
        }
        (DetectionRule::Single(category), None) => {
            format!("unauthorized {}", category.label())
        }
        (DetectionRule::Mass(category), Some(user_id)) => {
            format!("mass {} by user {user_id}", category.label())
        }
        (DetectionRule::Mass(category), None) => {
            format!("mass {} detected", category.label())
        }
    };
    match report.reverted {
        Some(true) => line.push_str(", reverted"),
        Some(false) => line.push_str(", revert failed"),
        None => {}
    }
    match report.punished {
        Some(true) => {
            line.push_str(", ");
            line.push_str(settings.punishment.applied_label());
        }
        Some(false) => line.push_str(", punishment failed"),
        None => {}
    }
    line
}

/// Bound a platform call so a hung request cannot stall the event loop.
/// Timeouts and call errors count the same: the phase failed.
async fn bounded<F>(timeout: Duration, what: &'static str, fut: F) -> bool
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = ?e, what, "remediation call failed");
            false
        }
        Err(_) => {
            tracing::warn!(what, timeout_ms = timeout.as_millis() as u64, "remediation call timed out");
            false
        }
    }
}
