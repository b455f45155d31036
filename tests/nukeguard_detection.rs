use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serenity::async_trait;
use tokio::sync::Mutex;

use lynx_sentinel::config::NukeGuardTuning;
use lynx_sentinel::db::{KvStore, MemoryKv};
use lynx_sentinel::nukeguard::event::{EventCategory, GuardEvent};
use lynx_sentinel::nukeguard::{GuardApi, NukeGuard};

/// Recording platform mock. Attribution answers come from a fixed table;
/// individual calls can be told to fail or hang.
struct MockApi {
    self_id: u64,
    attribution: HashMap<EventCategory, u64>,
    fail: Vec<&'static str>,
    hang: Vec<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl MockApi {
    fn new() -> Self {
        Self {
            self_id: 999,
            attribution: HashMap::new(),
            fail: Vec::new(),
            hang: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn attributing(mut self, category: EventCategory, actor: u64) -> Self {
        self.attribution.insert(category, actor);
        self
    }

    fn failing(mut self, what: &'static str) -> Self {
        self.fail.push(what);
        self
    }

    fn hanging(mut self, what: &'static str) -> Self {
        self.hang.push(what);
        self
    }

    async fn recorded(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn count_of(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    async fn step(&self, name: &'static str, detail: String) -> Result<()> {
        self.calls.lock().await.push(detail);
        if self.hang.contains(&name) {
            std::future::pending::<()>().await;
        }
        if self.fail.contains(&name) {
            anyhow::bail!("{name} refused");
        }
        Ok(())
    }
}

#[async_trait]
impl GuardApi for MockApi {
    fn self_id(&self) -> u64 {
        self.self_id
    }

    async fn latest_actor(&self, _guild_id: u64, category: EventCategory) -> Result<Option<u64>> {
        Ok(self.attribution.get(&category).copied())
    }

    async fn delete_channel(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        self.step("delete_channel", format!("delete_channel:{guild_id}:{channel_id}"))
            .await
    }

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<()> {
        self.step("delete_role", format!("delete_role:{guild_id}:{role_id}"))
            .await
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()> {
        self.step("delete_message", format!("delete_message:{channel_id}:{message_id}"))
            .await
    }

    async fn unban(&self, guild_id: u64, user_id: u64) -> Result<()> {
        self.step("unban", format!("unban:{guild_id}:{user_id}")).await
    }

    async fn kick(&self, guild_id: u64, user_id: u64, _reason: &str) -> Result<()> {
        self.step("kick", format!("kick:{guild_id}:{user_id}")).await
    }

    async fn ban(&self, guild_id: u64, user_id: u64, _reason: &str) -> Result<()> {
        self.step("ban", format!("ban:{guild_id}:{user_id}")).await
    }

    async fn timeout(&self, guild_id: u64, user_id: u64, _until: DateTime<Utc>) -> Result<()> {
        self.step("timeout", format!("timeout:{guild_id}:{user_id}")).await
    }

    async fn notify(&self, channel_id: u64, _text: &str) -> Result<()> {
        self.step("notify", format!("notify:{channel_id}")).await
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

async fn guard() -> (Arc<NukeGuard>, Arc<MemoryKv>) {
    let kv = Arc::new(MemoryKv::default());
    let g = NukeGuard::bootstrap(NukeGuardTuning::default(), kv.clone()).await;
    (g, kv)
}

fn flood_msg(actor: u64, n: u64, at: DateTime<Utc>) -> GuardEvent {
    GuardEvent::message_send(1, actor, 10, 1000 + n, "hello").with_timestamp(at)
}

#[tokio::test]
async fn flood_fires_exactly_on_fifth_message() {
    let (guard, _) = guard().await;
    let api = MockApi::new();

    for i in 0..4 {
        assert!(guard.handle(&api, flood_msg(42, i, ts(i as i64))).await.is_none());
    }
    let report = guard.handle(&api, flood_msg(42, 4, ts(4))).await.unwrap();
    assert_eq!(report.punished, Some(true));
    assert_eq!(api.count_of("ban:1:42").await, 1);

    // Window was cleared on fire; one more message alone does nothing.
    assert!(guard.handle(&api, flood_msg(42, 5, ts(5))).await.is_none());
    assert_eq!(api.count_of("ban:").await, 1);
}

#[tokio::test]
async fn spread_messages_do_not_fire_until_a_tight_burst() {
    let (guard, _) = guard().await;
    let api = MockApi::new();

    for (n, t) in [0, 3, 6, 9, 13].into_iter().enumerate() {
        assert!(guard.handle(&api, flood_msg(42, n as u64, ts(t))).await.is_none());
    }
    assert!(api.recorded().await.is_empty());

    // FIFO displacement: at t=14 the window is [3,6,9,13,14] (11s, no fire);
    // at t=15 it is [6,9,13,14,15] (9s) and fires.
    assert!(guard.handle(&api, flood_msg(42, 5, ts(14))).await.is_none());
    let report = guard.handle(&api, flood_msg(42, 6, ts(15))).await.unwrap();
    assert_eq!(report.punished, Some(true));
    assert_eq!(api.count_of("ban:1:42").await, 1);
}

#[tokio::test]
async fn exempt_actor_never_detected() {
    let (guard, _) = guard().await;
    let api = MockApi::new().attributing(EventCategory::ChannelCreate, 42);
    guard.exemptions().add(42).await;

    for i in 0..10 {
        assert!(guard.handle(&api, flood_msg(42, i, ts(i as i64 / 10))).await.is_none());
    }
    for i in 0..10 {
        let ev = GuardEvent::channel_create(1, 500 + i).with_timestamp(ts(0));
        assert!(guard.handle(&api, ev).await.is_none());
    }
    assert!(api.recorded().await.is_empty());
}

#[tokio::test]
async fn disabling_suppresses_and_reenabling_keeps_window() {
    let (guard, _) = guard().await;
    let api = MockApi::new();

    for i in 0..3 {
        assert!(guard.handle(&api, flood_msg(42, i, ts(i as i64))).await.is_none());
    }

    guard.settings().configure("anti_mass_messages", "off").await.unwrap();
    for i in 3..8 {
        assert!(guard.handle(&api, flood_msg(42, i, ts(i as i64))).await.is_none());
    }
    assert!(api.recorded().await.is_empty());

    // The three pre-disable entries are still in the window; two more
    // complete the threshold.
    guard.settings().configure("anti_mass_messages", "on").await.unwrap();
    assert!(guard.handle(&api, flood_msg(42, 8, ts(8))).await.is_none());
    let report = guard.handle(&api, flood_msg(42, 9, ts(9))).await.unwrap();
    assert_eq!(report.punished, Some(true));
}

#[tokio::test]
async fn single_role_delete_fires_per_occurrence() {
    let (guard, _) = guard().await;
    let api = MockApi::new().attributing(EventCategory::RoleDelete, 7);

    let report = guard
        .handle(&api, GuardEvent::role_delete(1, 300))
        .await
        .unwrap();
    // Nothing to restore for a deletion; the actor is punished.
    assert_eq!(report.reverted, None);
    assert_eq!(report.punished, Some(true));
    assert_eq!(api.count_of("ban:1:7").await, 1);

    guard.handle(&api, GuardEvent::role_delete(1, 301)).await.unwrap();
    assert_eq!(api.count_of("ban:1:7").await, 2);
}

#[tokio::test]
async fn bot_own_actions_are_ignored() {
    let (guard, _) = guard().await;
    let api = MockApi::new().attributing(EventCategory::ChannelDelete, 999);
    assert!(guard.handle(&api, GuardEvent::channel_delete(1, 300)).await.is_none());
    assert!(api.recorded().await.is_empty());
}

#[tokio::test]
async fn unattributed_channel_spree_trips_mass_fallback() {
    let (guard, _) = guard().await;
    let api = MockApi::new();

    for i in 0..4 {
        let ev = GuardEvent::channel_create(1, 500 + i).with_timestamp(ts(i as i64));
        assert!(guard.handle(&api, ev).await.is_none());
    }
    let ev = GuardEvent::channel_create(1, 504).with_timestamp(ts(4));
    let report = guard.handle(&api, ev).await.unwrap();

    // No actor to punish; the triggering channel is deleted and the guild
    // is notified there.
    assert_eq!(report.punished, None);
    assert_eq!(report.reverted, Some(true));
    assert!(report.notified);
    assert_eq!(api.count_of("ban:").await, 0);
    assert_eq!(api.count_of("kick:").await, 0);
    assert_eq!(api.count_of("delete_channel:1:504").await, 1);
    assert_eq!(api.count_of("notify:504").await, 1);
}

#[tokio::test]
async fn hostile_ban_is_reverted_then_punished() {
    let (guard, _) = guard().await;
    let api = MockApi::new().attributing(EventCategory::MemberBan, 7);

    let report = guard
        .handle(&api, GuardEvent::member_ban(1, 55))
        .await
        .unwrap();
    assert_eq!(report.reverted, Some(true));
    assert_eq!(report.punished, Some(true));
    assert_eq!(api.count_of("unban:1:55").await, 1);
    assert_eq!(api.count_of("ban:1:7").await, 1);
}

#[tokio::test]
async fn revert_failure_still_punishes() {
    let (guard, _) = guard().await;
    let api = MockApi::new()
        .attributing(EventCategory::ChannelCreate, 7)
        .failing("delete_channel");

    let report = guard
        .handle(&api, GuardEvent::channel_create(1, 600))
        .await
        .unwrap();
    assert_eq!(report.reverted, Some(false));
    assert_eq!(report.punished, Some(true));
    assert!(report.audit_line.contains("revert failed"));
}

#[tokio::test]
async fn punish_failure_still_logs() {
    let (guard, _) = guard().await;
    let api = MockApi::new()
        .attributing(EventCategory::RoleDelete, 7)
        .failing("ban");

    let report = guard
        .handle(&api, GuardEvent::role_delete(1, 300))
        .await
        .unwrap();
    assert_eq!(report.punished, Some(false));
    assert!(report.audit_line.contains("punishment failed"));
    assert_eq!(guard.audit().recent(1, 5).len(), 1);
}

#[tokio::test]
async fn invite_link_is_removed_without_punishment() {
    let (guard, _) = guard().await;
    let api = MockApi::new();

    let ev = GuardEvent::message_send(1, 42, 10, 2000, "join discord.gg/abc123");
    let report = guard.handle(&api, ev).await.unwrap();
    assert_eq!(report.reverted, Some(true));
    assert_eq!(report.punished, None);
    assert!(report.notified);
    assert_eq!(api.count_of("delete_message:10:2000").await, 1);
    assert_eq!(api.count_of("ban:").await, 0);
}

#[tokio::test]
async fn invite_filter_stays_active_with_mass_messages_disabled() {
    let (guard, _) = guard().await;
    let api = MockApi::new();
    guard.settings().configure("anti_mass_messages", "off").await.unwrap();

    let ev = GuardEvent::message_send(1, 42, 10, 2000, "join discord.gg/abc123");
    let report = guard.handle(&api, ev).await.unwrap();
    assert_eq!(report.reverted, Some(true));
    assert!(report.notified);
    assert_eq!(api.count_of("delete_message:10:2000").await, 1);
}

#[tokio::test]
async fn maximum_timeout_duration_dispatches_cleanly() {
    let (guard, _) = guard().await;
    let api = MockApi::new();
    guard.settings().configure("punishment", "timeout").await.unwrap();
    guard.settings().configure("timeout_secs", "31536000").await.unwrap();

    for i in 0..5 {
        guard.handle(&api, flood_msg(42, i, ts(i as i64))).await;
    }
    assert_eq!(api.count_of("timeout:1:42").await, 1);
}

#[tokio::test]
async fn configured_timeout_punishment_is_applied() {
    let (guard, _) = guard().await;
    let api = MockApi::new();
    guard.settings().configure("punishment", "timeout").await.unwrap();
    guard.settings().configure("timeout_secs", "120").await.unwrap();

    for i in 0..4 {
        guard.handle(&api, flood_msg(42, i, ts(i as i64))).await;
    }
    let report = guard.handle(&api, flood_msg(42, 4, ts(4))).await.unwrap();
    assert_eq!(report.punished, Some(true));
    assert_eq!(api.count_of("timeout:1:42").await, 1);
    assert_eq!(api.count_of("ban:").await, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_platform_call_counts_as_failed_phase() {
    let kv = Arc::new(MemoryKv::default());
    let tuning = NukeGuardTuning {
        action_timeout_ms: Some(50),
        ..NukeGuardTuning::default()
    };
    let guard = NukeGuard::bootstrap(tuning, kv).await;
    let api = MockApi::new()
        .attributing(EventCategory::RoleDelete, 7)
        .hanging("ban");

    let report = guard
        .handle(&api, GuardEvent::role_delete(1, 300))
        .await
        .unwrap();
    assert_eq!(report.punished, Some(false));
}

#[tokio::test]
async fn detection_audit_line_is_persisted() {
    let (guard, kv) = guard().await;
    let api = MockApi::new().attributing(EventCategory::MemberBan, 7);

    guard.handle(&api, GuardEvent::member_ban(1, 55)).await.unwrap();

    let recent = guard.audit().recent(1, 5);
    assert_eq!(recent.len(), 1);
    assert!(recent[0].entry.contains("member ban"));
    assert!(kv.load("audit_log").await.unwrap().is_some());
}

#[tokio::test]
async fn mass_detection_flushes_window_snapshot() {
    let (guard, kv) = guard().await;
    let api = MockApi::new();

    for i in 0..5 {
        guard.handle(&api, flood_msg(42, i, ts(i as i64))).await;
    }
    assert!(kv.load("recent_actions").await.unwrap().is_some());
}
