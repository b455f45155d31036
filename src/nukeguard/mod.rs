use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serenity::async_trait;

use crate::config::NukeGuardTuning;
use crate::db::KvStore;

pub mod api;
pub mod audit;
pub mod commands;
pub mod detector;
pub mod dispatcher;
pub mod event;
pub mod exemptions;
pub mod settings;
pub mod window;

use audit::AuditLog;
use detector::Detector;
use event::{DetectionRule, DispatchReport, EventCategory, GuardEvent, Verdict};
use exemptions::ExemptionRegistry;
use settings::SettingsStore;

/// Storage key for the window snapshot persisted after mass detections.
const RECENT_ACTIONS_KEY: &str = "recent_actions";

/// Platform operations the guard needs: audit-log attribution plus the
/// remediation calls. The gateway layer provides the real implementation;
/// tests substitute recording mocks.
#[async_trait]
pub trait GuardApi: Send + Sync {
    /// The bot's own user id. Its actions never count as hostile.
    fn self_id(&self) -> u64;

    /// Most recent audit-log actor for a matching action, if the platform
    /// kept one.
    async fn latest_actor(&self, guild_id: u64, category: EventCategory) -> Result<Option<u64>>;

    async fn delete_channel(&self, guild_id: u64, channel_id: u64) -> Result<()>;
    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<()>;
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()>;
    async fn unban(&self, guild_id: u64, user_id: u64) -> Result<()>;
    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()>;
    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()>;
    async fn timeout(&self, guild_id: u64, user_id: u64, until: DateTime<Utc>) -> Result<()>;
    async fn notify(&self, channel_id: u64, text: &str) -> Result<()>;
}

/// The guard service: runtime settings, exemptions, detection state and the
/// audit trail behind one handle on [crate::AppContext]. Handles one event
/// at a time end to end; nothing in here panics the event loop.
#[derive(Debug)]
pub struct NukeGuard {
    tuning: NukeGuardTuning,
    settings: SettingsStore,
    exemptions: ExemptionRegistry,
    detector: Detector,
    audit: AuditLog,
    kv: Arc<dyn KvStore>,
}

impl NukeGuard {
    /// Build the service, loading persisted state. Missing or unreadable
    /// keys fall back to defaults.
    pub async fn bootstrap(tuning: NukeGuardTuning, kv: Arc<dyn KvStore>) -> Arc<Self> {
        let settings = SettingsStore::load(kv.clone()).await;
        let exemptions = ExemptionRegistry::load(kv.clone()).await;
        let audit = AuditLog::load(kv.clone()).await;
        Arc::new(Self {
            tuning,
            settings,
            exemptions,
            detector: Detector::new(),
            audit,
            kv,
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn exemptions(&self) -> &ExemptionRegistry {
        &self.exemptions
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Feed one event through detect → dispatch → log. Failures inside are
    /// logged and absorbed; the gateway never sees an error from here.
    pub async fn handle(&self, api: &impl GuardApi, event: GuardEvent) -> Option<DispatchReport> {
        let settings = self.settings.snapshot().await;
        let verdict = self
            .detector
            .evaluate(api, &settings, &self.exemptions, &event)
            .await?;

        tracing::warn!(
            guild_id = event.guild_id,
            category = ?event.category,
            verdict = ?verdict,
            "nukeguard verdict"
        );

        let timeout = Duration::from_millis(self.tuning.action_timeout_ms.unwrap_or(10_000));
        let report = dispatcher::dispatch(api, &settings, timeout, &event, &verdict).await;

        self.audit.append(event.guild_id, report.audit_line.clone()).await;
        if matches!(
            verdict,
            Verdict::Detected {
                rule: DetectionRule::Mass(_),
                ..
            }
        ) {
            self.flush_windows().await;
        }
        Some(report)
    }

    /// Persist the current window snapshot (best effort).
    async fn flush_windows(&self) {
        let snap = self.detector.windows_snapshot().await;
        match serde_json::to_value(&snap) {
            Ok(v) => {
                if let Err(e) = self.kv.save(RECENT_ACTIONS_KEY, &v).await {
                    tracing::warn!(error = ?e, "window snapshot persist failed");
                }
            }
            Err(e) => tracing::warn!(error = ?e, "window snapshot serialize failed"),
        }
    }

    /// Drop windows whose newest entry fell behind the active timeframe.
    pub async fn sweep_windows(&self) -> usize {
        let timeframe = self.settings.snapshot().await.mass_message_timeframe;
        self.detector
            .sweep_stale(Utc::now(), chrono::Duration::seconds(timeframe as i64))
            .await
    }

    /// Background hygiene: periodically reclaim dead windows so idle guilds
    /// and long-gone spammers do not pin memory.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let guard = self.clone();
        let every = Duration::from_secs(guard.tuning.sweep_interval_secs.unwrap_or(300));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let removed = guard.sweep_windows().await;
                if removed > 0 {
                    tracing::debug!(removed, "swept stale windows");
                }
            }
        });
    }
}
