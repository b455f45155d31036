// src/lib.rs

pub mod config;
pub mod db;
pub mod discord;
pub mod logging;
pub mod nukeguard;

use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;

use config::Settings;
use db::KvStore;
use nukeguard::NukeGuard;

use serenity::all::GatewayIntents;

/// Application context: configuration, the persistence handle and the guard
/// service. One instance for the process lifetime, shared by the gateway
/// handler and the status endpoint.
#[derive(Debug)]
pub struct AppContext {
    pub settings: Settings,
    pub kv: Arc<dyn KvStore>,
    nukeguard: OnceCell<Arc<NukeGuard>>,
}

impl AppContext {
    /// Bootstrap the whole application:
    /// - logging
    /// - storage (Postgres when configured, in-memory otherwise)
    /// - the NukeGuard service with its background sweeper
    /// - the optional status endpoint
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        logging::init(&settings);

        let kv: Arc<dyn KvStore> = match settings.database.url.as_deref() {
            Some(url) => {
                let db = db::connect(url, settings.database.max_connections).await?;
                db::ensure_tables(&db).await?;
                Arc::new(db::PgKv::new(db))
            }
            None => {
                tracing::warn!("no database configured, guard state will not survive a restart");
                Arc::new(db::MemoryKv::default())
            }
        };

        let ctx = Arc::new(Self {
            settings,
            kv: kv.clone(),
            nukeguard: OnceCell::new(),
        });

        let guard = NukeGuard::bootstrap(ctx.settings.nukeguard.clone(), kv).await;
        guard.spawn_sweeper();
        if let Some(addr) = ctx.settings.nukeguard.http_addr.clone() {
            nukeguard::api::spawn(addr, guard.clone());
        }
        let _ = ctx.nukeguard.set(guard);

        Ok(ctx)
    }

    pub fn nukeguard(&self) -> Arc<NukeGuard> {
        self.nukeguard
            .get()
            .expect("NukeGuard not initialized")
            .clone()
    }

    /// Environment name: "production" | "development".
    /// Read from `LSS_ENV`; absent means "development".
    #[inline]
    pub fn env(&self) -> String {
        std::env::var("LSS_ENV").unwrap_or_else(|_| "development".to_string())
    }
}

/// Gateway intents the guard needs:
/// - GUILDS for channel/role lifecycle,
/// - GUILD_MODERATION for bans,
/// - GUILD_MEMBERS for removals,
/// - GUILD_MESSAGES + MESSAGE_CONTENT for floods and invite filtering.
pub fn default_gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::MESSAGE_CONTENT
}

/// Start the Discord client (gateway + slash commands).
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    discord::run_bot(ctx).await
}
