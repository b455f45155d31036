use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub env: String,
    pub app: App,
    pub discord: Discord,
    pub database: Database,
    pub logging: Logging,
    pub nukeguard: NukeGuardTuning,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct App {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Discord {
    pub token: String,
    pub app_id: Option<String>,
    pub intents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Database {
    /// When unset the process runs with an in-memory store (state is lost
    /// on restart).
    pub url: Option<String>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logging {
    pub level: Option<String>,
}

/// Process-level tuning for the guard. Distinct from the runtime-mutable
/// moderation settings, which live in the persisted settings store.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NukeGuardTuning {
    /// Upper bound on each remediation platform call, milliseconds.
    pub action_timeout_ms: Option<u64>,
    /// How often the stale-window sweeper runs, seconds.
    pub sweep_interval_secs: Option<u64>,
    /// Bind address for the read-only status endpoint; unset disables it.
    pub http_addr: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let env = std::env::var("LSS_ENV").unwrap_or_else(|_| "development".to_string());

        // .env.<env> first, then .env; both optional.
        let _ = dotenvy::from_filename(format!(".env.{}", env));
        let _ = dotenvy::dotenv();

        #[derive(Deserialize, Serialize)]
        struct Defaults {
            env: String,
            app: App,
            discord: Discord,
            database: Database,
            logging: Logging,
            nukeguard: NukeGuardTuning,
        }

        let defaults = Defaults {
            env: env.clone(),
            app: App {
                name: "Lynx Sentinel".into(),
            },
            discord: Discord {
                token: "".into(),
                app_id: None,
                intents: vec![
                    "GUILDS".into(),
                    "GUILD_MEMBERS".into(),
                    "GUILD_MESSAGES".into(),
                    "GUILD_MODERATION".into(),
                    "MESSAGE_CONTENT".into(),
                ],
            },
            database: Database {
                url: None,
                max_connections: Some(10),
            },
            logging: Logging {
                level: Some("info".into()),
            },
            nukeguard: NukeGuardTuning::default(),
        };

        // Layers: code defaults -> config/<env>.toml -> LSS_* env vars
        // (LSS_DATABASE_URL => database.url and so on).
        let figment = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(format!("config/{}.toml", env)))
            .merge(Env::prefixed("LSS_").split("_"));

        let mut s: Settings = figment.extract()?;
        s.env = env;

        if s.database.max_connections.is_none() {
            s.database.max_connections = Some(10);
        }

        Ok(s)
    }
}
