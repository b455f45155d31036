// src/discord/mod.rs
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;

use serenity::all::*;
use serenity::async_trait;
use serenity::model::guild::audit_log::{Action, ChannelAction, MemberAction, RoleAction};

use crate::AppContext;
use crate::nukeguard::event::{EventCategory, GuardEvent};
use crate::nukeguard::{GuardApi, commands};

/// Production [GuardApi]: attribution through the guild audit log plus the
/// remediation calls, all over the serenity HTTP client.
pub struct SerenityApi {
    http: Arc<Http>,
    self_id: u64,
}

impl SerenityApi {
    pub fn from_ctx(ctx: &Context) -> Self {
        Self {
            http: ctx.http.clone(),
            self_id: ctx.cache.current_user().id.get(),
        }
    }
}

/// Does an audit-log entry describe an action of this category?
fn action_matches(action: &Action, category: EventCategory) -> bool {
    match (action, category) {
        (Action::Channel(ChannelAction::Create), EventCategory::ChannelCreate) => true,
        (Action::Channel(ChannelAction::Delete), EventCategory::ChannelDelete) => true,
        (Action::Role(RoleAction::Create), EventCategory::RoleCreate) => true,
        (Action::Role(RoleAction::Delete), EventCategory::RoleDelete) => true,
        (Action::Member(MemberAction::BanAdd), EventCategory::MemberBan) => true,
        (Action::Member(MemberAction::Kick), EventCategory::MemberKick) => true,
        _ => false,
    }
}

#[async_trait]
impl GuardApi for SerenityApi {
    fn self_id(&self) -> u64 {
        self.self_id
    }

    async fn latest_actor(&self, guild_id: u64, category: EventCategory) -> Result<Option<u64>> {
        let audit = GuildId::new(guild_id)
            .audit_logs(&self.http, None, None, None, Some(10))
            .await?;
        for entry in audit.entries {
            if action_matches(&entry.action, category) {
                return Ok(Some(entry.user_id.get()));
            }
        }
        Ok(None)
    }

    async fn delete_channel(&self, _guild_id: u64, channel_id: u64) -> Result<()> {
        ChannelId::new(channel_id).delete(&self.http).await?;
        Ok(())
    }

    async fn delete_role(&self, guild_id: u64, role_id: u64) -> Result<()> {
        GuildId::new(guild_id)
            .delete_role(&self.http, RoleId::new(role_id))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<()> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await?;
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64) -> Result<()> {
        GuildId::new(guild_id)
            .unban(&self.http, UserId::new(user_id))
            .await?;
        Ok(())
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        GuildId::new(guild_id)
            .kick_with_reason(&self.http, UserId::new(user_id), reason)
            .await?;
        Ok(())
    }

    async fn ban(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<()> {
        GuildId::new(guild_id)
            .ban_with_reason(&self.http, UserId::new(user_id), 0, reason)
            .await?;
        Ok(())
    }

    async fn timeout(
        &self,
        guild_id: u64,
        user_id: u64,
        until: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        GuildId::new(guild_id)
            .edit_member(
                &self.http,
                UserId::new(user_id),
                EditMember::new().disable_communication_until_datetime(until.into()),
            )
            .await?;
        Ok(())
    }

    async fn notify(&self, channel_id: u64, text: &str) -> Result<()> {
        ChannelId::new(channel_id).say(&self.http, text).await?;
        Ok(())
    }
}

pub struct Handler {
    pub app: Arc<AppContext>,
}

impl Handler {
    /// Hand one normalized event to the guard. Errors never leave here.
    async fn feed(&self, ctx: &Context, event: GuardEvent) {
        let api = SerenityApi::from_ctx(ctx);
        self.app.nukeguard().handle(&api, event).await;
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!("Logged in as {}", ready.user.name);

        for g in ready.guilds {
            if let Err(e) = commands::register_commands(&ctx, g.id).await {
                tracing::warn!(error = ?e, gid = %g.id.get(), "register nukeguard commands failed");
            }
        }
    }

    async fn guild_create(&self, ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if let Err(e) = commands::register_commands(&ctx, guild.id).await {
            tracing::warn!(error = ?e, gid = %guild.id.get(), "register nukeguard commands failed");
        }
    }

    async fn channel_create(&self, ctx: Context, channel: GuildChannel) {
        self.feed(
            &ctx,
            GuardEvent::channel_create(channel.guild_id.get(), channel.id.get()),
        )
        .await;
    }

    async fn channel_delete(
        &self,
        ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        self.feed(
            &ctx,
            GuardEvent::channel_delete(channel.guild_id.get(), channel.id.get()),
        )
        .await;
    }

    async fn guild_role_create(&self, ctx: Context, new: Role) {
        self.feed(&ctx, GuardEvent::role_create(new.guild_id.get(), new.id.get()))
            .await;
    }

    async fn guild_role_delete(
        &self,
        ctx: Context,
        guild_id: GuildId,
        removed_role_id: RoleId,
        _removed_role: Option<Role>,
    ) {
        self.feed(
            &ctx,
            GuardEvent::role_delete(guild_id.get(), removed_role_id.get()),
        )
        .await;
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        self.feed(
            &ctx,
            GuardEvent::member_ban(guild_id.get(), banned_user.id.get()),
        )
        .await;
    }

    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        // Ordinary leaves land here too; the audit-log attribution decides
        // whether this was a kick.
        self.feed(&ctx, GuardEvent::member_kick(guild_id.get(), user.id.get()))
            .await;
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        _message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let Some(gid) = guild_id else {
            return;
        };
        self.feed(&ctx, GuardEvent::message_delete(gid.get(), channel_id.get()))
            .await;
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(gid) = msg.guild_id else {
            return;
        };
        if msg.author.bot {
            return;
        }
        self.feed(
            &ctx,
            GuardEvent::message_send(
                gid.get(),
                msg.author.id.get(),
                msg.channel_id.get(),
                msg.id.get(),
                &msg.content,
            ),
        )
        .await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let fut = commands::on_interaction(&ctx, &self.app, interaction);
        if AssertUnwindSafe(fut).catch_unwind().await.is_err() {
            tracing::error!("interaction handler panicked");
        }
    }
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "GUILD_MODERATION" => i |= GatewayIntents::GUILD_MODERATION,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            _ => {}
        }
    }
    i
}

/// Intents from the configured name list; an empty list means the full
/// guard set.
fn resolve_intents(names: &[String]) -> GatewayIntents {
    if names.is_empty() {
        return crate::default_gateway_intents();
    }
    intents_from_settings(names)
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Discord token missing (LSS_DISCORD_TOKEN). Set it in .env.");
    }

    let intents = resolve_intents(&ctx.settings.discord.intents);

    let handler = Handler { app: ctx.clone() };

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    tracing::info!("Discord client starting…");
    client.start().await?;
    Ok(())
}
