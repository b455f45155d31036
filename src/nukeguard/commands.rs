use anyhow::Result;
use serenity::all::{
    CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType, Context,
    CreateCommand, CreateCommandOption, EditInteractionResponse, GuildId, Interaction, Permissions,
};

use crate::AppContext;

use super::NukeGuard;
use super::settings::{ConfigError, GuardSettings};

pub async fn register_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id
        .create_command(
            &ctx.http,
            CreateCommand::new("nukeguard")
                .description("NukeGuard moderation controls")
                .default_member_permissions(Permissions::ADMINISTRATOR)
                .add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "status",
                    "Show current guard settings",
                ))
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "set",
                        "Change one guard setting",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(
                            CommandOptionType::String,
                            "name",
                            "Setting name",
                        )
                        .required(true),
                    )
                    .add_sub_option(
                        CreateCommandOption::new(
                            CommandOptionType::String,
                            "value",
                            "New value",
                        )
                        .required(true),
                    ),
                )
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "exempt",
                        "Exempt a user from detection",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(CommandOptionType::User, "user", "User to exempt")
                            .required(true),
                    ),
                )
                .add_option(
                    CreateCommandOption::new(
                        CommandOptionType::SubCommand,
                        "unexempt",
                        "Remove a user's exemption",
                    )
                    .add_sub_option(
                        CreateCommandOption::new(CommandOptionType::User, "user", "User to remove")
                            .required(true),
                    ),
                )
                .add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "exemptions",
                    "List exempt users",
                ))
                .add_option(CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "audit",
                    "Show recent guard actions",
                )),
        )
        .await?;
    Ok(())
}

/// Arguments carried by one subcommand invocation.
#[derive(Debug, Default)]
pub struct SubArgs {
    pub name: Option<String>,
    pub value: Option<String>,
    pub user: Option<u64>,
}

/// Command core, kept free of interaction plumbing so it can be exercised
/// directly. Returns the reply text.
pub async fn handle_subcommand(
    guard: &NukeGuard,
    guild_id: u64,
    sub: &str,
    args: &SubArgs,
) -> String {
    match sub {
        "status" => render_settings(&guard.settings().snapshot().await),
        "set" => match (&args.name, &args.value) {
            (Some(name), Some(value)) => match guard.settings().configure(name, value).await {
                Ok(()) => format!("✅ `{name}` set to `{value}`."),
                Err(e @ ConfigError::UnknownSetting(_)) => {
                    format!(
                        "❌ {e}. Valid settings: {}.",
                        GuardSettings::SETTING_NAMES.join(", ")
                    )
                }
                Err(e) => format!("❌ {e}."),
            },
            _ => "missing setting name or value".into(),
        },
        "exempt" => match args.user {
            Some(user_id) => {
                if guard.exemptions().add(user_id).await {
                    format!("✅ <@{user_id}> is now exempt.")
                } else {
                    format!("ℹ️ <@{user_id}> is already exempt.")
                }
            }
            None => "missing user".into(),
        },
        "unexempt" => match args.user {
            Some(user_id) => {
                if guard.exemptions().remove(user_id).await {
                    format!("✅ <@{user_id}> removed from exemptions.")
                } else {
                    format!("ℹ️ <@{user_id}> was not exempt.")
                }
            }
            None => "missing user".into(),
        },
        "exemptions" => {
            let list = guard.exemptions().list().await;
            if list.is_empty() {
                "No exempt users.".into()
            } else {
                let mentions: Vec<String> = list.iter().map(|u| format!("<@{u}>")).collect();
                format!("Exempt users: {}", mentions.join(", "))
            }
        }
        "audit" => {
            let recent = guard.audit().recent(guild_id, 10);
            if recent.is_empty() {
                "Audit log is empty.".into()
            } else {
                recent
                    .iter()
                    .map(|e| format!("• `{}` {}", e.at.format("%Y-%m-%d %H:%M:%S UTC"), e.entry))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        _ => "unknown subcommand".into(),
    }
}

fn render_settings(s: &GuardSettings) -> String {
    let flag = |v: bool| if v { "on" } else { "off" };
    let mut out = String::from("⚙️ **NukeGuard settings**\n");
    out.push_str(&format!("anti_channel_create: {}\n", flag(s.anti_channel_create)));
    out.push_str(&format!("anti_channel_delete: {}\n", flag(s.anti_channel_delete)));
    out.push_str(&format!("anti_role_create: {}\n", flag(s.anti_role_create)));
    out.push_str(&format!("anti_role_delete: {}\n", flag(s.anti_role_delete)));
    out.push_str(&format!("anti_ban: {}\n", flag(s.anti_ban)));
    out.push_str(&format!("anti_kick: {}\n", flag(s.anti_kick)));
    out.push_str(&format!(
        "anti_mass_message_delete: {}\n",
        flag(s.anti_mass_message_delete)
    ));
    out.push_str(&format!("anti_mass_messages: {}\n", flag(s.anti_mass_messages)));
    out.push_str(&format!("anti_invite_links: {}\n", flag(s.anti_invite_links)));
    out.push_str(&format!("punishment: {}\n", s.punishment.as_str()));
    out.push_str(&format!("timeout_secs: {}\n", s.timeout_secs));
    out.push_str(&format!("mass_message_threshold: {}\n", s.mass_message_threshold));
    out.push_str(&format!("mass_message_timeframe: {}", s.mass_message_timeframe));
    out
}

fn caller_is_admin(ctx: &Context, cmd: &CommandInteraction) -> bool {
    if let Some(member) = cmd.member.as_deref() {
        #[allow(deprecated)]
        if let Ok(perms) = member.permissions(&ctx.cache) {
            return perms.administrator();
        }
    }
    false
}

fn extract_args(sub: &CommandDataOption) -> SubArgs {
    let mut args = SubArgs::default();
    if let CommandDataOptionValue::SubCommand(options) = &sub.value {
        for o in options {
            match (&o.name[..], &o.value) {
                ("name", CommandDataOptionValue::String(s)) => args.name = Some(s.clone()),
                ("value", CommandDataOptionValue::String(s)) => args.value = Some(s.clone()),
                ("user", CommandDataOptionValue::User(id)) => args.user = Some(id.get()),
                _ => {}
            }
        }
    }
    args
}

/// Interaction entry point for `/nukeguard`.
pub async fn on_interaction(ctx: &Context, app: &AppContext, interaction: Interaction) {
    let Some(cmd) = interaction.command() else {
        return;
    };
    if cmd.data.name != "nukeguard" {
        return;
    }
    let Some(guild_id) = cmd.guild_id else {
        return;
    };
    if let Err(e) = cmd.defer_ephemeral(&ctx.http).await {
        tracing::warn!(error = ?e, "failed to defer nukeguard interaction");
    }

    let content = if !caller_is_admin(ctx, &cmd) {
        "missing permission".to_string()
    } else if let Some(sub) = cmd.data.options.first() {
        let args = extract_args(sub);
        let guard = app.nukeguard();
        handle_subcommand(&guard, guild_id.get(), &sub.name, &args).await
    } else {
        "unknown subcommand".to_string()
    };

    if let Err(e) = cmd
        .edit_response(&ctx.http, EditInteractionResponse::new().content(content))
        .await
    {
        tracing::warn!(error = ?e, "failed to edit nukeguard response");
    }
}
