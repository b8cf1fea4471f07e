//! Operator slash commands
//!
//! Every command is a thin wrapper over [`AdminService`](crate::admin::AdminService).
//! Validation failures come back as errors, which the framework's error hook
//! shows to the invoking user.

use crate::admin::MentionRole;
use crate::model::Emote;
use crate::platform::member_view;
use crate::reporting::ChannelKind;
use crate::storage::ReactionBan;
use crate::{Context, Engine, Error};
use poise::command;
use poise::serenity_prelude::{GuildChannel, GuildId, Mentionable, Role, User};
use std::fmt::Write;

/// Discord's message length limit, with some room for a trailer
const MAX_REPLY_LEN: usize = 1900;

fn engine<'a>(ctx: Context<'a>) -> Result<&'a Engine, Error> {
    ctx.data()
        .engine()
        .ok_or_else(|| "I am still starting up, try again in a moment.".into())
}

fn guild_id(ctx: Context<'_>) -> Result<GuildId, Error> {
    Ok(ctx.guild_id().ok_or("This command only works in a server.")?)
}

/// Only admins of the guild (or bot owners) may run configuration commands
async fn admin_check(ctx: Context<'_>) -> Result<bool, Error> {
    let (Some(guild_id), Some(engine)) = (ctx.guild_id(), ctx.data().engine()) else {
        return Ok(false);
    };
    let Some(member) = ctx.author_member().await else {
        return Ok(false);
    };
    Ok(engine.admin.is_admin(guild_id, &member_view(&member))?)
}

fn parse_emote(input: &str) -> Result<Emote, Error> {
    Ok(Emote::parse(input).ok_or("That is not a valid emoji or custom emote.")?)
}

/// Manage the global ban list and whether this server enforces it
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("globalbans_enable", "globalbans_disable", "globalbans_add", "globalbans_remove", "globalbans_list"),
    subcommand_required
)]
pub async fn globalbans(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Enforce the global ban list in this server
#[command(slash_command, guild_only, check = "admin_check", rename = "enable")]
pub async fn globalbans_enable(ctx: Context<'_>) -> Result<(), Error> {
    engine(ctx)?.admin.set_global_bans(guild_id(ctx)?, true)?;
    ctx.say("Global bans are now enforced here.").await?;
    Ok(())
}

/// Stop enforcing the global ban list in this server
#[command(slash_command, guild_only, check = "admin_check", rename = "disable")]
pub async fn globalbans_disable(ctx: Context<'_>) -> Result<(), Error> {
    engine(ctx)?.admin.set_global_bans(guild_id(ctx)?, false)?;
    ctx.say("Global bans are no longer enforced here.").await?;
    Ok(())
}

/// Add a user to the global ban list (bot owners only)
#[command(slash_command, guild_only, check = "admin_check", rename = "add")]
pub async fn globalbans_add(
    ctx: Context<'_>,
    #[description = "User to ban everywhere"] user: User,
    #[description = "Why they are banned"] reason: String,
) -> Result<(), Error> {
    let ban = engine(ctx)?
        .admin
        .add_global_ban(ctx.author().id, user.id, &reason)?;
    ctx.say(format!(
        "{} is now on the global ban list: {}",
        user.id.mention(),
        ban.reason
    ))
    .await?;
    Ok(())
}

/// Remove a user from the global ban list. Existing bans stay in place.
#[command(slash_command, guild_only, check = "admin_check", rename = "remove")]
pub async fn globalbans_remove(
    ctx: Context<'_>,
    #[description = "User to remove"] user: User,
) -> Result<(), Error> {
    let removed = engine(ctx)?
        .admin
        .remove_global_ban(ctx.author().id, user.id)?;
    let reply = if removed {
        format!("{} was removed from the global ban list.", user.id.mention())
    } else {
        format!("{} is not on the global ban list.", user.id.mention())
    };
    ctx.say(reply).await?;
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "list")]
pub async fn globalbans_list(ctx: Context<'_>) -> Result<(), Error> {
    let bans = engine(ctx)?.admin.list_global_bans();
    if bans.is_empty() {
        ctx.say("The global ban list is empty.").await?;
        return Ok(());
    }

    let mut reply = format!("{} global bans:\n", bans.len());
    for ban in &bans {
        let line = format!("{} ({}): {}\n", ban.user().mention(), ban.user_id, ban.reason);
        if reply.len() + line.len() > MAX_REPLY_LEN {
            reply.push_str("...");
            break;
        }
        reply.push_str(&line);
    }
    ctx.say(reply).await?;
    Ok(())
}

/// Manage the role every member gets
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("memberrole_set", "memberrole_reset"),
    subcommand_required
)]
pub async fn memberrole(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "set")]
pub async fn memberrole_set(
    ctx: Context<'_>,
    #[description = "Role to give every member"] role: Role,
) -> Result<(), Error> {
    engine(ctx)?
        .admin
        .set_member_role(guild_id(ctx)?, Some(role.id))?;
    ctx.say(format!("Members will now get {}.", role.name)).await?;
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "reset")]
pub async fn memberrole_reset(ctx: Context<'_>) -> Result<(), Error> {
    engine(ctx)?.admin.set_member_role(guild_id(ctx)?, None)?;
    ctx.say("Member role removed.").await?;
    Ok(())
}

/// Where reports and moderation logs are posted
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("channels_reporting", "channels_log"),
    subcommand_required
)]
pub async fn channels(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

async fn set_channel(
    ctx: Context<'_>,
    kind: ChannelKind,
    channel: Option<GuildChannel>,
) -> Result<(), Error> {
    engine(ctx)?
        .admin
        .set_channel(guild_id(ctx)?, kind, channel.as_ref().map(|c| c.id))?;
    let reply = match channel {
        Some(channel) => format!("The {kind} channel is now {}.", channel.id.mention()),
        None => format!("The {kind} channel was reset."),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Set the reporting channel, or reset it when no channel is given
#[command(slash_command, guild_only, check = "admin_check", rename = "reporting")]
pub async fn channels_reporting(
    ctx: Context<'_>,
    #[description = "Channel for reports"] channel: Option<GuildChannel>,
) -> Result<(), Error> {
    set_channel(ctx, ChannelKind::Reporting, channel).await
}

/// Set the moderation log channel, or reset it when no channel is given
#[command(slash_command, guild_only, check = "admin_check", rename = "log")]
pub async fn channels_log(
    ctx: Context<'_>,
    #[description = "Channel for the moderation log"] channel: Option<GuildChannel>,
) -> Result<(), Error> {
    set_channel(ctx, ChannelKind::Log, channel).await
}

/// Mention stand-in roles, ignored roles and stored member roles
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("roles_everyone", "roles_here", "roles_ignore", "roles_unignore", "roles_stored"),
    subcommand_required
)]
pub async fn roles(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

async fn set_mention_role(
    ctx: Context<'_>,
    which: MentionRole,
    role: Option<Role>,
) -> Result<(), Error> {
    engine(ctx)?
        .admin
        .set_mention_role(guild_id(ctx)?, which, role.as_ref().map(|r| r.id))?;
    let reply = match role {
        Some(role) => format!("Pinging @{which} now earns {}.", role.name),
        None => format!("The @{which} role was reset."),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Role given to members who ping @everyone
#[command(slash_command, guild_only, check = "admin_check", rename = "everyone")]
pub async fn roles_everyone(
    ctx: Context<'_>,
    #[description = "Leave empty to reset"] role: Option<Role>,
) -> Result<(), Error> {
    set_mention_role(ctx, MentionRole::Everyone, role).await
}

/// Role given to members who ping @here
#[command(slash_command, guild_only, check = "admin_check", rename = "here")]
pub async fn roles_here(
    ctx: Context<'_>,
    #[description = "Leave empty to reset"] role: Option<Role>,
) -> Result<(), Error> {
    set_mention_role(ctx, MentionRole::Here, role).await
}

/// Never give this role back to returning members
#[command(slash_command, guild_only, check = "admin_check", rename = "ignore")]
pub async fn roles_ignore(ctx: Context<'_>, role: Role) -> Result<(), Error> {
    let changed = engine(ctx)?
        .admin
        .set_ignored_role(guild_id(ctx)?, role.id, true);
    let reply = if changed {
        format!("{} will no longer be restored.", role.name)
    } else {
        format!("{} was already ignored.", role.name)
    };
    ctx.say(reply).await?;
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "unignore")]
pub async fn roles_unignore(ctx: Context<'_>, role: Role) -> Result<(), Error> {
    let changed = engine(ctx)?
        .admin
        .set_ignored_role(guild_id(ctx)?, role.id, false);
    let reply = if changed {
        format!("{} will be restored again.", role.name)
    } else {
        format!("{} was not ignored.", role.name)
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show the roles stored for a member
#[command(slash_command, guild_only, check = "admin_check", rename = "stored")]
pub async fn roles_stored(ctx: Context<'_>, user: User) -> Result<(), Error> {
    let reply = match engine(ctx)?.stored_roles(guild_id(ctx)?, user.id) {
        None => format!("Nothing is stored for {}.", user.id.mention()),
        Some(roles) if roles.is_empty() => format!("{} has no stored roles.", user.id.mention()),
        Some(roles) => {
            let mut reply = format!("Stored roles of {}:", user.id.mention());
            for role_id in roles {
                let _ = write!(reply, " <@&{role_id}>");
            }
            reply
        }
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Users and roles allowed to configure the bot in this server
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("admins_addrole", "admins_removerole", "admins_adduser", "admins_removeuser"),
    subcommand_required
)]
pub async fn admins(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

async fn changed_reply(ctx: Context<'_>, changed: bool, what: String) -> Result<(), Error> {
    let reply = if changed {
        format!("Done, {what}.")
    } else {
        format!("Nothing to do, {what} already.")
    };
    ctx.say(reply).await?;
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "addrole")]
pub async fn admins_addrole(ctx: Context<'_>, role: Role) -> Result<(), Error> {
    let changed = engine(ctx)?.admin.set_admin_role(guild_id(ctx)?, role.id, true);
    changed_reply(ctx, changed, format!("{} is an admin role", role.name)).await
}

#[command(slash_command, guild_only, check = "admin_check", rename = "removerole")]
pub async fn admins_removerole(ctx: Context<'_>, role: Role) -> Result<(), Error> {
    let changed = engine(ctx)?.admin.set_admin_role(guild_id(ctx)?, role.id, false);
    changed_reply(ctx, changed, format!("{} is not an admin role", role.name)).await
}

#[command(slash_command, guild_only, check = "admin_check", rename = "adduser")]
pub async fn admins_adduser(ctx: Context<'_>, user: User) -> Result<(), Error> {
    let changed = engine(ctx)?.admin.set_admin_user(guild_id(ctx)?, user.id, true);
    changed_reply(ctx, changed, format!("{} is an admin", user.id.mention())).await
}

#[command(slash_command, guild_only, check = "admin_check", rename = "removeuser")]
pub async fn admins_removeuser(ctx: Context<'_>, user: User) -> Result<(), Error> {
    let changed = engine(ctx)?.admin.set_admin_user(guild_id(ctx)?, user.id, false);
    changed_reply(ctx, changed, format!("{} is not an admin", user.id.mention())).await
}

/// Ban anyone who reacts with an emote in a channel
#[command(
    slash_command,
    guild_only,
    check = "admin_check",
    subcommands("reactionban_add", "reactionban_remove", "reactionban_list"),
    subcommand_required
)]
pub async fn reactionban(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "add")]
pub async fn reactionban_add(
    ctx: Context<'_>,
    #[description = "Channel to watch"] channel: GuildChannel,
    #[description = "Emoji or custom emote"] emote: String,
) -> Result<(), Error> {
    let emote = parse_emote(&emote)?;
    engine(ctx)?
        .admin
        .add_reaction_ban(guild_id(ctx)?, channel.id, &emote)?;
    ctx.say(format!(
        "Reacting with {emote} in {} now gets you banned.",
        channel.id.mention()
    ))
    .await?;
    Ok(())
}

#[command(slash_command, guild_only, check = "admin_check", rename = "remove")]
pub async fn reactionban_remove(
    ctx: Context<'_>,
    #[description = "Watched channel"] channel: GuildChannel,
    #[description = "Emoji or custom emote"] emote: String,
) -> Result<(), Error> {
    let emote = parse_emote(&emote)?;
    let removed = engine(ctx)?.admin.remove_reaction_ban(channel.id, &emote);
    let reply = if removed {
        format!("Reaction ban on {emote} in {} removed.", channel.id.mention())
    } else {
        format!("There is no reaction ban on {emote} in {}.", channel.id.mention())
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Show the reaction bans of a channel
#[command(slash_command, guild_only, check = "admin_check", rename = "list")]
pub async fn reactionban_list(
    ctx: Context<'_>,
    #[description = "Watched channel"] channel: GuildChannel,
) -> Result<(), Error> {
    let bans = engine(ctx)?.admin.list_reaction_bans(channel.id);
    if bans.is_empty() {
        ctx.say(format!("No reaction bans in {}.", channel.id.mention()))
            .await?;
        return Ok(());
    }

    let emotes: Vec<_> = bans.iter().map(ReactionBan::emote_label).collect();
    ctx.say(format!(
        "Reaction bans in {}: {}",
        channel.id.mention(),
        emotes.join(" ")
    ))
    .await?;
    Ok(())
}

/// Every command to register with the framework
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        globalbans(),
        memberrole(),
        channels(),
        roles(),
        admins(),
        reactionban(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subcommand_names(cmd: &poise::Command<crate::Data, Error>) -> Vec<String> {
        cmd.subcommands.iter().map(|c| c.name.clone()).collect()
    }

    #[test]
    fn test_top_level_commands() {
        let names: Vec<_> = all().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["globalbans", "memberrole", "channels", "roles", "admins", "reactionban"]
        );
    }

    #[test]
    fn test_commands_are_guild_only_and_checked() {
        for cmd in all() {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
            assert_eq!(cmd.checks.len(), 1, "{} should have the admin check", cmd.name);
            assert!(cmd.subcommand_required);
            assert!(cmd.create_as_slash_command().is_some());
            for sub in &cmd.subcommands {
                assert_eq!(sub.checks.len(), 1, "{} {} is unchecked", cmd.name, sub.name);
            }
        }
    }

    #[test]
    fn test_globalbans_subcommands() {
        let cmd = globalbans();
        assert_eq!(
            subcommand_names(&cmd),
            vec!["enable", "disable", "add", "remove", "list"]
        );
        assert!(
            cmd.subcommands[2]
                .description
                .as_deref()
                .unwrap_or_default()
                .contains("bot owners only")
        );
    }

    #[test]
    fn test_reactionban_subcommands_take_channel_and_emote() {
        let cmd = reactionban();
        assert_eq!(subcommand_names(&cmd), vec!["add", "remove", "list"]);
        let params: Vec<Vec<_>> = cmd
            .subcommands
            .iter()
            .map(|sub| sub.parameters.iter().map(|p| p.name.clone()).collect())
            .collect();
        assert_eq!(
            params,
            vec![
                vec!["channel", "emote"],
                vec!["channel", "emote"],
                vec!["channel"],
            ]
        );
    }

    #[test]
    fn test_parse_emote_rejects_malformed_input() {
        assert!(parse_emote("   ").is_err());
        assert!(parse_emote("<:pog:0>").is_err());
        assert!(matches!(parse_emote("<:pog:42>"), Ok(Emote::Custom { .. })));
    }
}
