use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::model::voice::VoiceState;
use serenity::prelude::{Context, EventHandler};
use tracing::{error, info, warn};

use crate::audio::SpeakerId;
use crate::commands::Command;
use crate::error::RecorderError;
use crate::session::{CommandOrigin, SessionManager, SessionStatus, StopSummary, TestRecordReport};
use crate::voice::{ChannelKey, GuildKey};

/// Discord caps message content at 2000 characters
const MAX_MESSAGE_CHARS: usize = 1900;

/// Serenity event handler routing text commands and voice-state changes to
/// the session manager.
pub struct Handler {
    manager: Arc<SessionManager>,
    prefix: String,
}

impl Handler {
    pub fn new(manager: Arc<SessionManager>, prefix: impl Into<String>) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
        }
    }

    async fn dispatch(
        &self,
        ctx: &Context,
        msg: &Message,
        command: Command,
    ) -> Result<String, RecorderError> {
        let guild_id = msg.guild_id.ok_or(RecorderError::NotInGuild)?;
        let origin = CommandOrigin {
            guild: GuildKey(guild_id.get()),
            voice_channel: author_voice_channel(ctx, guild_id, msg.author.id)
                .map(|c| ChannelKey(c.get())),
            reply_channel: ChannelKey(msg.channel_id.get()),
        };

        match command {
            Command::Record => {
                let session = self.manager.start(origin).await?;
                let channel = session.voice_channel().await;
                Ok(format!(
                    "Started recording in {}.\nA new file is started every {} minutes.\nSaving to: {}",
                    channel_name(ctx, guild_id, channel),
                    self.manager.config().segment_length.as_secs() / 60,
                    session.output_dir().display()
                ))
            }
            Command::Stop => {
                let summary = self.manager.stop(origin.guild).await?;
                Ok(stop_message(&summary))
            }
            Command::Status => match self.manager.status(origin.guild).await {
                Some(status) => {
                    let channel = ChannelId::new(status.voice_channel.0);
                    Ok(status_message(
                        &status,
                        &channel_name(ctx, guild_id, status.voice_channel),
                        &participants(ctx, guild_id, channel),
                    ))
                }
                None => Ok("Not recording.".to_string()),
            },
            Command::TestRecord => {
                let channel = origin.voice_channel.ok_or(RecorderError::NotInVoiceChannel)?;
                self.manager.ensure_idle(origin.guild).await?;

                let participants = participants(ctx, guild_id, ChannelId::new(channel.0));
                say(
                    ctx,
                    msg.channel_id,
                    format!(
                        "Starting a {}s test recording in {}.\nParticipants: {}",
                        self.manager.config().test_duration.as_secs(),
                        channel_name(ctx, guild_id, channel),
                        join_or_none(&participants)
                    ),
                )
                .await;

                let report = self.manager.test_record(origin).await?;
                Ok(test_record_message(ctx, guild_id, &report))
            }
            Command::Help => Ok(Command::help_text(&self.prefix)),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(
            "Logged in as {} ({} guild(s))",
            ready.user.name,
            ready.guilds.len()
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(command) = Command::parse(&self.prefix, &msg.content) else {
            return;
        };

        info!(
            user = %msg.author.name,
            guild = ?msg.guild_id.map(|g| g.get()),
            "Command: {}",
            command.name()
        );

        let reply = match self.dispatch(&ctx, &msg, command).await {
            Ok(text) => text,
            Err(e) => {
                if e.is_user_error() {
                    info!("Rejected {}: {}", command.name(), e);
                } else {
                    error!("{} failed: {}", command.name(), e);
                }
                user_message(&e)
            }
        };

        say(&ctx, msg.channel_id, reply).await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(old) = old else {
            return;
        };
        let Some(left_channel) = old.channel_id else {
            return;
        };
        if new.channel_id == Some(left_channel) {
            return;
        }
        let Some(guild_id) = new.guild_id.or(old.guild_id) else {
            return;
        };

        // Only the channel being recorded matters
        let Some(remaining) = humans_in_channel(&ctx, guild_id, left_channel) else {
            warn!(guild = guild_id.get(), "Guild not cached, ignoring voice update");
            return;
        };

        if let Some(summary) = self
            .manager
            .handle_member_left(
                GuildKey(guild_id.get()),
                ChannelKey(left_channel.get()),
                remaining,
            )
            .await
        {
            info!(
                guild = guild_id.get(),
                "Auto-stopped after {} segment(s)",
                summary.segments_closed
            );
        }
    }
}

/// Post `text` to `channel`, truncated to the message limit.
pub(crate) async fn say(ctx: &Context, channel: ChannelId, text: String) {
    if let Err(e) = channel.say(&ctx.http, truncate(text)).await {
        error!(channel = channel.get(), "Failed to send message: {}", e);
    }
}

pub(crate) fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
    cut.push_str("...");
    cut
}

fn user_message(e: &RecorderError) -> String {
    if !e.is_user_error() {
        return format!("Something went wrong: {}", e);
    }

    let text = e.to_string();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => text,
    }
}

fn stop_message(summary: &StopSummary) -> String {
    format!(
        "Recording stopped after {}.\n{} segment(s) saved, {} failed.\nLocation: {}",
        format_duration(summary.duration_secs),
        summary.segments_saved,
        summary.segments_failed,
        summary.output_dir.display()
    )
}

fn status_message(status: &SessionStatus, channel: &str, participants: &[String]) -> String {
    format!(
        "Recording in {} for {}.\nCurrent segment: {}\nSaved: {} / failed: {}\nParticipants: {}\nLocation: {}",
        channel,
        format_duration(status.duration_secs),
        status.segment_index,
        status.segments_saved,
        status.segments_failed,
        join_or_none(participants),
        status.output_dir.display()
    )
}

fn test_record_message(ctx: &Context, guild_id: GuildId, report: &TestRecordReport) -> String {
    let mut text = String::new();

    if report.speakers.is_empty() {
        text.push_str("No audio was captured.\n");
    } else {
        text.push_str("Captured audio:\n");
        for (speaker, bytes) in &report.speakers {
            text.push_str(&format!(
                "- {}: {} bytes\n",
                speaker_name(ctx, guild_id, *speaker),
                bytes
            ));
        }
    }

    match &report.result {
        Ok(transcoded) => text.push_str(&format!(
            "Test recording saved ({} bytes).\nLocation: {}",
            transcoded.output_bytes,
            transcoded.output.display()
        )),
        Err(e) => text.push_str(&format!("Test recording failed: {}", e)),
    }

    text
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{}m {:02}s", total / 60, total % 60)
}

fn join_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

// Cache lookups. Guild refs are never held across an await.

fn author_voice_channel(ctx: &Context, guild_id: GuildId, user: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild.voice_states.get(&user).and_then(|state| state.channel_id)
}

fn channel_name(ctx: &Context, guild_id: GuildId, channel: ChannelKey) -> String {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| {
            guild
                .channels
                .get(&ChannelId::new(channel.0))
                .map(|c| c.name.clone())
        })
        .unwrap_or_else(|| format!("channel {}", channel))
}

fn speaker_name(ctx: &Context, guild_id: GuildId, speaker: SpeakerId) -> String {
    if speaker.0 == 0 {
        return format!("unknown ({})", speaker);
    }
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| {
            guild
                .members
                .get(&UserId::new(speaker.0))
                .map(|m| m.display_name().to_string())
        })
        .unwrap_or_else(|| format!("unknown ({})", speaker))
}

/// Display names of the non-bot members in `channel`.
fn participants(ctx: &Context, guild_id: GuildId, channel: ChannelId) -> Vec<String> {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return Vec::new();
    };

    guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel))
        .filter_map(|state| guild.members.get(&state.user_id))
        .filter(|member| !member.user.bot)
        .map(|member| member.display_name().to_string())
        .collect()
}

/// Non-bot members still in `channel`, or `None` when the guild is not cached.
fn humans_in_channel(ctx: &Context, guild_id: GuildId, channel: ChannelId) -> Option<usize> {
    let guild = ctx.cache.guild(guild_id)?;

    let count = guild
        .voice_states
        .values()
        .filter(|state| state.channel_id == Some(channel))
        .filter(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|m| m.user.bot)
                .or_else(|| guild.members.get(&state.user_id).map(|m| m.user.bot))
                .unwrap_or(false);
            !is_bot
        })
        .count();

    Some(count)
}
