use anyhow::Result;
use futures::{future::BoxFuture, FutureExt};
use serenity::{
    builder::{CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{error, info};

use super::{
    commands::{raw_options, CommandArgs, Invocation, Reply},
    DjBot,
};
use crate::{
    audio::{
        error::{RangeError, SessionError, TransportError, ValidationError},
        queue::QueuePage,
        registry::Summoned,
        session::PlaybackSession,
        votes::VoteOutcome,
    },
    persona::{Request, Verdict},
    sources::ResolveError,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn dispatch(ctx: &Context, command: &CommandInteraction, bot: &DjBot) -> Result<()> {
    info!(
        "📝 Comando /{} usado por {} en guild {:?}",
        command.data.name, command.user.name, command.guild_id
    );

    // Resolver puede tardar más de los 3s que da Discord
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let reply = match run(ctx, command, bot).await {
        Ok(reply) => reply,
        Err(e) => error_reply(&command.data.name, &e),
    };

    let mut response = EditInteractionResponse::new();
    if let Some(content) = reply.content {
        response = response.content(content);
    }
    if let Some(embed) = reply.embed {
        response = response.embed(embed);
    }
    command.edit_response(&ctx.http, response).await?;

    Ok(())
}

async fn run(ctx: &Context, command: &CommandInteraction, bot: &DjBot) -> Result<Reply> {
    let Some(spec) = bot.commands().get(&command.data.name) else {
        return Ok(Reply::text("❌ Comando no reconocido"));
    };

    let args = spec.parse(raw_options(&command.data.options)?)?;
    (spec.handler)(Invocation {
        ctx,
        command,
        bot,
        args,
    })
    .await
}

fn error_reply(command: &str, error: &anyhow::Error) -> Reply {
    match user_message(error) {
        Some(message) => Reply::embed(embeds::create_error_embed(&message)),
        None => {
            error!("❌ Error en /{}: {:?}", command, error);
            Reply::embed(embeds::create_error_embed(
                "Algo salió mal procesando el comando. Inténtalo de nuevo.",
            ))
        }
    }
}

/// Texto para el usuario si el error es uno de los esperados
fn user_message(error: &anyhow::Error) -> Option<String> {
    if let Some(e) = error.downcast_ref::<ValidationError>() {
        return Some(capitalize(&e.to_string()));
    }
    if let Some(e) = error.downcast_ref::<SessionError>() {
        return Some(capitalize(&e.to_string()));
    }
    if let Some(e) = error.downcast_ref::<ResolveError>() {
        return Some(capitalize(&e.to_string()));
    }
    if let Some(e) = error.downcast_ref::<RangeError>() {
        return Some(capitalize(&e.to_string()));
    }
    if let Some(e) = error.downcast_ref::<TransportError>() {
        return Some(capitalize(&e.to_string()));
    }
    None
}

fn capitalize(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Canal de voz en el que está el usuario
fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<ChannelId> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or(ValidationError::NoVoiceChannel)?;

    let channel_id = guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(ValidationError::NoVoiceChannel)?;

    Ok(channel_id)
}

/// Sesión activa del guild; sin sesión no hay nada que controlar
fn active_session(inv: &Invocation<'_>) -> Result<Arc<PlaybackSession>> {
    let guild_id = inv.guild_id()?;
    let session = inv
        .bot
        .registry()
        .get(guild_id)
        .ok_or(SessionError::NothingPlaying)?;
    Ok(session)
}

/// Frase de rechazo si la personalidad no quiere atender la petición
fn declined(inv: &Invocation<'_>, request: Request) -> Option<String> {
    match inv.bot.persona()?.gate(inv.user_id(), request) {
        Verdict::Proceed => None,
        Verdict::Decline(line) => Some(line),
    }
}

fn vote_message(outcome: VoteOutcome, quorum: usize) -> String {
    match outcome {
        VoteOutcome::ImmediateSkip => "⏭️ Saltada por quien la pidió".to_string(),
        VoteOutcome::Accepted(votes) => format!("🗳️ Voto registrado ({}/{})", votes, quorum),
        VoteOutcome::QuorumReached(votes) => {
            format!("⏭️ Votación aprobada ({}/{}), saltando canción", votes, quorum)
        }
        VoteOutcome::AlreadyVoted => "⚠️ Ya votaste para saltar esta canción".to_string(),
    }
}

fn summon_message(summoned: Summoned, channel_id: ChannelId) -> String {
    match summoned {
        Summoned::Connected => format!("✅ Conectado a <#{}>", channel_id),
        Summoned::AlreadyHere => format!("✅ Ya estoy en <#{}>", channel_id),
        Summoned::Moving => format!("🚚 Moviéndome a <#{}>", channel_id),
    }
}

async fn summon_to(inv: &Invocation<'_>, guild_id: GuildId, channel_id: ChannelId) -> Result<Reply> {
    let summoned = inv
        .bot
        .registry()
        .summon(guild_id, channel_id, inv.channel_id())
        .await?;
    Ok(Reply::text(summon_message(summoned, channel_id)))
}

fn page_arg(args: &CommandArgs) -> usize {
    args.integer("page")
        .and_then(|page| usize::try_from(page).ok())
        .unwrap_or(1)
        .max(1)
}

pub fn play(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let guild_id = inv.guild_id()?;
        let user_id = inv.user_id();
        let query = inv.args.string("query").unwrap_or_default();

        if let Some(line) = declined(&inv, Request::Play) {
            return Ok(Reply::text(line));
        }

        let voice_channel = get_user_voice_channel(inv.ctx, guild_id, user_id)?;
        let track = inv
            .bot
            .resolver()
            .resolve(query, user_id, inv.channel_id())
            .await?;

        let position = inv
            .bot
            .registry()
            .enqueue(guild_id, voice_channel, track.clone())
            .await?;

        let mut reply = Reply::embed(embeds::create_track_added_embed(&track, position));
        if let Some(persona) = inv.bot.persona() {
            reply = reply.with_text(persona.enqueued(user_id, &track.to_string()));
        }
        Ok(reply)
    }
    .boxed()
}

pub fn join(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let guild_id = inv.guild_id()?;
        let voice_channel = get_user_voice_channel(inv.ctx, guild_id, inv.user_id())?;

        if let Some(line) = declined(&inv, Request::Join) {
            return Ok(Reply::text(line));
        }

        summon_to(&inv, guild_id, voice_channel).await
    }
    .boxed()
}

/// Como `/join`, pero un admin puede elegir el canal
pub fn summon(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let guild_id = inv.guild_id()?;
        let channel_id = match inv.args.channel("channel") {
            Some(channel_id) => channel_id,
            None => get_user_voice_channel(inv.ctx, guild_id, inv.user_id())?,
        };

        if let Some(line) = declined(&inv, Request::Join) {
            return Ok(Reply::text(line));
        }

        summon_to(&inv, guild_id, channel_id).await
    }
    .boxed()
}

pub fn leave(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let guild_id = inv.guild_id()?;

        if let Some(line) = declined(&inv, Request::Leave) {
            return Ok(Reply::text(line));
        }

        if inv.bot.registry().remove(guild_id).await {
            Ok(Reply::text("👋 Desconectado del canal de voz"))
        } else {
            Ok(Reply::text("❌ No estoy conectado a ningún canal de voz"))
        }
    }
    .boxed()
}

pub fn skip(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        let outcome = session.skip(inv.user_id())?;
        let (_, quorum) = session.skip_votes();
        Ok(Reply::text(vote_message(outcome, quorum)))
    }
    .boxed()
}

pub fn force_skip(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        active_session(&inv)?.force_skip()?;
        Ok(Reply::text("⏭️ Canción saltada"))
    }
    .boxed()
}

pub fn pause(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        active_session(&inv)?.pause()?;
        Ok(Reply::text("⏸️ Música pausada"))
    }
    .boxed()
}

pub fn resume(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        active_session(&inv)?.resume()?;
        Ok(Reply::text("▶️ Música reanudada"))
    }
    .boxed()
}

pub fn stop(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let cleared = active_session(&inv)?.stop()?;
        Ok(Reply::text(format!(
            "⏹️ Música detenida ({} canciones quitadas de la cola)",
            cleared
        )))
    }
    .boxed()
}

pub fn queue(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let guild_id = inv.guild_id()?;
        let page = page_arg(&inv.args);
        let page_size = inv.bot.config().queue_page_size;

        let embed = match inv.bot.registry().get(guild_id) {
            Some(session) => embeds::create_queue_embed(
                &session.list_queue(page, page_size),
                session.now_playing().as_ref(),
                session.loop_enabled(),
            ),
            None => embeds::create_queue_embed(&QueuePage::empty(), None, false),
        };

        Ok(Reply::embed(embed))
    }
    .boxed()
}

pub fn now_playing(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        let track = session.now_playing().ok_or(SessionError::NothingPlaying)?;
        Ok(Reply::embed(embeds::create_now_playing_embed(
            &track,
            session.loop_enabled(),
        )))
    }
    .boxed()
}

pub fn shuffle(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        session.shuffle();
        Ok(Reply::text(format!(
            "🔀 Cola mezclada ({} canciones)",
            session.queue_len()
        )))
    }
    .boxed()
}

pub fn remove(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        let index = inv
            .args
            .integer("index")
            .and_then(|index| usize::try_from(index).ok())
            .unwrap_or(0);

        let track = session.remove_at(index)?;
        Ok(Reply::text(format!("🗑️ Quitada de la cola: {}", track)))
    }
    .boxed()
}

pub fn set_loop(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        let enabled = inv.args.boolean("enabled").unwrap_or(false);
        session.set_loop(enabled);

        if enabled {
            Ok(Reply::text("🔂 Repetir canción activado"))
        } else {
            Ok(Reply::text("➡️ Repetición desactivada"))
        }
    }
    .boxed()
}

pub fn volume(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        let session = active_session(&inv)?;
        let level = inv.args.integer("level").unwrap_or_default();

        if let Some(line) = declined(&inv, Request::Volume) {
            return Ok(Reply::text(line));
        }

        session.set_volume(level)?;

        let mut text = format!("🔊 Volumen ajustado a {}% (se aplica desde la próxima canción)", level);
        if let Some(comment) = inv.bot.persona().and_then(|p| p.volume_set(inv.user_id(), level)) {
            text.push('\n');
            text.push_str(&comment);
        }
        Ok(Reply::text(text))
    }
    .boxed()
}

pub fn feelings(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        match inv.bot.persona() {
            Some(persona) => Ok(Reply::text(persona.feelings(inv.user_id()))),
            None => Ok(Reply::text("🎭 La personalidad está desactivada")),
        }
    }
    .boxed()
}

pub fn opinion(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move {
        match inv.bot.persona() {
            Some(persona) => Ok(Reply::text(persona.opinion_of(inv.user_id()))),
            None => Ok(Reply::text("🎭 La personalidad está desactivada")),
        }
    }
    .boxed()
}

pub fn help(inv: Invocation<'_>) -> BoxFuture<'_, Result<Reply>> {
    async move { Ok(Reply::embed(embeds::create_help_embed(inv.bot.commands()))) }.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::commands::{ArgValue, CommandTable};
    use pretty_assertions::assert_eq;

    #[test]
    fn expected_errors_are_shown_to_the_user() {
        let error = anyhow::Error::from(SessionError::NothingPlaying);
        assert_eq!(user_message(&error).as_deref(), Some("No hay nada reproduciéndose"));

        let error = anyhow::Error::from(RangeError { index: 7, len: 3 });
        assert_eq!(
            user_message(&error).as_deref(),
            Some("La posición 7 no existe (la cola tiene 3 canciones)")
        );

        let error = anyhow::Error::from(ResolveError::Invalid(ValidationError::EmptySearch));
        assert_eq!(user_message(&error).as_deref(), Some("No hay nada que buscar"));
    }

    #[test]
    fn unexpected_errors_stay_in_the_logs() {
        let error = anyhow::anyhow!("HTTP 500");
        assert_eq!(user_message(&error), None);
    }

    #[test]
    fn vote_messages_show_progress_towards_quorum() {
        assert_eq!(vote_message(VoteOutcome::Accepted(1), 3), "🗳️ Voto registrado (1/3)");
        assert_eq!(
            vote_message(VoteOutcome::QuorumReached(3), 3),
            "⏭️ Votación aprobada (3/3), saltando canción"
        );
        assert_eq!(vote_message(VoteOutcome::AlreadyVoted, 3), "⚠️ Ya votaste para saltar esta canción");
    }

    #[test]
    fn summon_replies_name_the_target_channel() {
        let channel = ChannelId::new(7);
        assert_eq!(summon_message(Summoned::Connected, channel), "✅ Conectado a <#7>");
        assert_eq!(summon_message(Summoned::AlreadyHere, channel), "✅ Ya estoy en <#7>");
        assert_eq!(summon_message(Summoned::Moving, channel), "🚚 Moviéndome a <#7>");
    }

    #[test]
    fn queue_page_defaults_to_the_first() {
        let table = CommandTable::standard().unwrap();
        let spec = table.get("queue").unwrap();

        assert_eq!(page_arg(&spec.parse(vec![]).unwrap()), 1);
        let args = spec.parse(vec![("page".to_string(), ArgValue::Integer(4))]).unwrap();
        assert_eq!(page_arg(&args), 4);
    }

    #[test]
    fn capitalize_handles_accents_and_empty() {
        assert_eq!(capitalize("él"), "Él");
        assert_eq!(capitalize(""), "");
    }
}
