//! # Bot Module
//!
//! Discord side of DJ Pete: the serenity [`EventHandler`], the slash command
//! table and its handlers.
//!
//! ## Architecture
//!
//! [`DjBot`] owns nothing musical itself. It holds shared handles to:
//!
//! - the [`SessionRegistry`], which owns one playback session per guild
//! - the [`Resolver`] used by `/play` before anything is enqueued
//! - the optional [`Persona`], consulted around commands but never by the
//!   playback core
//! - the validated [`CommandTable`]
//!
//! Interactions are parsed against the table and dispatched to plain handler
//! functions in [`handlers`]. Voice state updates only matter when the bot
//! itself is disconnected, in which case the guild's session is dropped.
//!
//! ## Example
//!
//! ```rust,ignore
//! let bot = DjBot::new(config, registry, resolver, persona)?;
//! let client = Client::builder(&token, intents).event_handler(bot).await?;
//! ```

use anyhow::{Context as _, Result};
use serenity::{
    all::{Command, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;

use self::commands::CommandTable;
use crate::{audio::registry::SessionRegistry, config::Config, persona::Persona, sources::Resolver};

/// Handler principal del bot
pub struct DjBot {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    resolver: Arc<dyn Resolver>,
    persona: Option<Arc<Persona>>,
    commands: CommandTable,
}

impl DjBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        resolver: Arc<dyn Resolver>,
        persona: Option<Arc<Persona>>,
    ) -> Result<Self> {
        let commands = CommandTable::standard().context("tabla de comandos inválida")?;

        Ok(Self {
            config,
            registry,
            resolver,
            persona,
            commands,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &dyn Resolver {
        self.resolver.as_ref()
    }

    pub fn persona(&self) -> Option<&Persona> {
        self.persona.as_deref()
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    /// Registra los comandos slash, en un guild si `GUILD_ID` está definido
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando {} comandos slash...", self.commands.len());
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                guild_id
                    .set_commands(&ctx.http, self.commands.builders())
                    .await
                    .context("no se pudieron registrar los comandos de guild, revisa el permiso 'applications.commands'")?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                Command::set_global_commands(&ctx.http, self.commands.builders())
                    .await
                    .context("no se pudieron registrar los comandos globales")?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for DjBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::dispatch(&ctx, &command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Si alguien desconecta al bot del canal de voz, su sesión se cierra
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let (Some(guild_id), Some(old_channel)) = (new.guild_id, old.and_then(|o| o.channel_id)) else {
            return;
        };

        if self.registry.remove_in_channel(guild_id, old_channel).await {
            info!("🔌 Bot desconectado externamente en guild {}", guild_id);
        }
    }
}
