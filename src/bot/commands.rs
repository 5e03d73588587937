//! Slash command table.
//!
//! Every command is declared once as a [`CommandSpec`]: its name, options and
//! handler. The same table produces the Discord registration payload, parses
//! incoming options into [`CommandArgs`] and drives `/help`.

use anyhow::Result;
use futures::future::BoxFuture;
use serenity::{
    builder::{CreateCommand, CreateCommandOption, CreateEmbed},
    model::{
        application::{CommandDataOption, CommandDataOptionValue, CommandInteraction, CommandOptionType},
        channel::ChannelType,
        id::{ChannelId, GuildId, UserId},
        Permissions,
    },
    prelude::Context,
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::{handlers, DjBot};
use crate::audio::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    /// Canal de voz del servidor
    Channel,
}

impl OptionKind {
    fn discord_type(self) -> CommandOptionType {
        match self {
            OptionKind::String => CommandOptionType::String,
            OptionKind::Integer => CommandOptionType::Integer,
            OptionKind::Boolean => CommandOptionType::Boolean,
            OptionKind::Channel => CommandOptionType::Channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    /// Rango inclusivo; solo para opciones enteras
    pub range: Option<(i64, i64)>,
}

impl OptionSpec {
    pub const fn new(kind: OptionKind, name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            kind,
            required: false,
            range: None,
        }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn builder(&self) -> CreateCommandOption {
        let mut option = CreateCommandOption::new(self.kind.discord_type(), self.name, self.description)
            .required(self.required);
        // Discord solo acepta límites sin signo; la tabla ya rechazó los negativos
        if let Some((Ok(min), Ok(max))) = self.range.map(|(min, max)| (u64::try_from(min), u64::try_from(max))) {
            option = option.min_int_value(min).max_int_value(max);
        }
        if self.kind == OptionKind::Channel {
            option = option.channel_types(vec![ChannelType::Voice]);
        }
        option
    }
}

/// Respuesta de un comando; se envía editando la respuesta diferida
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub content: Option<String>,
    pub embed: Option<CreateEmbed>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: CreateEmbed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }

    pub fn with_text(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Todo lo que un handler necesita para atender un comando
pub struct Invocation<'a> {
    pub ctx: &'a Context,
    pub command: &'a CommandInteraction,
    pub bot: &'a DjBot,
    pub args: CommandArgs,
}

impl Invocation<'_> {
    pub fn guild_id(&self) -> Result<GuildId, ValidationError> {
        self.command.guild_id.ok_or(ValidationError::NoGuild)
    }

    pub fn user_id(&self) -> UserId {
        self.command.user.id
    }

    /// Canal de texto donde se usó el comando
    pub fn channel_id(&self) -> ChannelId {
        self.command.channel_id
    }
}

pub type Handler = for<'a> fn(Invocation<'a>) -> BoxFuture<'a, Result<Reply>>;

#[derive(Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub options: &'static [OptionSpec],
    /// Requiere el permiso de gestionar el servidor
    pub admin: bool,
    pub handler: Handler,
}

impl CommandSpec {
    pub fn builder(&self) -> CreateCommand {
        let mut command = CreateCommand::new(self.name).description(self.description);
        for option in self.options {
            command = command.add_option(option.builder());
        }
        if self.admin {
            command = command.default_member_permissions(Permissions::MANAGE_GUILD);
        }
        command
    }

    /// `/name <required> [optional]`
    pub fn usage(&self) -> String {
        let mut usage = format!("/{}", self.name);
        for option in self.options {
            if option.required {
                usage.push_str(&format!(" <{}>", option.name));
            } else {
                usage.push_str(&format!(" [{}]", option.name));
            }
        }
        usage
    }

    /// Valida las opciones recibidas contra el esquema del comando
    pub fn parse(&self, raw: Vec<(String, ArgValue)>) -> Result<CommandArgs, ValidationError> {
        let mut values = HashMap::new();

        for (name, value) in raw {
            let spec = self
                .options
                .iter()
                .find(|o| o.name == name)
                .ok_or_else(|| argument(&name, "opción desconocida"))?;

            if value.kind() != spec.kind {
                return Err(argument(spec.name, "tipo incorrecto"));
            }

            if let (ArgValue::Integer(n), Some((min, max))) = (&value, spec.range) {
                if !(min..=max).contains(n) {
                    return Err(argument(spec.name, &format!("debe estar entre {} y {}", min, max)));
                }
            }

            values.insert(spec.name, value);
        }

        if let Some(missing) = self
            .options
            .iter()
            .find(|o| o.required && !values.contains_key(o.name))
        {
            return Err(argument(missing.name, "es obligatoria"));
        }

        Ok(CommandArgs { values })
    }
}

fn argument(name: &str, reason: &str) -> ValidationError {
    ValidationError::Argument {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Channel(ChannelId),
}

impl ArgValue {
    fn kind(&self) -> OptionKind {
        match self {
            ArgValue::String(_) => OptionKind::String,
            ArgValue::Integer(_) => OptionKind::Integer,
            ArgValue::Boolean(_) => OptionKind::Boolean,
            ArgValue::Channel(_) => OptionKind::Channel,
        }
    }
}

/// Convierte las opciones de Discord; tipos que no usamos se rechazan
pub fn raw_options(options: &[CommandDataOption]) -> Result<Vec<(String, ArgValue)>, ValidationError> {
    options
        .iter()
        .map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::String(s) => ArgValue::String(s.clone()),
                CommandDataOptionValue::Integer(n) => ArgValue::Integer(*n),
                CommandDataOptionValue::Boolean(b) => ArgValue::Boolean(*b),
                CommandDataOptionValue::Channel(id) => ArgValue::Channel(*id),
                _ => return Err(argument(&option.name, "tipo no soportado")),
            };
            Ok((option.name.clone(), value))
        })
        .collect()
}

/// Argumentos ya validados
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    values: HashMap<&'static str, ArgValue>,
}

impl CommandArgs {
    pub fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ArgValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn channel(&self, name: &str) -> Option<ChannelId> {
        match self.values.get(name) {
            Some(ArgValue::Channel(id)) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("comando duplicado: /{0}")]
    DuplicateCommand(&'static str),
    #[error("/{command}: opción duplicada `{option}`")]
    DuplicateOption {
        command: &'static str,
        option: &'static str,
    },
    #[error("/{command}: la opción obligatoria `{option}` va después de una opcional")]
    RequiredAfterOptional {
        command: &'static str,
        option: &'static str,
    },
    #[error("/{command}: `{option}` declara un rango pero no es entera")]
    RangeOnNonInteger {
        command: &'static str,
        option: &'static str,
    },
    #[error("/{command}: `{option}` tiene un rango vacío")]
    EmptyRange {
        command: &'static str,
        option: &'static str,
    },
    #[error("/{command}: `{option}` tiene un límite negativo")]
    NegativeRange {
        command: &'static str,
        option: &'static str,
    },
}

/// Tabla de comandos validada
pub struct CommandTable {
    commands: Vec<CommandSpec>,
}

impl CommandTable {
    pub fn new(commands: Vec<CommandSpec>) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();

        for command in &commands {
            if !names.insert(command.name) {
                return Err(SchemaError::DuplicateCommand(command.name));
            }

            let mut options = HashSet::new();
            let mut seen_optional = false;
            for option in command.options {
                if !options.insert(option.name) {
                    return Err(SchemaError::DuplicateOption {
                        command: command.name,
                        option: option.name,
                    });
                }

                if option.required && seen_optional {
                    return Err(SchemaError::RequiredAfterOptional {
                        command: command.name,
                        option: option.name,
                    });
                }
                seen_optional |= !option.required;

                match (option.kind, option.range) {
                    (OptionKind::Integer, Some((min, max))) if min > max => {
                        return Err(SchemaError::EmptyRange {
                            command: command.name,
                            option: option.name,
                        });
                    }
                    (OptionKind::Integer, Some((min, _))) if min < 0 => {
                        return Err(SchemaError::NegativeRange {
                            command: command.name,
                            option: option.name,
                        });
                    }
                    (OptionKind::String | OptionKind::Boolean | OptionKind::Channel, Some(_)) => {
                        return Err(SchemaError::RangeOnNonInteger {
                            command: command.name,
                            option: option.name,
                        });
                    }
                    _ => {}
                }
            }
        }

        Ok(Self { commands })
    }

    /// La tabla de DJ Pete
    pub fn standard() -> Result<Self, SchemaError> {
        Self::new(standard_commands())
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn builders(&self) -> Vec<CreateCommand> {
        self.commands.iter().map(CommandSpec::builder).collect()
    }
}

// Comandos de reproducción

const PLAY_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::String, "query", "URL o término de búsqueda").required()];
const QUEUE_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::Integer, "page", "Página de la cola").range(1, 10_000)];
const REMOVE_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::Integer, "index", "Posición en la cola").required().range(1, 10_000)];
const LOOP_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::Boolean, "enabled", "Repetir la canción actual").required()];
const VOLUME_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::Integer, "level", "Volumen (0-100)").required().range(0, 100)];
const SUMMON_OPTIONS: &[OptionSpec] =
    &[OptionSpec::new(OptionKind::Channel, "channel", "Canal de voz (por defecto, el tuyo)")];

fn spec(name: &'static str, description: &'static str, handler: Handler) -> CommandSpec {
    CommandSpec {
        name,
        description,
        options: &[],
        admin: false,
        handler,
    }
}

fn standard_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec {
            options: PLAY_OPTIONS,
            ..spec("play", "Reproduce una canción o la agrega a la cola", handlers::play)
        },
        spec("join", "Conecta o mueve el bot a tu canal de voz", handlers::join),
        CommandSpec {
            options: SUMMON_OPTIONS,
            admin: true,
            ..spec("summon", "Lleva el bot a un canal de voz", handlers::summon)
        },
        CommandSpec {
            admin: true,
            ..spec("leave", "Desconecta del canal y vacía la cola", handlers::leave)
        },
        spec("skip", "Vota para saltar la canción actual", handlers::skip),
        CommandSpec {
            admin: true,
            ..spec("forceskip", "Salta la canción sin votación", handlers::force_skip)
        },
        spec("pause", "Pausa la reproducción actual", handlers::pause),
        spec("resume", "Reanuda la reproducción pausada", handlers::resume),
        spec("stop", "Detiene la música y limpia la cola", handlers::stop),
        CommandSpec {
            options: QUEUE_OPTIONS,
            ..spec("queue", "Muestra la cola de reproducción", handlers::queue)
        },
        spec("nowplaying", "Muestra la canción actual", handlers::now_playing),
        spec("shuffle", "Mezcla la cola", handlers::shuffle),
        CommandSpec {
            options: REMOVE_OPTIONS,
            ..spec("remove", "Quita una canción de la cola", handlers::remove)
        },
        CommandSpec {
            options: LOOP_OPTIONS,
            ..spec("loop", "Activa o desactiva la repetición", handlers::set_loop)
        },
        CommandSpec {
            options: VOLUME_OPTIONS,
            ..spec("volume", "Ajusta el volumen", handlers::volume)
        },
        spec("feelings", "Pregúntale a Pete cómo se siente", handlers::feelings),
        spec("opinion", "Pregúntale a Pete qué piensa de ti", handlers::opinion),
        spec("help", "Muestra todos los comandos", handlers::help),
    ]
}
