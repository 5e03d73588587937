use anyhow::Result;
use serenity::{
    http::Http,
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::{sync::Arc, time::Duration};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

mod audio;
mod bot;
mod config;
mod persona;
mod sources;
mod storage;
mod ui;

use crate::audio::registry::SessionRegistry;
use crate::audio::session::SessionSettings;
use crate::audio::voice::SongbirdTransport;
use crate::bot::DjBot;
use crate::config::Config;
use crate::persona::{Persona, PersonaState};
use crate::sources::YtDlpResolver;
use crate::storage::JsonStorage;
use crate::ui::ChannelAnnouncer;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dj_pete=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando DJ Pete v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("⚙️ {}", config.summary());

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Inicializar almacenamiento JSON (solo la personalidad se persiste)
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    let persona = if config.enable_persona {
        Some(Arc::new(Persona::new(load_persona_state(&storage).await)))
    } else {
        info!("🎭 Personalidad desactivada");
        None
    };

    // Voz y avisos
    let songbird = Songbird::serenity();
    let http = Arc::new(Http::new(&config.discord_token));
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(SongbirdTransport::new(songbird.clone())),
        Arc::new(ChannelAnnouncer::new(http)),
        SessionSettings::from(config.as_ref()),
    ));

    let resolver = YtDlpResolver::default();
    match resolver.version().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => warn!("⚠️ {} - /play fallará hasta que se instale", e),
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = DjBot::new(config.clone(), registry.clone(), Arc::new(resolver), persona.clone())?;

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    if let Some(persona) = &persona {
        spawn_persona_tasks(persona.clone(), storage.clone(), &config);
    }

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Error al registrar Ctrl+C");
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        registry.shutdown().await;
        if let Some(persona) = &persona {
            save_persona(&storage, persona).await;
        }
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Un archivo corrupto no impide arrancar; se empieza con humor neutral
async fn load_persona_state(storage: &JsonStorage) -> PersonaState {
    match storage.load_persona().await {
        Ok(Some(state)) => {
            info!(
                "🎭 Personalidad cargada (humor {:.1}, {} usuarios conocidos)",
                state.mood(),
                state.known_users()
            );
            state
        }
        Ok(None) => {
            info!("🎭 Personalidad nueva");
            PersonaState::default()
        }
        Err(e) => {
            warn!("⚠️ No se pudo leer la personalidad, empezando de cero: {:?}", e);
            PersonaState::default()
        }
    }
}

async fn save_persona(storage: &JsonStorage, persona: &Persona) {
    match storage.save_persona(&persona.snapshot()).await {
        Ok(()) => debug!("💾 Personalidad guardada (humor {:.1})", persona.mood()),
        Err(e) => error!("❌ Error guardando la personalidad: {:?}", e),
    }
}

/// Guardado periódico y deriva del humor hacia neutral
fn spawn_persona_tasks(persona: Arc<Persona>, storage: Arc<JsonStorage>, config: &Config) {
    let save_every = Duration::from_secs(config.persona_save_interval);
    let drift_every = Duration::from_secs(config.mood_drift_interval);

    let saving = persona.clone();
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + save_every, save_every);
        loop {
            ticker.tick().await;
            save_persona(&storage, &saving).await;
        }
    });

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + drift_every, drift_every);
        loop {
            ticker.tick().await;
            persona.drift();
        }
    });
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
