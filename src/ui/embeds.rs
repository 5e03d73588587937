use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{queue::QueuePage, track::Track},
    bot::commands::CommandTable,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎧 DJ Pete";

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track, loop_enabled: bool) -> CreateEmbed {
    let title = if loop_enabled {
        "🔂 Reproduciendo Ahora (en bucle)"
    } else {
        "🎵 Reproduciendo Ahora"
    };

    track_fields(CreateEmbed::default(), track)
        .field("🕐 Pedida", format!("<t:{}:R>", track.added_at().timestamp()), true)
        .title(title)
        .description(track.to_string())
        .color(colors::MUSIC_PURPLE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    track_fields(CreateEmbed::default(), track)
        .title("✅ Canción Agregada")
        .description(format!("{} está en la posición **#{}**", track, position))
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn track_fields(mut embed: CreateEmbed, track: &Track) -> CreateEmbed {
    embed = embed
        .field("⏱️ Duración", duration_label(track), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requested_by()), true)
        .url(track.url());

    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(page: &QueuePage, current: Option<&Track>, loop_enabled: bool) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    // Canción actual
    if let Some(current) = current {
        let status = if loop_enabled { "🔂" } else { "▶️" };
        embed = embed.field(format!("{} Reproduciendo", status), current.to_string(), false);
    }

    if page.total_items == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    embed
        .description(queue_lines(page))
        .field("Información", format!("**Total:** {} canciones", page.total_items), false)
        .footer(CreateEmbedFooter::new(page_footer(page)))
        .timestamp(Timestamp::now())
}

/// Crea el embed de ayuda a partir de la tabla de comandos
pub fn create_help_embed(table: &CommandTable) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎧 DJ Pete - Comandos")
        .description(help_lines(table))
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("🔒 = requiere permiso de gestionar el servidor"))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// "3m 32s", o en vivo si no hay duración
pub fn duration_label(track: &Track) -> String {
    track
        .duration_text()
        .unwrap_or_else(|| "🔴 En vivo".to_string())
}

fn queue_lines(page: &QueuePage) -> String {
    page.numbered()
        .map(|(position, track)| format!("**{}**. {} `[{}]`\n", position, track, duration_label(track)))
        .collect()
}

fn page_footer(page: &QueuePage) -> String {
    format!("Página {} de {} • DJ Pete", page.current_page, page.total_pages)
}

fn help_lines(table: &CommandTable) -> String {
    table
        .iter()
        .map(|command| {
            let lock = if command.admin { " 🔒" } else { "" };
            format!("• `{}` - {}{}\n", command.usage(), command.description, lock)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::TrackQueue;
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, UserId};
    use std::time::Duration;

    fn track(title: &str) -> Track {
        Track::new(title, title, "https://example.com", UserId::new(1), ChannelId::new(2))
            .with_uploader("Pete")
            .with_duration(Duration::from_secs(75))
    }

    fn queue(n: usize) -> TrackQueue {
        let queue = TrackQueue::new(100);
        for i in 1..=n {
            queue.push(track(&format!("T{i}"))).unwrap();
        }
        queue
    }

    #[test]
    fn queue_lines_are_numbered_from_the_page_start() {
        let page = queue(12).page(2, 10);
        assert_eq!(
            queue_lines(&page),
            "**11**. **T11** de **Pete** `[1m 15s]`\n**12**. **T12** de **Pete** `[1m 15s]`\n"
        );
        assert_eq!(page_footer(&page), "Página 2 de 2 • DJ Pete");
    }

    #[test]
    fn live_tracks_are_labelled() {
        let live = Track::new("x", "Radio", "https://example.com", UserId::new(1), ChannelId::new(2));
        assert_eq!(duration_label(&live), "🔴 En vivo");
    }

    #[test]
    fn empty_queue_says_so() {
        let embed = create_queue_embed(&queue(0).page(1, 10), None, false);
        let json = serde_json::to_value(&embed).unwrap();
        assert!(json["description"].as_str().unwrap().contains("La cola está vacía"));
    }

    #[test]
    fn help_is_generated_from_the_table() {
        let table = CommandTable::standard().unwrap();
        let lines = help_lines(&table);

        assert_eq!(lines.lines().count(), table.len());
        assert!(lines.contains("• `/play <query>` - "));
        assert!(lines.contains("• `/queue [page]` - "));
        assert!(lines.contains("Salta la canción sin votación 🔒"));
    }

    #[test]
    fn now_playing_marks_loop() {
        let json = serde_json::to_value(create_now_playing_embed(&track("A"), true)).unwrap();
        assert_eq!(json["title"], "🔂 Reproduciendo Ahora (en bucle)");
        assert_eq!(json["description"], "**A** de **Pete**");
    }
}
