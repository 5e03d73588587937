use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use serenity::model::id::{ChannelId, UserId};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use super::{ResolveError, Resolver};
use crate::audio::{error::ValidationError, track::Track};

/// Información extraída de yt-dlp
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: String,
    #[serde(default)]
    title: String,
    duration: Option<f64>,
    uploader: Option<String>,
    thumbnail: Option<String>,
    webpage_url: Option<String>,
    /// URL directa del stream (solo se usa para enlaces genéricos)
    url: Option<String>,
    extractor_key: Option<String>,
    is_live: Option<bool>,
}

/// Resolver basado en yt-dlp
pub struct YtDlpResolver {
    binary: String,
    // Limitar procesos concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Verifica que yt-dlp esté instalado y devuelve su versión
    pub async fn version(&self) -> Result<String, ResolveError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            return Err(ResolveError::Unavailable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
        channel_id: ChannelId,
    ) -> Result<Track, ResolveError> {
        let target = search_target(query)?;

        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        info!("🔍 Resolviendo: {}", target);

        let output = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--dump-json",
                "--skip-download",
                "--no-warnings",
                "-f",
                "bestaudio/best",
                target.as_str(),
            ])
            .output()
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("⚠️ yt-dlp falló para '{}': {}", target, error);
            return Err(ResolveError::Extraction(error));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let info = first_entry(&stdout).ok_or_else(|| ResolveError::NotFound(query.trim().to_string()))?;

        let track = info_to_track(info, requested_by, channel_id, query.trim());
        debug!("✅ Resuelto '{}' → {}", query.trim(), track.url());
        Ok(track)
    }
}

/// Las URLs http(s) van tal cual; cualquier otro texto se busca en YouTube
fn search_target(query: &str) -> Result<String, ValidationError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ValidationError::EmptySearch);
    }

    match Url::parse(query) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(query.to_string()),
        _ => Ok(format!("ytsearch1:{}", query)),
    }
}

/// Primera entrada utilizable de la salida de `--dump-json` (una por línea)
fn first_entry(stdout: &str) -> Option<YtDlpInfo> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
        .find(|info| !info.id.is_empty())
}

/// Convierte YtDlpInfo a Track
fn info_to_track(info: YtDlpInfo, requested_by: UserId, channel_id: ChannelId, query: &str) -> Track {
    let title = if info.title.is_empty() {
        query.to_string()
    } else {
        info.title
    };
    let page_url = info.webpage_url.unwrap_or_else(|| query.to_string());
    let mut track = Track::new(info.id, title, page_url, requested_by, channel_id);

    if let Some(uploader) = info.uploader {
        track = track.with_uploader(uploader);
    }

    // Los streams en vivo no tienen duración
    if !info.is_live.unwrap_or(false) {
        // Valores absurdos del JSON se tratan como duración desconocida
        if let Some(duration) = info.duration.and_then(|d| Duration::try_from_secs_f64(d).ok()) {
            track = track.with_duration(duration);
        }
    }

    if let Some(thumbnail) = info.thumbnail {
        track = track.with_thumbnail(thumbnail);
    }

    // Un enlace directo a un archivo no caduca; las URLs firmadas de YouTube sí
    if info.extractor_key.as_deref() == Some("Generic") {
        if let Some(stream_url) = info.url {
            track = track.with_stream_url(stream_url);
        }
    }

    track
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VIDEO: &str = r#"{"id":"dQw4w9WgXcQ","title":"Never Gonna Give You Up","duration":212.0,"uploader":"Rick Astley","thumbnail":"https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg","webpage_url":"https://www.youtube.com/watch?v=dQw4w9WgXcQ","url":"https://rr1.googlevideo.com/videoplayback?expire=1","extractor_key":"Youtube","is_live":false}"#;

    fn resolve_line(line: &str, query: &str) -> Track {
        let info = first_entry(line).unwrap();
        info_to_track(info, UserId::new(1), ChannelId::new(2), query)
    }

    #[test]
    fn plain_text_becomes_a_single_result_search() {
        assert_eq!(search_target("  never gonna give you up ").unwrap(), "ytsearch1:never gonna give you up");
        assert_eq!(search_target("artist: song").unwrap(), "ytsearch1:artist: song");
    }

    #[test]
    fn http_urls_are_passed_through() {
        assert_eq!(
            search_target("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(search_target("ftp://example.com/a.mp3").unwrap(), "ytsearch1:ftp://example.com/a.mp3");
    }

    #[test]
    fn blank_search_is_rejected() {
        assert_eq!(search_target("   "), Err(ValidationError::EmptySearch));
    }

    #[test]
    fn video_metadata_maps_onto_track() {
        let track = resolve_line(VIDEO, "rick");
        assert_eq!(track.id(), "dQw4w9WgXcQ");
        assert_eq!(track.uploader(), Some("Rick Astley"));
        assert_eq!(track.duration(), Some(Duration::from_secs(212)));
        assert_eq!(track.url(), "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        // La URL firmada de YouTube caduca, se vuelve a extraer al reproducir
        assert_eq!(track.stream_url(), None);
        assert_eq!(track.requested_by(), UserId::new(1));
    }

    #[test]
    fn generic_links_keep_their_stream_url() {
        let line = r#"{"id":"song","title":"song","extractor_key":"Generic","url":"https://cdn.example.com/song.mp3","webpage_url":"https://cdn.example.com/song.mp3"}"#;
        let track = resolve_line(line, "https://cdn.example.com/song.mp3");
        assert_eq!(track.stream_url(), Some("https://cdn.example.com/song.mp3"));
        assert_eq!(track.duration(), None);
    }

    #[test]
    fn live_streams_have_no_duration() {
        let line = r#"{"id":"live1","title":"Lofi radio","duration":0.0,"is_live":true}"#;
        let track = resolve_line(line, "lofi");
        assert_eq!(track.duration(), None);
        assert_eq!(track.url(), "lofi");
    }

    #[test]
    fn unrepresentable_durations_are_dropped() {
        for duration in ["1e300", "-5.0"] {
            let line = format!(r#"{{"id":"x","title":"Raro","duration":{}}}"#, duration);
            assert_eq!(resolve_line(&line, "raro").duration(), None);
        }
    }

    #[test]
    fn first_usable_entry_wins() {
        let stdout = format!("\nnot json\n{}\n{}", r#"{"id":"","title":"vacío"}"#, VIDEO);
        assert_eq!(first_entry(&stdout).map(|info| info.id).as_deref(), Some("dQw4w9WgXcQ"));
        assert!(first_entry("").is_none());
    }
}
