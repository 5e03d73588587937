use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, UserId};
use std::{fmt, time::Duration};

/// A resolved, playable item.
///
/// Built once by a [`Resolver`](crate::sources::Resolver) and never mutated
/// afterwards: the queue hands it over to the session by value.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    id: String,
    title: String,
    uploader: Option<String>,
    duration: Option<Duration>,
    url: String,
    stream_url: Option<String>,
    thumbnail: Option<String>,
    requested_by: UserId,
    channel_id: ChannelId,
    added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        requested_by: UserId,
        channel_id: ChannelId,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            uploader: None,
            duration: None,
            url: url.into(),
            stream_url: None,
            thumbnail: None,
            requested_by,
            channel_id,
            added_at: Utc::now(),
        }
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_stream_url(mut self, stream_url: impl Into<String>) -> Self {
        self.stream_url = Some(stream_url.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    // Getters
    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn uploader(&self) -> Option<&str> {
        self.uploader.as_deref()
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn stream_url(&self) -> Option<&str> {
        self.stream_url.as_deref()
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }
    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }
    #[allow(dead_code)]
    pub fn added_at(&self) -> DateTime<Utc> {
        self.added_at
    }

    /// Duración legible ("3m 12s"), o `None` para streams en vivo
    pub fn duration_text(&self) -> Option<String> {
        self.duration
            .map(|d| humantime::format_duration(Duration::from_secs(d.as_secs())).to_string())
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uploader {
            Some(uploader) => write!(f, "**{}** de **{}**", self.title, uploader),
            None => write!(f, "**{}**", self.title),
        }
    }
}
