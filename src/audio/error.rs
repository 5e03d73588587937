use thiserror::Error;

/// Entrada inválida; se rechaza sin tocar el estado de la sesión
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("el volumen debe estar entre 0 y 100 (recibido: {0})")]
    Volume(i64),
    #[error("no hay nada que buscar")]
    EmptySearch,
    #[error("debes estar en un canal de voz")]
    NoVoiceChannel,
    #[error("este comando solo funciona dentro de un servidor")]
    NoGuild,
    #[error("la cola está llena (máximo {0} canciones)")]
    QueueFull(usize),
    #[error("argumento `{name}` inválido: {reason}")]
    Argument { name: String, reason: String },
}

/// Índice de `remove` fuera de la cola actual
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("la posición {index} no existe (la cola tiene {len} canciones)")]
pub struct RangeError {
    pub index: usize,
    pub len: usize,
}

/// Fallo del transporte a mitad de canción. El scheduler lo absorbe y avanza.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no se pudo iniciar el stream: {0}")]
    Start(String),
    #[error("el stream falló: {0}")]
    Stream(String),
    #[error("el transporte abandonó la canción sin notificar")]
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("el gestor de voz no está inicializado")]
    Unavailable,
    #[error("no se pudo conectar al canal de voz: {0}")]
    Connect(String),
    #[error("el stream no aceptó la orden: {0}")]
    Control(String),
    #[error("error al desconectar: {0}")]
    Disconnect(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("la sesión ya se cerró")]
    Closed,
    #[error("no hay nada reproduciéndose")]
    NothingPlaying,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Range(#[from] RangeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
