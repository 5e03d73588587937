use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

use crate::persona::PersonaState;

const PERSONA_FILE: &str = "persona.json";

/// Almacenamiento basado en archivos JSON.
///
/// Solo guarda el estado de la personalidad; las colas nunca se persisten.
pub struct JsonStorage {
    data_dir: PathBuf,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        // Crear directorio de datos si no existe
        fs::create_dir_all(&data_dir).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    /// Carga el estado guardado; `None` si todavía no existe
    pub async fn load_persona(&self) -> Result<Option<PersonaState>> {
        let path = self.persona_path();
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let state: PersonaState = serde_json::from_str(&content)
            .with_context(|| format!("Error al parsear {}", path.display()))?;

        info!("📂 Estado de personalidad cargado ({} usuarios)", state.known_users());
        Ok(Some(state))
    }

    pub async fn save_persona(&self, state: &PersonaState) -> Result<()> {
        let path = self.persona_path();
        let tmp = path.with_extension("json.tmp");

        // Escribir en un temporal y renombrar para no dejar el archivo a medias
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &path).await?;

        debug!("💾 Estado de personalidad guardado en {}", path.display());
        Ok(())
    }

    fn persona_path(&self) -> PathBuf {
        self.data_dir.join(PERSONA_FILE)
    }
}
