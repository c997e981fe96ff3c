//! Carga y gestión de configuración de la aplicación (servidor, dataset, IA).
//!
//! Las fuentes se combinan así: variables de entorno (usando .env si existe)
//! y, encima, un fichero YAML opcional (`config/global_config.yaml`).

use std::{env, path::PathBuf, time::Duration};

use anyhow::{anyhow, Result};
use config::{Config, File, FileFormat};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config/global_config.yaml";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_HUGGINGFACE_MODEL: &str = "microsoft/DialoGPT-medium";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AiProvider {
    Gemini,
    HuggingFace,
}

impl AiProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "huggingface" | "hf" => Ok(Self::HuggingFace),
            other => Err(anyhow!("Proveedor de IA no soportado: {other}")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini => "Google Gemini",
            Self::HuggingFace => "Hugging Face",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => DEFAULT_GEMINI_MODEL,
            Self::HuggingFace => DEFAULT_HUGGINGFACE_MODEL,
        }
    }
}

/// Secciones opcionales del fichero YAML. Todo campo ausente cae al entorno
/// o al valor por defecto.
#[derive(Debug, Default, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub ai: AiSection,
    #[serde(default)]
    pub diseases: DiseasesSection,
    #[serde(default)]
    pub dataset: DatasetSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AiSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiseasesSection {
    pub enabled: Option<Vec<String>>,
    pub dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DatasetSection {
    pub path: Option<String>,
}

impl FileSettings {
    /// Lee el YAML indicado. Si no existe o no se puede parsear se devuelven
    /// los valores por defecto y se deja constancia en el log.
    pub fn load(path: &str) -> Self {
        let settings = Config::builder()
            .add_source(File::new(path, FileFormat::Yaml).required(false))
            .build()
            .and_then(|cfg| cfg.try_deserialize::<FileSettings>());

        match settings {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Error cargando la configuración de {path}: {e}. Usando valores por defecto.");
                Self::default()
            }
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub dataset_path: PathBuf,
    pub diseases_dir: PathBuf,
    pub enabled_diseases: Vec<String>,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,

    pub ai_provider: AiProvider,
    pub ai_model: String,
    pub gemini_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    pub gemini_base_url: Url,
    pub ai_timeout: Duration,
    pub ai_min_interval: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno y el fichero YAML.
    pub fn from_env() -> Result<Self> {
        let config_path =
            env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let settings = FileSettings::load(&config_path);
        let cfg = Self::from_parts(settings, |key| env::var(key).ok())?;
        info!("Configuración cargada (fichero: {config_path})");
        Ok(cfg)
    }

    /// Combina el fichero con un lector de variables arbitrario.
    pub fn from_parts(settings: FileSettings, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| {
            let host = settings.api.host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
            let port = settings.api.port.unwrap_or(5000);
            format!("{host}:{port}")
        });

        let dataset_path = var("DATASET_PATH")
            .or(settings.dataset.path)
            .unwrap_or_else(|| "diseases/lung_cancer/data.csv".to_string());
        let diseases_dir = var("DISEASES_DIR")
            .or(settings.diseases.dir)
            .unwrap_or_else(|| "diseases".to_string());
        let enabled_diseases = settings
            .diseases
            .enabled
            .unwrap_or_else(|| vec!["lung_cancer".to_string()]);

        let provider_str = var("AI_PROVIDER")
            .or(settings.ai.provider)
            .unwrap_or_else(|| "gemini".to_string());
        let ai_provider = AiProvider::from_str(&provider_str)?;
        let ai_model = var("AI_MODEL")
            .or(settings.ai.model)
            .unwrap_or_else(|| ai_provider.default_model().to_string());

        // La clave del fichero tiene prioridad sobre la del entorno.
        let gemini_api_key = settings
            .ai
            .api_key
            .or_else(|| var("GEMINI_API_KEY"))
            .filter(|k| !k.trim().is_empty());
        let huggingface_api_key = var("HUGGINGFACE_API_KEY").filter(|k| !k.trim().is_empty());

        let base = var("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
        let gemini_base_url =
            Url::parse(&base).map_err(|e| anyhow!("GEMINI_BASE_URL inválida ({base}): {e}"))?;

        Ok(Self {
            server_addr,
            dataset_path: PathBuf::from(dataset_path),
            diseases_dir: PathBuf::from(diseases_dir),
            enabled_diseases,
            upload_dir: PathBuf::from(var("UPLOAD_DIR").unwrap_or_else(|| "uploads".to_string())),
            static_dir: PathBuf::from(var("STATIC_DIR").unwrap_or_else(|| "ui/static".to_string())),
            max_upload_bytes: 16 * 1024 * 1024,
            ai_provider,
            ai_model,
            gemini_api_key,
            huggingface_api_key,
            gemini_base_url,
            ai_timeout: Duration::from_secs(30),
            ai_min_interval: Duration::from_secs(1),
        })
    }

    /// Credencial del proveedor configurado, si existe.
    pub fn api_key(&self) -> Option<&str> {
        match self.ai_provider {
            AiProvider::Gemini => self.gemini_api_key.as_deref(),
            AiProvider::HuggingFace => self.huggingface_api_key.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let cfg = AppConfig::from_parts(FileSettings::default(), vars(&[])).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:5000");
        assert_eq!(cfg.ai_provider, AiProvider::Gemini);
        assert_eq!(cfg.ai_model, DEFAULT_GEMINI_MODEL);
        assert_eq!(cfg.enabled_diseases, vec!["lung_cancer".to_string()]);
        assert!(cfg.api_key().is_none());
        assert_eq!(cfg.ai_min_interval, Duration::from_secs(1));
    }

    #[test]
    fn file_api_key_overrides_environment() {
        let mut settings = FileSettings::default();
        settings.ai.api_key = Some("from-file".to_string());
        let cfg = AppConfig::from_parts(settings, vars(&[("GEMINI_API_KEY", "from-env")])).unwrap();
        assert_eq!(cfg.api_key(), Some("from-file"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let cfg = AppConfig::from_parts(FileSettings::default(), vars(&[("GEMINI_API_KEY", "  ")])).unwrap();
        assert!(cfg.api_key().is_none());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = AppConfig::from_parts(FileSettings::default(), vars(&[("AI_PROVIDER", "skynet")]));
        assert!(err.is_err());
    }

    #[test]
    fn yaml_file_is_read() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "api:\n  host: 0.0.0.0\n  port: 8080\nai:\n  provider: huggingface\ndiseases:\n  enabled: [lung_cancer, diabetes]\n"
        )
        .unwrap();

        let settings = FileSettings::load(file.path().to_str().unwrap());
        let cfg = AppConfig::from_parts(settings, vars(&[("HUGGINGFACE_API_KEY", "hf")])).unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:8080");
        assert_eq!(cfg.ai_provider, AiProvider::HuggingFace);
        assert_eq!(cfg.ai_model, DEFAULT_HUGGINGFACE_MODEL);
        assert_eq!(cfg.enabled_diseases.len(), 2);
        assert_eq!(cfg.api_key(), Some("hf"));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = FileSettings::load("does/not/exist.yaml");
        assert!(settings.ai.provider.is_none());
    }
}
