//! Carga y gestión de configuración de la aplicación (servidor, proyectos y LLM).

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};

const DEFAULT_UPDATE_QUEUE_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
    /// Sin backend: cada petición produce una respuesta de reemplazo.
    Offline,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "offline" | "none" => Ok(Self::Offline),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
            Self::Ollama => "llama3",
            Self::Offline => "",
        }
    }

    /// Variable de entorno con la clave de API que lee `rig`.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Self::OpenAI => Some("OPENAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Ollama | Self::Offline => None,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub projects_dir: PathBuf,
    pub update_queue_capacity: usize,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3323".to_string());

        let projects_dir =
            PathBuf::from(env::var("PROJECTS_DIR").unwrap_or_else(|_| "projects".to_string()));

        let update_queue_capacity = match env::var("UPDATE_QUEUE_CAPACITY") {
            Ok(raw) => parse_capacity(&raw)?,
            Err(_) => DEFAULT_UPDATE_QUEUE_CAPACITY,
        };

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());

        Ok(Self {
            server_addr,
            projects_dir,
            update_queue_capacity,
            llm_provider,
            llm_chat_model,
        })
    }
}

fn parse_capacity(raw: &str) -> Result<usize> {
    let capacity: usize = raw
        .trim()
        .parse()
        .with_context(|| format!("UPDATE_QUEUE_CAPACITY no es un número: '{raw}'"))?;
    if capacity == 0 {
        return Err(anyhow!("UPDATE_QUEUE_CAPACITY debe ser al menos 1"));
    }
    Ok(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn providers_are_case_insensitive() {
        assert_eq!(LlmProvider::from_str("Gemini").unwrap(), LlmProvider::Gemini);
        assert_eq!(LlmProvider::from_str("OPENAI").unwrap(), LlmProvider::OpenAI);
        assert_eq!(LlmProvider::from_str("offline").unwrap(), LlmProvider::Offline);
        assert!(LlmProvider::from_str("claude-local").is_err());
    }

    #[test]
    fn capacity_must_be_positive() {
        assert_eq!(parse_capacity(" 4 ").unwrap(), 4);
        assert!(parse_capacity("0").is_err());
        assert!(parse_capacity("diez").is_err());
    }
}
