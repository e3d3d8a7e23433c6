//! Abstracción sobre Rig para el backend de generación de texto.
//! Se implementan OpenAI y Gemini; Ollama queda preparado para el futuro.

use std::env;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::{debug, warn};

use crate::config::{AppConfig, LlmProvider};
use crate::error::BackendError;

const SYSTEM_PROMPT: &str = r#"
You are a helpful assistant taking part in a branching conversation.
Answer clearly and concisely, using the previous turns as context.
"#;

/// Colaborador externo: recibe un prompt y devuelve texto.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError>;
}

/// Gestor del LLM de chat.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración. Devuelve `None` si
    /// no hay backend utilizable (proveedor `offline` o falta la clave de API).
    pub fn from_config(cfg: &AppConfig) -> Option<Self> {
        if cfg.llm_provider == LlmProvider::Offline {
            return None;
        }
        if let Some(var) = cfg.llm_provider.api_key_var() {
            if env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
                warn!("Falta {var} en el entorno; se trabajará sin backend de generación");
                return None;
            }
        }
        Some(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn generate_with_openai(&self, prompt: &str) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(SYSTEM_PROMPT).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }

    async fn generate_with_gemini(&self, prompt: &str) -> Result<String> {
        use rig::providers::gemini;
        use rig::client::CompletionClient as _;

        let client = gemini::Client::from_env();
        let model_name = if self.chat_model.is_empty() {
            "gemini-1.5-flash"
        } else {
            self.chat_model.as_str()
        };

        let agent = client.agent(model_name).preamble(SYSTEM_PROMPT).build();
        let answer = agent.prompt(prompt).await?;
        Ok(answer)
    }
}

#[async_trait]
impl TextGenerator for LlmManager {
    async fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        debug!(provider = ?self.provider, model = %self.chat_model, "Enviando prompt:\n{}", prompt);
        let answer = match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(prompt).await?,
            LlmProvider::Gemini => self.generate_with_gemini(prompt).await?,
            ref other => {
                return Err(anyhow!("Proveedor LLM {:?} aún no implementado para chat", other).into())
            }
        };
        if answer.is_empty() {
            warn!("El LLM devolvió una respuesta vacía.");
        }
        Ok(answer)
    }
}
