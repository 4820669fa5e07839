//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el futuro.
//!
//! El resto del sistema sólo ve dos costuras: [`Embedder`] (texto → vector)
//! y [`ChatModel`] (conversación + herramientas → texto).

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use rig::completion::{Message, Prompt};
use rig::embeddings::EmbeddingModel;
use rig::providers::openai;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{
    config::{AppConfig, LlmProvider},
    error::{Error, Result},
    models::{ChatMessage, Role},
    tools::{MovieTools, RetrieveMoviesTool, SearchByFiltersTool},
};

/// Rondas máximas de llamadas a herramientas dentro de un turno.
const MAX_TOOL_ROUNDS: usize = 5;

/// Función de embedding: determinista para un mismo modelo.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Un vector por texto, en el mismo orden.
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
}

/// Modelo de lenguaje con acceso a las herramientas de recomendación.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn reply(
        &self,
        preamble: &str,
        history: &[ChatMessage],
        input: &str,
        tools: MovieTools,
    ) -> anyhow::Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
    client: Arc<OnceCell<openai::Client>>,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración. El cliente del
    /// proveedor se crea en el primer uso.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            client: Arc::new(OnceCell::new()),
        }
    }

    async fn openai_client(&self) -> anyhow::Result<&openai::Client> {
        if !matches!(self.provider, LlmProvider::OpenAI) {
            return Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado",
                self.provider
            ));
        }
        self.client
            .get_or_try_init(|| async {
                if std::env::var("OPENAI_API_KEY").is_err() {
                    return Err(anyhow!("Falta OPENAI_API_KEY en el entorno"));
                }
                info!("Inicializando cliente OpenAI.");
                Ok(openai::Client::from_env())
            })
            .await
    }
}

// ---------------------------------------------------------------------
// EMBEDDINGS
// ---------------------------------------------------------------------

#[async_trait]
impl Embedder for LlmManager {
    fn model_name(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = self
            .openai_client()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let model_name = if self.embedding_model.is_empty() {
            openai::TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?;

        if embeddings.len() != expected {
            return Err(Error::Embedding(format!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            )));
        }

        debug!("{} embeddings calculados con {model_name}.", embeddings.len());
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

// ---------------------------------------------------------------------
// CHAT / COMPLETION
// ---------------------------------------------------------------------

#[async_trait]
impl ChatModel for LlmManager {
    async fn reply(
        &self,
        preamble: &str,
        history: &[ChatMessage],
        input: &str,
        tools: MovieTools,
    ) -> anyhow::Result<String> {
        use rig::client::CompletionClient as _;

        let client = self.openai_client().await?;

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(preamble)
            .tool(RetrieveMoviesTool::new(tools.clone()))
            .tool(SearchByFiltersTool::new(tools))
            .build();

        let mut rig_history: Vec<Message> = history
            .iter()
            .filter(|m| !m.is_error)
            .map(|m| match m.role {
                Role::User => Message::user(m.content.clone()),
                Role::Assistant => Message::assistant(m.content.clone()),
            })
            .collect();

        let answer = agent
            .prompt(input)
            .with_history(&mut rig_history)
            .multi_turn(MAX_TOOL_ROUNDS)
            .await?;
        Ok(answer)
    }
}
