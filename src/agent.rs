//! Agente de recomendación: máquina de estados de la conversación.
//!
//! Idle → AwaitingQuery → Responding → AwaitingQuery. Cada turno puede
//! invocar las herramientas de recuperación cero o más veces; cualquier
//! fallo (error, pánico o tiempo agotado) se convierte en un mensaje visible
//! y queda registrado en el historial.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    config::RetrieverSettings,
    indexing::IndexRegistry,
    llm::ChatModel,
    models::ChatMessage,
    tools::{MovieTools, ToolInvocation},
};

pub const PREAMBLE: &str = "\
Eres un asistente experto en cine que recomienda películas del catálogo disponible.

Reglas:
1. Para cualquier recomendación llama antes a una herramienta: `retrieve_movies` para \
peticiones descriptivas (tono, temática, parecidas a...) o `search_by_filters` para \
peticiones precisas (director, género, nota, año).
2. Menciona ÚNICAMENTE películas devueltas por las herramientas en este turno. Nunca \
inventes títulos ni completes con tu propio conocimiento.
3. Si una herramienta indica que no se encontró ninguna película, dilo explícitamente \
y propón criterios más amplios (otro género, nota mínima menor, sin filtro de año...).
4. Recomienda como máximo 5 películas, cada una con una breve justificación basada en \
sus datos (director, géneros, nota, sinopsis).
5. Responde en el idioma del usuario, de forma concisa.";

pub const GREETING: &str = "¡Hola! Soy tu asistente de cine. Cuéntame qué te apetece ver \
(un género, un director, una película parecida a otra...) y te recomendaré algo del catálogo.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    AwaitingQuery,
    Responding,
}

/// Resultado de un turno tal y como se muestra al usuario.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub reply: String,
    pub is_error: bool,
    pub tool_calls: Vec<ToolInvocation>,
}

pub struct RecommendationAgent {
    state: AgentState,
    history: Vec<ChatMessage>,
    model: Arc<dyn ChatModel>,
    registry: Arc<IndexRegistry>,
    settings: RetrieverSettings,
    turn_timeout: Duration,
}

impl RecommendationAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<IndexRegistry>,
        settings: RetrieverSettings,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            state: AgentState::Idle,
            history: Vec::new(),
            model,
            registry,
            settings,
            turn_timeout,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Abre la conversación con el saludo inicial. No hace nada si ya está abierta.
    pub fn start(&mut self) {
        if self.state == AgentState::Idle {
            self.history.push(ChatMessage::assistant(GREETING));
            self.state = AgentState::AwaitingQuery;
        }
    }

    /// Vuelve a Idle y olvida el historial.
    pub fn reset(&mut self) {
        self.history.clear();
        self.state = AgentState::Idle;
    }

    /// Procesa un turno completo. Nunca falla: los errores se devuelven como
    /// respuesta marcada con `is_error`.
    pub async fn handle_turn(&mut self, input: &str) -> TurnReport {
        self.start();

        let input = input.trim();
        if input.is_empty() {
            return TurnReport {
                reply: "Escribe qué tipo de película buscas.".to_string(),
                is_error: true,
                tool_calls: Vec::new(),
            };
        }

        let tools = MovieTools::new(Arc::clone(&self.registry), self.settings.clone());
        let prior = self.history.clone();
        self.history.push(ChatMessage::user(input));
        self.state = AgentState::Responding;
        info!("Nuevo turno: {input}");

        let call = self.model.reply(PREAMBLE, &prior, input, tools.clone());
        let outcome = tokio::time::timeout(self.turn_timeout, AssertUnwindSafe(call).catch_unwind()).await;

        let (reply, is_error) = match outcome {
            Ok(Ok(Ok(text))) => (text, false),
            Ok(Ok(Err(e))) => {
                error!("Error en el turno: {e:#}");
                (
                    format!("Lo siento, se produjo un error al preparar la recomendación: {e}. Puedes intentarlo de nuevo."),
                    true,
                )
            }
            Ok(Err(_)) => {
                error!("Pánico durante el turno; la conversación continúa.");
                (
                    "Lo siento, se produjo un error interno al preparar la recomendación. Puedes intentarlo de nuevo."
                        .to_string(),
                    true,
                )
            }
            Err(_) => {
                warn!("Turno cancelado tras {:?}", self.turn_timeout);
                (
                    format!(
                        "Lo siento, la respuesta tardó más de {} segundos y se canceló. Puedes intentarlo de nuevo.",
                        self.turn_timeout.as_secs()
                    ),
                    true,
                )
            }
        };

        self.history.push(if is_error {
            ChatMessage::assistant_error(reply.clone())
        } else {
            ChatMessage::assistant(reply.clone())
        });
        self.state = AgentState::AwaitingQuery;

        TurnReport {
            reply,
            is_error,
            tool_calls: tools.invocations(),
        }
    }
}
