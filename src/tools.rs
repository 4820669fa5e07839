//! Capacidades de recuperación expuestas al modelo de lenguaje:
//! `retrieve_movies` (semántica + filtros) y `search_by_filters` (sólo filtros).
//!
//! Ambas son de sólo lectura e idempotentes; el modelo puede llamarlas las
//! veces que quiera dentro de un turno.

use std::sync::{Arc, Mutex, PoisonError};

use rig::completion::ToolDefinition;
use rig::tool::Tool;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::{
    config::RetrieverSettings,
    error::{Error, Result},
    indexing::IndexRegistry,
    retriever::{RetrievalFilters, RetrievalOutcome, Retriever},
};

/// Argumentos de `retrieve_movies`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RetrieveMoviesArgs {
    /// Descripción del tipo de película buscada (ej: "thriller psicológico con giros").
    pub query: String,
    /// Género a filtrar (opcional, ej: "Action", "Drama").
    #[serde(default)]
    pub genre: Option<String>,
    /// Nota mínima deseada (opcional, ej: 7.0).
    #[serde(default)]
    pub min_rating: Option<f64>,
    /// Número máximo de resultados (por defecto 10).
    #[serde(default)]
    pub k: Option<usize>,
}

/// Argumentos de `search_by_filters`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct SearchByFiltersArgs {
    #[serde(flatten)]
    pub filters: RetrievalFilters,
    /// Número máximo de resultados (por defecto 10).
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    Found,
    NoMatch,
    Failed,
}

/// Traza de una llamada a herramienta dentro de un turno.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub arguments: serde_json::Value,
    pub outcome: InvocationOutcome,
    pub titles: Vec<String>,
}

/// Conjunto de herramientas de un turno, con su registro de llamadas.
#[derive(Clone)]
pub struct MovieTools {
    registry: Arc<IndexRegistry>,
    settings: RetrieverSettings,
    log: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl MovieTools {
    pub fn new(registry: Arc<IndexRegistry>, settings: RetrieverSettings) -> Self {
        Self {
            registry,
            settings,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn retriever(&self) -> Result<Retriever> {
        let index = self.registry.current().await?;
        Ok(Retriever::new(index, self.settings.clone()))
    }

    pub async fn retrieve_movies(&self, args: RetrieveMoviesArgs) -> Result<RetrievalOutcome> {
        info!("retrieve_movies: {:?}", args);
        let arguments = serde_json::to_value(&args).unwrap_or_default();
        let filters = RetrievalFilters {
            genre: args.genre,
            min_rating: args.min_rating,
            ..Default::default()
        };

        let result = match self.retriever().await {
            Ok(retriever) => retriever.retrieve(&args.query, filters, args.k).await,
            Err(e) => Err(e),
        };
        self.record(RetrieveMoviesTool::NAME, arguments, &result);
        result
    }

    pub async fn search_by_filters(&self, args: SearchByFiltersArgs) -> Result<RetrievalOutcome> {
        info!("search_by_filters: {:?}", args);
        let arguments = serde_json::to_value(&args).unwrap_or_default();

        let result = self
            .retriever()
            .await
            .map(|retriever| retriever.search_by_filters(args.filters, args.k));
        self.record(SearchByFiltersTool::NAME, arguments, &result);
        result
    }

    /// Llamadas realizadas hasta ahora, en orden.
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record(&self, tool: &str, arguments: serde_json::Value, result: &Result<RetrievalOutcome>) {
        let (outcome, titles) = match result {
            Ok(o) if o.is_no_match() => (InvocationOutcome::NoMatch, Vec::new()),
            Ok(o) => (InvocationOutcome::Found, o.titles()),
            Err(_) => (InvocationOutcome::Failed, Vec::new()),
        };
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ToolInvocation {
                tool: tool.to_string(),
                arguments,
                outcome,
                titles,
            });
    }
}

/// Esquema JSON de los argumentos, sin las claves de cabecera.
fn parameters_schema<T: JsonSchema>() -> serde_json::Value {
    let mut value = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({ "type": "object" }));
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    value
}

pub struct RetrieveMoviesTool(MovieTools);

impl RetrieveMoviesTool {
    pub fn new(tools: MovieTools) -> Self {
        Self(tools)
    }
}

impl Tool for RetrieveMoviesTool {
    const NAME: &'static str = "retrieve_movies";
    type Error = Error;
    type Args = RetrieveMoviesArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Busca películas del catálogo por similitud semántica con una descripción, \
                          con filtros opcionales de género y nota mínima. Devuelve las películas \
                          encontradas con sus metadatos, o un aviso explícito si no hay ninguna."
                .to_string(),
            parameters: parameters_schema::<RetrieveMoviesArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        self.0.retrieve_movies(args).await.map(|o| o.display_text())
    }
}

pub struct SearchByFiltersTool(MovieTools);

impl SearchByFiltersTool {
    pub fn new(tools: MovieTools) -> Self {
        Self(tools)
    }
}

impl Tool for SearchByFiltersTool {
    const NAME: &'static str = "search_by_filters";
    type Error = Error;
    type Args = SearchByFiltersArgs;
    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Búsqueda estructurada sin consulta semántica: películas que cumplen \
                          género, rango de nota, año mínimo y/o director, ordenadas por nota. \
                          Úsala para peticiones precisas como \"películas de X con nota > Y\"."
                .to_string(),
            parameters: parameters_schema::<SearchByFiltersArgs>(),
        }
    }

    async fn call(&self, args: Self::Args) -> std::result::Result<Self::Output, Self::Error> {
        self.0.search_by_filters(args).await.map(|o| o.display_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeField;
    use crate::testing::{nolan_corpus, registry_for, settings};

    #[tokio::test]
    async fn invocations_are_logged_in_order() {
        let tools = MovieTools::new(registry_for(nolan_corpus(), &EdgeField::ALL), settings());

        tools
            .search_by_filters(SearchByFiltersArgs {
                filters: RetrievalFilters {
                    director: Some("nolan".to_string()),
                    ..Default::default()
                },
                k: None,
            })
            .await
            .unwrap();
        tools
            .retrieve_movies(RetrieveMoviesArgs {
                query: "Nolan sci-fi".to_string(),
                genre: None,
                min_rating: Some(9.0),
                k: None,
            })
            .await
            .unwrap();

        let log = tools.invocations();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].tool, "search_by_filters");
        assert_eq!(log[0].outcome, InvocationOutcome::Found);
        assert_eq!(log[0].titles, vec!["Inception", "Interstellar"]);
        assert_eq!(log[1].tool, "retrieve_movies");
        assert_eq!(log[1].outcome, InvocationOutcome::NoMatch);
        assert_eq!(log[1].arguments["min_rating"], json!(9.0));
    }

    #[tokio::test]
    async fn tool_call_returns_display_text() {
        let tools = MovieTools::new(registry_for(nolan_corpus(), &[]), settings());
        let tool = SearchByFiltersTool::new(tools.clone());
        let text = tool
            .call(SearchByFiltersArgs {
                filters: RetrievalFilters {
                    genre: Some("Romance".to_string()),
                    ..Default::default()
                },
                k: Some(1),
            })
            .await
            .unwrap();
        assert!(text.starts_with("Titanic (1997)"));
        assert_eq!(tools.invocations().len(), 1);
    }

    #[test]
    fn flattened_filter_arguments_deserialize() {
        let args: SearchByFiltersArgs =
            serde_json::from_value(json!({ "director": "Nolan", "min_year": 2010, "k": 3 })).unwrap();
        assert_eq!(args.filters.director.as_deref(), Some("Nolan"));
        assert_eq!(args.filters.min_year, Some(2010));
        assert_eq!(args.k, Some(3));

        let args: RetrieveMoviesArgs = serde_json::from_value(json!({ "query": "thriller" })).unwrap();
        assert!(args.genre.is_none() && args.min_rating.is_none() && args.k.is_none());
    }

    #[test]
    fn schemas_expose_argument_names() {
        let schema = parameters_schema::<RetrieveMoviesArgs>();
        assert!(schema.get("$schema").is_none());
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("query"));
        assert!(properties.contains_key("min_rating"));

        let schema = parameters_schema::<SearchByFiltersArgs>();
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("director"));
        assert!(properties.contains_key("max_rating"));
    }
}
