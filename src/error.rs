//! Taxonomía de errores de la capa de índice y recuperación.
//!
//! `NoMatch` no aparece aquí: una búsqueda válida sin resultados es un
//! resultado de primera clase (`retriever::RetrievalOutcome::NoMatch`).

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No se ha producido ningún documento indexable durante la construcción.
    #[error("corpus vacío: ningún registro de película tiene una sinopsis indexable")]
    EmptyCorpus,

    /// Backend inalcanzable o índice con nombre inexistente.
    #[error("índice '{index}' no disponible: {reason}")]
    IndexUnavailable { index: String, reason: String },

    /// Fallo inesperado durante el embedding o la búsqueda.
    #[error("fallo de recuperación para la consulta '{query}' (filtros: {filters}): {reason}")]
    RetrievalFailure {
        query: String,
        filters: String,
        reason: String,
    },

    #[error("error de embeddings: {0}")]
    Embedding(String),

    #[error("error de Neo4j: {0}")]
    Graph(#[from] neo4rs::Error),
}

impl Error {
    pub fn index_unavailable(index: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::IndexUnavailable {
            index: index.into(),
            reason: reason.to_string(),
        }
    }
}
