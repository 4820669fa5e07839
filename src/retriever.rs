//! Recuperación de películas sobre el índice activo.
//!
//! Flujo:
//!   1. Embedding de la consulta.
//!   2. Top-k vectorial; con aristas declaradas, expansión en anchura desde
//!      `start_k` semillas hasta `max_depth` saltos.
//!   3. Con filtros, se piden `2k` candidatos antes de filtrar.
//!   4. Sin resultados tras filtrar: `NoMatch` con los filtros aplicados.
//!
//! La búsqueda sólo por filtros recorre el corpus completo y ordena por nota.

use std::{cmp::Ordering, fmt, sync::Arc};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::RetrieverSettings,
    error::{Error, Result},
    models::{Candidate, DocumentMetadata, MovieSummary, UNKNOWN},
    vector_store::MovieIndex,
};

/// Límite superior para `k`, sea quien sea quien lo pida.
pub const MAX_K: usize = 50;

/// Filtros estructurados; todos opcionales.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrievalFilters {
    /// Subcadena del género, sin distinguir mayúsculas ("Action" casa con "Action, Thriller").
    #[serde(default)]
    pub genre: Option<String>,
    /// Nota mínima incluida (0-10).
    #[serde(default)]
    pub min_rating: Option<f64>,
    /// Nota máxima incluida (0-10).
    #[serde(default)]
    pub max_rating: Option<f64>,
    /// Año de estreno mínimo incluido.
    #[serde(default)]
    pub min_year: Option<i32>,
    /// Subcadena del nombre del director, sin distinguir mayúsculas.
    #[serde(default)]
    pub director: Option<String>,
}

impl RetrievalFilters {
    /// Recorta textos y descarta los vacíos.
    pub fn normalized(self) -> Self {
        let clean = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            genre: clean(self.genre),
            director: clean(self.director),
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genre.is_none()
            && self.min_rating.is_none()
            && self.max_rating.is_none()
            && self.min_year.is_none()
            && self.director.is_none()
    }

    pub fn matches(&self, meta: &DocumentMetadata) -> bool {
        if let Some(genre) = &self.genre {
            if !contains_ignore_case(&meta.genres, genre) {
                return false;
            }
        }
        if let Some(min) = self.min_rating {
            if meta.rating < min {
                return false;
            }
        }
        if let Some(max) = self.max_rating {
            if meta.rating > max {
                return false;
            }
        }
        if let Some(min_year) = self.min_year {
            if !year_at_least(&meta.year, min_year) {
                return false;
            }
        }
        if let Some(director) = &self.director {
            if !contains_ignore_case(&meta.director, director) {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for RetrievalFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(genre) = &self.genre {
            parts.push(format!("genre={genre}"));
        }
        if let Some(min) = self.min_rating {
            parts.push(format!("min_rating={min:?}"));
        }
        if let Some(max) = self.max_rating {
            parts.push(format!("max_rating={max:?}"));
        }
        if let Some(year) = self.min_year {
            parts.push(format!("min_year={year}"));
        }
        if let Some(director) = &self.director {
            parts.push(format!("director={director}"));
        }
        if parts.is_empty() {
            write!(f, "ninguno")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// El año se guarda como texto; `Unknown` nunca supera un año mínimo.
fn year_at_least(year: &str, min_year: i32) -> bool {
    if year == UNKNOWN || !year.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    year.parse::<i32>().map(|y| y >= min_year).unwrap_or(false)
}

/// Resultado de una búsqueda: candidatos ordenados o ausencia explícita.
#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Found {
        query: Option<String>,
        filters: RetrievalFilters,
        candidates: Vec<Candidate>,
    },
    NoMatch {
        query: Option<String>,
        filters: RetrievalFilters,
    },
}

impl RetrievalOutcome {
    fn from_candidates(query: Option<String>, filters: RetrievalFilters, candidates: Vec<Candidate>) -> Self {
        if candidates.is_empty() {
            Self::NoMatch { query, filters }
        } else {
            Self::Found {
                query,
                filters,
                candidates,
            }
        }
    }

    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch { .. })
    }

    /// Consulta semántica; `None` en búsquedas sólo por filtros.
    pub fn query(&self) -> Option<&str> {
        match self {
            Self::Found { query, .. } | Self::NoMatch { query, .. } => query.as_deref(),
        }
    }

    pub fn filters(&self) -> &RetrievalFilters {
        match self {
            Self::Found { filters, .. } | Self::NoMatch { filters, .. } => filters,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        match self {
            Self::Found { candidates, .. } => candidates,
            Self::NoMatch { .. } => &[],
        }
    }

    pub fn summaries(&self) -> Vec<MovieSummary> {
        self.candidates().iter().map(MovieSummary::from).collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.candidates()
            .iter()
            .map(|c| c.document.metadata.title.clone())
            .collect()
    }

    /// Texto que se entrega al LLM y al usuario.
    pub fn display_text(&self) -> String {
        match self {
            Self::Found { .. } => self
                .summaries()
                .iter()
                .map(format_summary)
                .collect::<Vec<_>>()
                .join("\n\n"),
            Self::NoMatch { query, filters } => {
                let subject = match query {
                    Some(q) => format!("No se encontró ninguna película para \"{q}\""),
                    None => "No se encontró ninguna película".to_string(),
                };
                if filters.is_empty() {
                    format!("{subject}.")
                } else {
                    format!("{subject} que cumpla los criterios ({filters}).")
                }
            }
        }
    }
}

fn format_summary(movie: &MovieSummary) -> String {
    format!(
        "{} ({})\nNota: {}/10 | Duración: {} min\nGéneros: {}\nDirector: {}\nReparto: {}\nSinopsis: {}",
        movie.title,
        movie.year,
        movie.rating,
        movie.runtime,
        movie.genres,
        movie.director,
        movie.actors,
        movie.overview
    )
}

/// Recuperador de sólo lectura sobre un índice concreto. Barato de clonar.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<MovieIndex>,
    settings: RetrieverSettings,
}

impl Retriever {
    pub fn new(index: Arc<MovieIndex>, settings: RetrieverSettings) -> Self {
        Self { index, settings }
    }

    fn bound(&self, k: Option<usize>) -> usize {
        k.filter(|&k| k > 0).unwrap_or(self.settings.k).min(MAX_K)
    }

    /// Búsqueda semántica con filtros opcionales. Una consulta vacía se
    /// resuelve como búsqueda sólo por filtros.
    pub async fn retrieve(
        &self,
        query: &str,
        filters: RetrievalFilters,
        k: Option<usize>,
    ) -> Result<RetrievalOutcome> {
        let filters = filters.normalized();
        let query = query.trim();
        if query.is_empty() {
            return Ok(self.search_by_filters(filters, k));
        }

        let k = self.bound(k);
        let fetch = if filters.is_empty() { k } else { 2 * k };

        let pool = self.semantic_candidates(query, fetch).await.map_err(|e| match e {
            Error::IndexUnavailable { .. } => e,
            other => Error::RetrievalFailure {
                query: query.to_string(),
                filters: filters.to_string(),
                reason: other.to_string(),
            },
        })?;
        let fetched = pool.len();

        let candidates: Vec<Candidate> = pool
            .into_iter()
            .filter(|c| filters.matches(&c.document.metadata))
            .take(k)
            .collect();

        debug!(
            "retrieve('{query}', {filters}): {fetched} candidatos, {} tras filtrar.",
            candidates.len()
        );
        Ok(RetrievalOutcome::from_candidates(
            Some(query.to_string()),
            filters,
            candidates,
        ))
    }

    /// Búsqueda estructurada sin consulta semántica: todos los documentos
    /// que cumplen los filtros, por nota descendente.
    pub fn search_by_filters(&self, filters: RetrievalFilters, k: Option<usize>) -> RetrievalOutcome {
        let filters = filters.normalized();
        let k = self.bound(k);

        let mut candidates: Vec<Candidate> = self
            .index
            .documents()
            .filter(|doc| filters.matches(&doc.metadata))
            .map(|doc| Candidate {
                document: Arc::clone(doc),
                score: 0.0,
                depth: 0,
            })
            .collect();
        candidates.sort_by(|a, b| {
            let (a, b) = (&a.document, &b.document);
            b.metadata
                .rating
                .partial_cmp(&a.metadata.rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.metadata.title.cmp(&b.metadata.title))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates.truncate(k);

        debug!("search_by_filters({filters}): {} resultados.", candidates.len());
        RetrievalOutcome::from_candidates(None, filters, candidates)
    }

    async fn semantic_candidates(&self, query: &str, fetch: usize) -> Result<Vec<Candidate>> {
        let query_vec = self.index.embed_query(query).await?;
        if self.index.edges().is_some() {
            let seeds = self
                .index
                .vector_search(&query_vec, self.settings.start_k.max(1))
                .await?;
            Ok(self
                .index
                .expand(&query_vec, &seeds, fetch, self.settings.max_depth))
        } else {
            self.index.vector_search(&query_vec, fetch).await
        }
    }
}
