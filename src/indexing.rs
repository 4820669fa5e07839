//! Construcción del índice de películas: grafo → documentos → embeddings →
//! índice consultable (en memoria o persistido en Neo4j), y registro de
//! proceso que mantiene el índice activo.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::Instant,
};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    config::{AppConfig, EdgeField, IndexBackendKind},
    documents::build_documents,
    error::{Error, Result},
    llm::Embedder,
    neo4j_client::{MovieSource, Neo4jStore},
    vector_store::{IndexedDocument, MovieIndex, PersistedIndexStore, VectorBackend},
};

/// Resumen de una construcción (o carga) del índice.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexBuildSummary {
    pub index_name: String,
    pub backend: String,
    pub loaded_existing: bool,
    pub records_fetched: usize,
    pub documents_built: usize,
    pub records_skipped: usize,
    pub edges_declared: usize,
    pub elapsed_ms: u128,
}

impl fmt::Display for IndexBuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.loaded_existing {
            write!(
                f,
                "Índice '{}' ({}) cargado: {} documentos, {} aristas, {} ms.",
                self.index_name, self.backend, self.documents_built, self.edges_declared, self.elapsed_ms
            )
        } else {
            write!(
                f,
                "Índice '{}' ({}) construido: {} películas leídas, {} documentos, {} omitidas, {} aristas, {} ms.",
                self.index_name,
                self.backend,
                self.records_fetched,
                self.documents_built,
                self.records_skipped,
                self.edges_declared,
                self.elapsed_ms
            )
        }
    }
}

/// Sabe construir un índice nuevo; no guarda estado entre construcciones.
pub struct IndexBuilder {
    source: Arc<dyn MovieSource>,
    embedder: Arc<dyn Embedder>,
    persisted: Option<Arc<dyn PersistedIndexStore>>,
    backend: IndexBackendKind,
    index_name: String,
    fetch_limit: usize,
    edge_fields: Vec<EdgeField>,
}

impl IndexBuilder {
    pub fn from_config(cfg: &AppConfig, store: Arc<Neo4jStore>, embedder: Arc<dyn Embedder>) -> Self {
        let builder = Self::persisted(
            store.clone(),
            embedder,
            store,
            cfg.index_name.clone(),
            cfg.movie_fetch_limit,
            cfg.edge_fields.clone(),
        );
        Self {
            backend: cfg.index_backend,
            ..builder
        }
    }

    /// Constructor para índices efímeros sobre cualquier origen de películas.
    pub fn in_memory(
        source: Arc<dyn MovieSource>,
        embedder: Arc<dyn Embedder>,
        index_name: impl Into<String>,
        fetch_limit: usize,
        edge_fields: Vec<EdgeField>,
    ) -> Self {
        Self {
            source,
            embedder,
            persisted: None,
            backend: IndexBackendKind::Memory,
            index_name: index_name.into(),
            fetch_limit,
            edge_fields,
        }
    }

    /// Constructor con índice con nombre persistido en `store`.
    pub fn persisted(
        source: Arc<dyn MovieSource>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn PersistedIndexStore>,
        index_name: impl Into<String>,
        fetch_limit: usize,
        edge_fields: Vec<EdgeField>,
    ) -> Self {
        Self {
            persisted: Some(store),
            backend: IndexBackendKind::Neo4j,
            ..Self::in_memory(source, embedder, index_name, fetch_limit, edge_fields)
        }
    }

    /// Con `use_existing`, intenta cargar el índice con nombre antes de
    /// reconstruir desde el grafo.
    pub async fn build_index(&self, use_existing: bool) -> Result<(MovieIndex, IndexBuildSummary)> {
        let started = Instant::now();
        let mut summary = IndexBuildSummary {
            index_name: self.index_name.clone(),
            backend: format!("{:?}", self.backend).to_lowercase(),
            ..Default::default()
        };

        let index = match self.backend {
            IndexBackendKind::Memory => {
                let entries = self.embed_corpus(&mut summary).await?;
                self.assemble(entries, VectorBackend::InMemory)?
            }
            IndexBackendKind::Neo4j => {
                let store = self.persisted.as_ref().ok_or_else(|| {
                    Error::index_unavailable(&self.index_name, "no hay conexión a Neo4j configurada")
                })?;
                let backend = VectorBackend::Persisted {
                    store: Arc::clone(store),
                    index_name: self.index_name.clone(),
                };

                let existing = if use_existing {
                    match store.load(&self.index_name).await {
                        Ok(entries) => Some(entries),
                        Err(e) => {
                            warn!("No se pudo cargar el índice '{}': {e}. Se reconstruye.", self.index_name);
                            None
                        }
                    }
                } else {
                    None
                };

                match existing {
                    Some(entries) => {
                        summary.loaded_existing = true;
                        summary.documents_built = entries.len();
                        self.assemble(entries, backend)?
                    }
                    None => {
                        let entries = self.embed_corpus(&mut summary).await?;
                        store.persist(&self.index_name, &entries).await?;
                        self.assemble(entries, backend)?
                    }
                }
            }
        };

        summary.edges_declared = index.edges().map(|g| g.edge_count()).unwrap_or(0);
        summary.elapsed_ms = started.elapsed().as_millis();
        info!("{summary}");
        Ok((index, summary))
    }

    async fn embed_corpus(&self, summary: &mut IndexBuildSummary) -> Result<Vec<IndexedDocument>> {
        let records = self.source.fetch_movies(self.fetch_limit).await?;
        let documents = build_documents(&records);

        summary.records_fetched = records.len();
        summary.documents_built = documents.len();
        summary.records_skipped = records.len() - documents.len();

        if documents.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        // Una sola llamada: cada documento se embebe exactamente una vez.
        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        info!("Calculando {} embeddings con {}...", texts.len(), self.embedder.model_name());
        let embeddings = self.embedder.embed_texts(texts).await?;
        if embeddings.len() != documents.len() {
            return Err(Error::Embedding(format!(
                "Número de embeddings ({}) distinto al número de documentos ({})",
                embeddings.len(),
                documents.len()
            )));
        }

        Ok(documents
            .into_iter()
            .zip(embeddings)
            .map(|(document, embedding)| IndexedDocument {
                document: Arc::new(document),
                embedding,
            })
            .collect())
    }

    fn assemble(&self, entries: Vec<IndexedDocument>, backend: VectorBackend) -> Result<MovieIndex> {
        MovieIndex::new(
            self.index_name.clone(),
            entries,
            &self.edge_fields,
            backend,
            Arc::clone(&self.embedder),
        )
    }
}

/// Índice activo del proceso: se inicializa una vez bajo demanda y se
/// sustituye de forma atómica en cada reconstrucción.
pub struct IndexRegistry {
    builder: IndexBuilder,
    use_existing: bool,
    active: RwLock<Option<Arc<MovieIndex>>>,
    last_summary: RwLock<Option<IndexBuildSummary>>,
    build_lock: Mutex<()>,
}

impl IndexRegistry {
    pub fn new(builder: IndexBuilder, use_existing: bool) -> Self {
        Self {
            builder,
            use_existing,
            active: RwLock::new(None),
            last_summary: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    /// Índice activo, si ya se ha construido.
    pub fn active(&self) -> Option<Arc<MovieIndex>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last_summary(&self) -> Option<IndexBuildSummary> {
        self.last_summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Devuelve el índice activo, construyéndolo la primera vez. Un fallo se
    /// devuelve al llamador y no deja ningún índice a medias.
    pub async fn current(&self) -> Result<Arc<MovieIndex>> {
        if let Some(index) = self.active() {
            return Ok(index);
        }

        let _guard = self.build_lock.lock().await;
        if let Some(index) = self.active() {
            return Ok(index);
        }
        info!("Inicializando el índice de películas...");
        self.build_and_swap(self.use_existing).await.map(|(index, _)| index)
    }

    /// Reconstrucción explícita. Las lecturas en curso conservan el índice
    /// anterior; las nuevas ven el nuevo en cuanto se publica.
    pub async fn rebuild(&self, use_existing: bool) -> Result<IndexBuildSummary> {
        let _guard = self.build_lock.lock().await;
        self.build_and_swap(use_existing).await.map(|(_, summary)| summary)
    }

    async fn build_and_swap(&self, use_existing: bool) -> Result<(Arc<MovieIndex>, IndexBuildSummary)> {
        let (index, summary) = self.builder.build_index(use_existing).await.map_err(|e| {
            error!("Error construyendo el índice: {e}");
            e
        })?;

        let index = Arc::new(index);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&index));
        *self.last_summary.write().unwrap_or_else(PoisonError::into_inner) = Some(summary.clone());
        Ok((index, summary))
    }
}
