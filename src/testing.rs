//! Dobles de prueba deterministas: embeddings por hashing de palabras,
//! origen de películas estático, índice persistido en memoria y corpus de
//! ejemplo.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    app_state::AppState,
    config::{AppConfig, EdgeField, RetrieverSettings},
    error::{Error, Result},
    indexing::{IndexBuilder, IndexRegistry},
    llm::{ChatModel, Embedder},
    models::{ChatMessage, MovieRecord},
    neo4j_client::{MovieSource, Neo4jStore},
    tools::MovieTools,
    vector_store::{cosine_similarity, IndexedDocument, PersistedIndexStore},
};

const DIMS: usize = 64;

pub fn movie(id: &str, title: &str, rating: f64, director: &str, genres: &[&str]) -> MovieRecord {
    let genre_text = genres.join(" ");
    MovieRecord {
        id: id.to_string(),
        title: title.to_string(),
        overview: Some(format!(
            "{title}: una historia de {genre_text} dirigida por {director}."
        )),
        tagline: None,
        release_date: Some("2000-01-01".to_string()),
        rating,
        runtime: Some(110),
        genres: genres.iter().map(|g| g.to_string()).collect(),
        director: (!director.is_empty()).then(|| director.to_string()),
        actors: vec![format!("Intérprete {id}")],
    }
}

/// Inception, Interstellar (Nolan) y Titanic (Cameron).
pub fn nolan_corpus() -> Vec<MovieRecord> {
    let mut inception = movie("27205", "Inception", 8.8, "Nolan", &["Sci-Fi"]);
    inception.overview = Some(
        "Un ladrón roba secretos infiltrándose en los sueños de sus víctimas y recibe el encargo de implantar una idea."
            .to_string(),
    );
    inception.release_date = Some("2010-07-16".to_string());
    inception.runtime = Some(148);

    let mut interstellar = movie("157336", "Interstellar", 8.6, "Nolan", &["Sci-Fi"]);
    interstellar.overview = Some(
        "Un grupo de exploradores viaja a través de un agujero de gusano en el espacio para salvar a la humanidad."
            .to_string(),
    );
    interstellar.release_date = Some("2014-11-05".to_string());
    interstellar.runtime = Some(169);

    let mut titanic = movie("597", "Titanic", 7.8, "Cameron", &["Romance"]);
    titanic.overview = Some(
        "Una joven aristócrata se enamora de un artista pobre a bordo del lujoso y desafortunado transatlántico."
            .to_string(),
    );
    titanic.release_date = Some("1997-11-18".to_string());
    titanic.runtime = Some(194);

    vec![inception, interstellar, titanic]
}

/// Bolsa de palabras proyectada por hashing: determinista y sin red.
#[derive(Default)]
pub struct HashEmbedder {
    texts: AtomicUsize,
}

impl HashEmbedder {
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn embed(text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; DIMS];
        vector[0] = 0.1;
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 2)
        {
            let bucket = 1 + (fnv1a(token) as usize % (DIMS - 1));
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

pub struct StaticSource {
    records: Vec<MovieRecord>,
    fetches: AtomicUsize,
    failing: AtomicBool,
    panicking: AtomicBool,
}

impl StaticSource {
    pub fn new(records: Vec<MovieRecord>) -> Self {
        Self {
            records,
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }
}

#[async_trait]
impl MovieSource for StaticSource {
    async fn fetch_movies(&self, limit: usize) -> Result<Vec<MovieRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.panicking.load(Ordering::SeqCst) {
            panic!("origen de películas corrupto");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::index_unavailable("movie_embeddings", "origen caído"));
        }
        Ok(self.records.iter().take(limit).cloned().collect())
    }
}

/// Índice con nombre guardado en memoria, con fallos inyectables.
#[derive(Default)]
pub struct MemoryIndexStore {
    indexes: Mutex<HashMap<String, Vec<IndexedDocument>>>,
    loads: AtomicUsize,
    persists: AtomicUsize,
    failing_load: AtomicBool,
    failing_search: AtomicBool,
    failing_persist: AtomicBool,
}

impl MemoryIndexStore {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn set_failing_load(&self, failing: bool) {
        self.failing_load.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_search(&self, failing: bool) {
        self.failing_search.store(failing, Ordering::SeqCst);
    }

    /// La persistencia borra el índice y falla antes de recrearlo.
    pub fn set_failing_persist(&self, failing: bool) {
        self.failing_persist.store(failing, Ordering::SeqCst);
    }

    pub fn contains(&self, index_name: &str) -> bool {
        self.indexes.lock().unwrap().contains_key(index_name)
    }
}

#[async_trait]
impl PersistedIndexStore for MemoryIndexStore {
    async fn load(&self, index_name: &str) -> Result<Vec<IndexedDocument>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing_load.load(Ordering::SeqCst) {
            return Err(Error::index_unavailable(index_name, "lectura fallida"));
        }
        self.indexes
            .lock()
            .unwrap()
            .get(index_name)
            .cloned()
            .ok_or_else(|| Error::index_unavailable(index_name, "el índice vectorial no existe"))
    }

    async fn persist(&self, index_name: &str, entries: &[IndexedDocument]) -> Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        let mut indexes = self.indexes.lock().unwrap();
        indexes.remove(index_name);
        if self.failing_persist.load(Ordering::SeqCst) {
            return Err(Error::index_unavailable(index_name, "no se pudo crear el índice"));
        }
        indexes.insert(index_name.to_string(), entries.to_vec());
        Ok(())
    }

    async fn top_n(&self, index_name: &str, query_vec: &[f64], n: usize) -> Result<Vec<String>> {
        if self.failing_search.load(Ordering::SeqCst) {
            return Err(Error::index_unavailable(index_name, "consulta fallida"));
        }
        let indexes = self.indexes.lock().unwrap();
        let entries = indexes
            .get(index_name)
            .ok_or_else(|| Error::index_unavailable(index_name, "el índice vectorial no existe"))?;
        let mut scored: Vec<(f64, &str)> = entries
            .iter()
            .map(|e| {
                let score = cosine_similarity(query_vec, &e.embedding).unwrap_or(0.0);
                (score, e.document.id.as_str())
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        Ok(scored.into_iter().take(n).map(|(_, id)| id.to_string()).collect())
    }
}

/// Registro en memoria sobre el corpus dado.
pub fn registry_for(records: Vec<MovieRecord>, edge_fields: &[EdgeField]) -> Arc<IndexRegistry> {
    registry_with_source(Arc::new(StaticSource::new(records)), edge_fields)
}

pub fn registry_with_source(source: Arc<StaticSource>, edge_fields: &[EdgeField]) -> Arc<IndexRegistry> {
    let builder = IndexBuilder::in_memory(
        source,
        Arc::new(HashEmbedder::default()),
        "movie_embeddings",
        500,
        edge_fields.to_vec(),
    );
    Arc::new(IndexRegistry::new(builder, false))
}

/// Constructor con backend persistido sobre `store`.
pub fn persisted_builder(
    source: Arc<StaticSource>,
    store: Arc<MemoryIndexStore>,
    embedder: Arc<HashEmbedder>,
) -> IndexBuilder {
    IndexBuilder::persisted(
        source,
        embedder,
        store,
        "movie_embeddings",
        500,
        EdgeField::ALL.to_vec(),
    )
}

pub fn settings() -> RetrieverSettings {
    RetrieverSettings::default()
}

/// Configuración mínima con las variables dadas por encima de las obligatorias.
pub fn test_config(extra: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("NEO4J_URI".to_string(), "neo4j://localhost:7687".to_string()),
        ("NEO4J_USER".to_string(), "neo4j".to_string()),
        ("NEO4J_PASSWORD".to_string(), "secret".to_string()),
        ("TURN_TIMEOUT_SECS".to_string(), "5".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    AppConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

pub fn app_state(config: AppConfig, registry: Arc<IndexRegistry>, chat_model: Arc<dyn ChatModel>) -> AppState {
    AppState::new(
        config.clone(),
        Arc::new(Neo4jStore::new(config)),
        registry,
        chat_model,
        None,
    )
}

/// Modelo que siempre contesta lo mismo sin usar herramientas.
pub struct FixedReply(pub &'static str);

#[async_trait]
impl ChatModel for FixedReply {
    async fn reply(
        &self,
        _preamble: &str,
        _history: &[ChatMessage],
        _input: &str,
        _tools: MovieTools,
    ) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}
