//! Índice vectorial de películas: pares (documento, embedding), aristas de
//! similitud por metadatos y dos backends de búsqueda (memoria / Neo4j).
//!
//! API pública:
//!   - `MovieIndex::new(...)`, `vector_search`, `expand`
//!   - `PersistedIndexStore`: carga, persistencia y top-n del índice con
//!     nombre; `Neo4jStore` lo implementa sobre `:MovieDocument`.

use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{query, Graph};
use tracing::{debug, info, warn};

use crate::{
    config::EdgeField,
    error::{Error, Result},
    llm::Embedder,
    models::{Candidate, Document, DocumentMetadata, LengthBucket, RatingBucket, UNKNOWN},
    neo4j_client::Neo4jStore,
};

/// Etiqueta de los nodos que guardan documentos indexados.
pub const DOCUMENT_LABEL: &str = "MovieDocument";

/// Documento con su embedding.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub document: Arc<Document>,
    pub embedding: Vec<f64>,
}

/// Índice con nombre que sobrevive al proceso.
#[async_trait]
pub trait PersistedIndexStore: Send + Sync {
    /// Documentos del índice, en el orden en que se guardaron. Falla con
    /// `IndexUnavailable` si el índice no existe o está vacío.
    async fn load(&self, index_name: &str) -> Result<Vec<IndexedDocument>>;

    /// Sustituye por completo el contenido del índice.
    async fn persist(&self, index_name: &str, entries: &[IndexedDocument]) -> Result<()>;

    /// Ids de los `n` documentos más cercanos según el índice vectorial.
    async fn top_n(&self, index_name: &str, query_vec: &[f64], n: usize) -> Result<Vec<String>>;
}

/// Dónde se resuelven las búsquedas por vecinos más cercanos.
#[derive(Clone)]
pub enum VectorBackend {
    InMemory,
    Persisted {
        store: Arc<dyn PersistedIndexStore>,
        index_name: String,
    },
}

impl fmt::Debug for VectorBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory => write!(f, "InMemory"),
            Self::Persisted { index_name, .. } => write!(f, "Persisted({index_name})"),
        }
    }
}

/// Aristas implícitas: dos documentos son adyacentes si comparten el valor
/// exacto de alguno de los campos declarados.
#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    fields: Vec<EdgeField>,
    groups: HashMap<(EdgeField, String), Vec<usize>>,
    keys: Vec<Vec<(EdgeField, String)>>,
}

impl SimilarityGraph {
    pub fn build(entries: &[IndexedDocument], fields: &[EdgeField]) -> Self {
        let mut groups: HashMap<(EdgeField, String), Vec<usize>> = HashMap::new();
        let mut keys = Vec::with_capacity(entries.len());

        for (pos, entry) in entries.iter().enumerate() {
            let mut doc_keys = Vec::new();
            for &field in fields {
                for value in edge_values(&entry.document.metadata, field) {
                    let key = (field, value);
                    groups.entry(key.clone()).or_default().push(pos);
                    doc_keys.push(key);
                }
            }
            keys.push(doc_keys);
        }

        Self {
            fields: fields.to_vec(),
            groups,
            keys,
        }
    }

    pub fn fields(&self) -> &[EdgeField] {
        &self.fields
    }

    /// Vecinos de un documento, ordenados y sin repetir.
    pub fn neighbors(&self, pos: usize) -> Vec<usize> {
        let Some(doc_keys) = self.keys.get(pos) else {
            return Vec::new();
        };
        let mut out = BTreeSet::new();
        for key in doc_keys {
            if let Some(members) = self.groups.get(key) {
                out.extend(members.iter().copied().filter(|&other| other != pos));
            }
        }
        out.into_iter().collect()
    }

    /// Número de pares distintos de documentos adyacentes.
    pub fn edge_count(&self) -> usize {
        (0..self.keys.len()).map(|pos| self.neighbors(pos).len()).sum::<usize>() / 2
    }
}

fn edge_values(meta: &DocumentMetadata, field: EdgeField) -> Vec<String> {
    let single = |value: &str| {
        if value.is_empty() || value == UNKNOWN {
            Vec::new()
        } else {
            vec![value.to_string()]
        }
    };
    match field {
        EdgeField::Director => single(&meta.director),
        EdgeField::Genres => single(&meta.genres),
        EdgeField::RatingBucket => vec![meta.rating_bucket.as_str().to_string()],
        EdgeField::Actors => meta.actors.clone(),
    }
}

/// Índice consultable. Inmutable una vez construido; se sustituye entero.
pub struct MovieIndex {
    name: String,
    entries: Vec<IndexedDocument>,
    positions: HashMap<String, usize>,
    edges: Option<SimilarityGraph>,
    backend: VectorBackend,
    embedder: Arc<dyn Embedder>,
    built_at: DateTime<Utc>,
}

impl MovieIndex {
    /// Falla con `EmptyCorpus` si no hay documentos.
    pub fn new(
        name: impl Into<String>,
        entries: Vec<IndexedDocument>,
        edge_fields: &[EdgeField],
        backend: VectorBackend,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let positions = entries
            .iter()
            .enumerate()
            .map(|(pos, e)| (e.document.id.clone(), pos))
            .collect();

        let edges = if edge_fields.is_empty() {
            None
        } else {
            Some(SimilarityGraph::build(&entries, edge_fields))
        };

        Ok(Self {
            name: name.into(),
            entries,
            positions,
            edges,
            backend,
            embedder,
            built_at: Utc::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn backend(&self) -> &VectorBackend {
        &self.backend
    }

    pub fn edges(&self) -> Option<&SimilarityGraph> {
        self.edges.as_ref()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn documents(&self) -> impl Iterator<Item = &Arc<Document>> {
        self.entries.iter().map(|e| &e.document)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
        self.embedder
            .embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("No se pudo generar embedding de la query".to_string()))
    }

    /// Los `n` documentos más similares, mejor primero.
    pub async fn vector_search(&self, query_vec: &[f64], n: usize) -> Result<Vec<Candidate>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let all = || (0..self.entries.len()).collect::<Vec<usize>>();
        let positions: Vec<usize> = match &self.backend {
            VectorBackend::InMemory => all(),
            // Los documentos ya están en memoria: si el índice remoto falla o
            // está a medio reconstruir, el recorrido local da el mismo ranking.
            VectorBackend::Persisted { store, index_name } => {
                match store.top_n(index_name, query_vec, n).await {
                    Ok(ids) => {
                        let found: Vec<usize> = ids
                            .iter()
                            .filter_map(|id| self.positions.get(id).copied())
                            .collect();
                        if found.len() < n.min(self.entries.len()) {
                            warn!(
                                "El índice '{index_name}' devolvió {} de {n} documentos conocidos; recorrido local.",
                                found.len()
                            );
                            all()
                        } else {
                            found
                        }
                    }
                    Err(e) => {
                        warn!("Búsqueda en el índice '{index_name}' fallida ({e}); recorrido local.");
                        all()
                    }
                }
            }
        };

        let mut hits: Vec<Candidate> = positions
            .into_iter()
            .map(|pos| self.candidate(pos, self.similarity(query_vec, pos), 0))
            .collect();
        hits.sort_by(rank_by_similarity);
        hits.truncate(n);
        Ok(hits)
    }

    /// Expansión en anchura desde las semillas siguiendo las aristas de
    /// similitud hasta `max_depth` saltos. Orden: menos saltos primero,
    /// luego mayor similitud, luego id.
    pub fn expand(
        &self,
        query_vec: &[f64],
        seeds: &[Candidate],
        k: usize,
        max_depth: usize,
    ) -> Vec<Candidate> {
        let mut depth_of: HashMap<usize, usize> = HashMap::new();
        let mut frontier = Vec::new();
        for seed in seeds {
            if let Some(&pos) = self.positions.get(&seed.document.id) {
                if depth_of.insert(pos, 0).is_none() {
                    frontier.push(pos);
                }
            }
        }

        if let Some(graph) = &self.edges {
            let mut depth = 0;
            // Con k nodos a menor profundidad, los más lejanos ya no entran.
            while depth < max_depth && depth_of.len() < k && !frontier.is_empty() {
                depth += 1;
                let mut next = BTreeSet::new();
                for &pos in &frontier {
                    for neighbor in graph.neighbors(pos) {
                        if !depth_of.contains_key(&neighbor) {
                            next.insert(neighbor);
                        }
                    }
                }
                for &pos in &next {
                    depth_of.insert(pos, depth);
                }
                frontier = next.into_iter().collect();
            }
        }

        let mut candidates: Vec<Candidate> = depth_of
            .into_iter()
            .map(|(pos, depth)| self.candidate(pos, self.similarity(query_vec, pos), depth))
            .collect();
        candidates.sort_by(rank_by_proximity);
        candidates.truncate(k);

        debug!(
            "Expansión en grafo: {} semillas → {} candidatos (max_depth={max_depth}).",
            seeds.len(),
            candidates.len()
        );
        candidates
    }

    fn similarity(&self, query_vec: &[f64], pos: usize) -> f64 {
        cosine_similarity(query_vec, &self.entries[pos].embedding).unwrap_or(0.0)
    }

    fn candidate(&self, pos: usize, score: f64, depth: usize) -> Candidate {
        Candidate {
            document: Arc::clone(&self.entries[pos].document),
            score,
            depth,
        }
    }
}

fn rank_by_similarity(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.document.id.cmp(&b.document.id))
}

fn rank_by_proximity(a: &Candidate, b: &Candidate) -> Ordering {
    a.depth.cmp(&b.depth).then_with(|| rank_by_similarity(a, b))
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

// ---------------------------------------------------------------------
// PERSISTENCIA EN NEO4J
// ---------------------------------------------------------------------

/// Los nombres de índice se interpolan en Cypher: sólo [A-Za-z0-9_].
fn checked_index_name(name: &str) -> Result<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(Error::index_unavailable(name, "nombre de índice inválido"))
    }
}

/// ¿Existe ya el índice vectorial con ese nombre?
async fn vector_index_exists(graph: &Graph, index_name: &str) -> Result<bool> {
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", index_name),
        )
        .await?;
    Ok(cursor.next().await?.is_some())
}

/// Etiqueta propia de cada índice con nombre: el índice vectorial sólo ve
/// los nodos de su nombre.
fn scope_label(index_name: &str) -> String {
    format!("{DOCUMENT_LABEL}_{index_name}")
}

#[async_trait]
impl PersistedIndexStore for Neo4jStore {
    async fn load(&self, index_name: &str) -> Result<Vec<IndexedDocument>> {
        let graph = self.graph().await?;
        load_persisted(&graph, index_name).await
    }

    async fn persist(&self, index_name: &str, entries: &[IndexedDocument]) -> Result<()> {
        let graph = self.graph().await?;
        persist_index(&graph, index_name, entries).await
    }

    async fn top_n(&self, index_name: &str, query_vec: &[f64], n: usize) -> Result<Vec<String>> {
        let graph = self.graph().await?;
        neo4j_top_n(&graph, index_name, query_vec, n).await
    }
}

/// Sustituye los documentos del índice con nombre y recrea el índice vectorial.
async fn persist_index(graph: &Graph, index_name: &str, entries: &[IndexedDocument]) -> Result<()> {
    let index_name = checked_index_name(index_name)?;
    let scope = scope_label(index_name);
    let dimensions = entries
        .first()
        .map(|e| e.embedding.len())
        .ok_or(Error::EmptyCorpus)?;

    let tx = graph.start_txn().await?;
    tx.run(
        query("MATCH (d:MovieDocument {index_name: $index_name}) DETACH DELETE d")
            .param("index_name", index_name),
    )
    .await?;

    for (position, entry) in entries.iter().enumerate() {
        let doc = &entry.document;
        let meta = &doc.metadata;
        tx.run(
            query(&format!(
                "CREATE (d:{DOCUMENT_LABEL}:{scope} {{id: $id, index_name: $index_name}})
                 SET d.position = $position,
                     d.movie_id = $movie_id, d.text = $text, d.overview = $overview,
                     d.embedding = $embedding, d.title = $title, d.year = $year,
                     d.rating = $rating, d.rating_bucket = $rating_bucket,
                     d.runtime = $runtime, d.length_bucket = $length_bucket,
                     d.genres = $genres, d.director = $director,
                     d.main_actors = $main_actors, d.actors = $actors
                 WITH d
                 OPTIONAL MATCH (m:Movie) WHERE toString(m.id) = $movie_id
                 FOREACH (_ IN CASE WHEN m IS NULL THEN [] ELSE [1] END |
                     MERGE (d)-[:DESCRIBES]->(m))"
            ))
            .param("id", doc.id.clone())
            .param("index_name", index_name)
            .param("position", position as i64)
            .param("movie_id", meta.movie_id.clone())
            .param("text", doc.content.clone())
            .param("overview", doc.overview.clone())
            .param("embedding", entry.embedding.clone())
            .param("title", meta.title.clone())
            .param("year", meta.year.clone())
            .param("rating", meta.rating)
            .param("rating_bucket", meta.rating_bucket.as_str())
            .param("runtime", i64::from(meta.runtime))
            .param("length_bucket", meta.length_bucket.as_str())
            .param("genres", meta.genres.clone())
            .param("director", meta.director.clone())
            .param("main_actors", meta.main_actors.clone())
            .param("actors", meta.actors.clone()),
        )
        .await?;
    }
    tx.commit().await?;

    graph
        .run(query(&format!("DROP INDEX {index_name} IF EXISTS")))
        .await?;

    let cypher = format!(
        "\
CREATE VECTOR INDEX {index_name}
FOR (d:{scope})
ON (d.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );
    graph.run(query(&cypher)).await?;
    graph
        .run(query("CALL db.awaitIndex($name, 300)").param("name", index_name))
        .await?;

    info!(
        "Índice vectorial '{index_name}' persistido: {} documentos, {dimensions} dimensiones.",
        entries.len()
    );
    Ok(())
}

/// Carga los documentos de un índice con nombre ya persistido.
async fn load_persisted(graph: &Graph, index_name: &str) -> Result<Vec<IndexedDocument>> {
    let index_name = checked_index_name(index_name)?;
    if !vector_index_exists(graph, index_name).await? {
        return Err(Error::index_unavailable(index_name, "el índice vectorial no existe"));
    }

    let mut cursor = graph
        .execute(
            query(
                "MATCH (d:MovieDocument {index_name: $index_name})
                 RETURN d.id AS id, d.movie_id AS movie_id, d.text AS text,
                        d.overview AS overview, d.embedding AS embedding,
                        d.title AS title, d.year AS year, d.rating AS rating,
                        d.rating_bucket AS rating_bucket, d.runtime AS runtime,
                        d.length_bucket AS length_bucket, d.genres AS genres,
                        d.director AS director, d.main_actors AS main_actors,
                        d.actors AS actors
                 ORDER BY d.position",
            )
            .param("index_name", index_name),
        )
        .await?;

    let missing = |field: &str| {
        Error::index_unavailable(index_name, format!("falta el campo '{field}' en un documento"))
    };

    let mut entries = Vec::new();
    while let Some(row) = cursor.next().await? {
        let id: String = row.get("id").ok_or_else(|| missing("id"))?;
        let embedding: Vec<f64> = row.get("embedding").ok_or_else(|| missing("embedding"))?;
        let rating: f64 = row.get("rating").unwrap_or(0.0);
        let runtime = row
            .get::<i64>("runtime")
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(0);

        let metadata = DocumentMetadata {
            title: row.get("title").unwrap_or_else(|| UNKNOWN.to_string()),
            year: row.get("year").unwrap_or_else(|| UNKNOWN.to_string()),
            rating,
            rating_bucket: row
                .get::<String>("rating_bucket")
                .and_then(|b| RatingBucket::from_label(&b))
                .unwrap_or_else(|| RatingBucket::from_rating(rating)),
            runtime,
            length_bucket: row
                .get::<String>("length_bucket")
                .and_then(|b| LengthBucket::from_label(&b))
                .unwrap_or_else(|| LengthBucket::from_runtime(runtime)),
            genres: row.get("genres").unwrap_or_else(|| UNKNOWN.to_string()),
            director: row.get("director").unwrap_or_else(|| UNKNOWN.to_string()),
            main_actors: row.get("main_actors").unwrap_or_else(|| UNKNOWN.to_string()),
            actors: row.get("actors").unwrap_or_default(),
            movie_id: row.get("movie_id").ok_or_else(|| missing("movie_id"))?,
        };

        let document = Document {
            id,
            content: row.get("text").ok_or_else(|| missing("text"))?,
            overview: row.get("overview").unwrap_or_default(),
            metadata,
        };
        entries.push(IndexedDocument {
            document: Arc::new(document),
            embedding,
        });
    }

    if entries.is_empty() {
        return Err(Error::index_unavailable(index_name, "el índice no contiene documentos"));
    }
    info!("Índice '{index_name}' cargado desde Neo4j: {} documentos.", entries.len());
    Ok(entries)
}

/// Búsqueda vectorial (semantic search) sobre el índice con nombre.
async fn neo4j_top_n(graph: &Graph, index_name: &str, query_vec: &[f64], n: usize) -> Result<Vec<String>> {
    let mut cursor = graph
        .execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 WHERE node.index_name = $index_name
                 RETURN node.id AS id, score
                 ORDER BY score DESC",
            )
            .param("index_name", index_name)
            .param("k", n as i64)
            .param("embedding", query_vec.to_vec()),
        )
        .await
        .map_err(|e| Error::index_unavailable(index_name, e))?;

    let mut ids = Vec::new();
    while let Some(row) = cursor.next().await? {
        if let Some(id) = row.get::<String>("id") {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::build_document;
    use crate::testing::{movie, HashEmbedder, MemoryIndexStore};

    fn entries_for(records: &[crate::models::MovieRecord]) -> Vec<IndexedDocument> {
        records
            .iter()
            .filter_map(build_document)
            .enumerate()
            .map(|(i, doc)| {
                let mut embedding = vec![0.0; 4];
                embedding[i % 4] = 1.0;
                IndexedDocument {
                    document: Arc::new(doc),
                    embedding,
                }
            })
            .collect()
    }

    fn index_with(records: &[crate::models::MovieRecord], fields: &[EdgeField]) -> MovieIndex {
        MovieIndex::new(
            "test",
            entries_for(records),
            fields,
            VectorBackend::InMemory,
            Arc::new(HashEmbedder::default()),
        )
        .unwrap()
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
    }

    #[test]
    fn empty_entries_are_rejected() {
        let result = MovieIndex::new(
            "test",
            Vec::new(),
            &[],
            VectorBackend::InMemory,
            Arc::new(HashEmbedder::default()),
        );
        assert!(matches!(result, Err(Error::EmptyCorpus)));
    }

    #[test]
    fn edges_link_shared_metadata_only() {
        let records = vec![
            movie("1", "Inception", 8.8, "Nolan", &["Sci-Fi"]),
            movie("2", "Interstellar", 8.6, "Nolan", &["Sci-Fi"]),
            movie("3", "Titanic", 4.0, "Cameron", &["Romance"]),
        ];
        let index = index_with(&records, &[EdgeField::Director, EdgeField::RatingBucket]);
        let graph = index.edges().unwrap();
        assert_eq!(graph.neighbors(0), vec![1]);
        assert_eq!(graph.neighbors(1), vec![0]);
        assert!(graph.neighbors(2).is_empty());
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn unknown_values_do_not_create_edges() {
        let mut a = movie("1", "A", 6.0, "", &[]);
        a.director = None;
        let mut b = movie("2", "B", 6.0, "", &[]);
        b.director = None;
        let index = index_with(&[a, b], &[EdgeField::Director, EdgeField::Genres]);
        assert_eq!(index.edges().unwrap().edge_count(), 0);
    }

    #[test]
    fn actors_link_through_any_shared_name() {
        let mut a = movie("1", "A", 6.0, "X", &["Drama"]);
        a.actors = vec!["Leonardo DiCaprio".into(), "Tom Hardy".into()];
        let mut b = movie("2", "B", 6.0, "Y", &["Comedy"]);
        b.actors = vec!["Kate Winslet".into(), "Leonardo DiCaprio".into()];
        let index = index_with(&[a, b], &[EdgeField::Actors]);
        assert_eq!(index.edges().unwrap().neighbors(0), vec![1]);
    }

    #[tokio::test]
    async fn vector_search_is_ranked_and_truncated() {
        let records = vec![
            movie("1", "A", 6.0, "X", &["Drama"]),
            movie("2", "B", 6.0, "Y", &["Drama"]),
            movie("3", "C", 6.0, "Z", &["Drama"]),
        ];
        let index = index_with(&records, &[]);
        let hits = index.vector_search(&[0.0, 1.0, 0.2, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.id, "movie_2");
        assert_eq!(hits[1].document.id, "movie_3");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn expansion_prefers_lower_depth_then_similarity() {
        let records = vec![
            movie("1", "Inception", 8.8, "Nolan", &["Sci-Fi"]),
            movie("2", "Interstellar", 8.6, "Nolan", &["Sci-Fi"]),
            movie("3", "Titanic", 7.8, "Cameron", &["Romance"]),
            movie("4", "Avatar", 7.5, "Cameron", &["Sci-Fi"]),
        ];
        let index = index_with(&records, &[EdgeField::Director]);
        let query = [1.0, 0.0, 0.0, 0.9];
        let seeds = index.vector_search(&query, 1).await.unwrap();
        assert_eq!(seeds[0].document.id, "movie_1");

        let expanded = index.expand(&query, &seeds, 10, 3);
        let ids: Vec<&str> = expanded.iter().map(|c| c.document.id.as_str()).collect();
        // Avatar es muy similar pero no está conectado con Inception por director.
        assert_eq!(ids, vec!["movie_1", "movie_2"]);
        assert_eq!(expanded[1].depth, 1);
    }

    #[tokio::test]
    async fn expansion_stops_when_k_is_reached() {
        let records = vec![
            movie("1", "A", 8.0, "Nolan", &["Sci-Fi"]),
            movie("2", "B", 8.0, "Nolan", &["Sci-Fi"]),
            movie("3", "C", 8.0, "Nolan", &["Sci-Fi"]),
        ];
        let index = index_with(&records, &[EdgeField::Director]);
        let query = [1.0, 0.0, 0.0, 0.0];
        let seeds = index.vector_search(&query, 2).await.unwrap();
        let expanded = index.expand(&query, &seeds, 2, 3);
        assert_eq!(expanded.len(), 2);
        assert!(expanded.iter().all(|c| c.depth == 0));
    }

    #[test]
    fn index_names_are_validated() {
        assert!(checked_index_name("movie_embeddings").is_ok());
        assert!(checked_index_name("movie embeddings; DROP").is_err());
        assert!(checked_index_name("").is_err());
        assert_eq!(scope_label("movie_embeddings"), "MovieDocument_movie_embeddings");
    }

    fn persisted_index(entries: Vec<IndexedDocument>, store: Arc<MemoryIndexStore>) -> MovieIndex {
        MovieIndex::new(
            "test",
            entries,
            &[],
            VectorBackend::Persisted {
                store,
                index_name: "test".to_string(),
            },
            Arc::new(HashEmbedder::default()),
        )
        .unwrap()
    }

    fn ids(hits: &[Candidate]) -> Vec<&str> {
        hits.iter().map(|c| c.document.id.as_str()).collect()
    }

    #[tokio::test]
    async fn persisted_search_falls_back_to_local_scan() {
        let records = vec![
            movie("1", "A", 6.0, "X", &["Drama"]),
            movie("2", "B", 6.0, "Y", &["Drama"]),
            movie("3", "C", 6.0, "Z", &["Drama"]),
        ];
        let entries = entries_for(&records);
        let store = Arc::new(MemoryIndexStore::default());
        store.persist("test", &entries).await.unwrap();
        let index = persisted_index(entries, store.clone());
        let query = [0.0, 1.0, 0.2, 0.0];

        let remote = index.vector_search(&query, 2).await.unwrap();
        assert_eq!(ids(&remote), vec!["movie_2", "movie_3"]);

        store.set_failing_search(true);
        let local = index.vector_search(&query, 2).await.unwrap();
        assert_eq!(ids(&local), ids(&remote));
    }

    #[tokio::test]
    async fn incomplete_remote_hits_fall_back_to_local_scan() {
        let records = vec![
            movie("1", "A", 6.0, "X", &["Drama"]),
            movie("2", "B", 6.0, "Y", &["Drama"]),
        ];
        let entries = entries_for(&records);
        let store = Arc::new(MemoryIndexStore::default());
        // El índice remoto sólo conoce uno de los dos documentos.
        store.persist("test", &entries[..1]).await.unwrap();
        let index = persisted_index(entries, store);

        let hits = index.vector_search(&[1.0, 1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}
