use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use neo4rs::{query, Graph, Row};
use tokio::sync::OnceCell;
use tracing::info;
use url::Url;

use crate::{config::AppConfig, error, models::MovieRecord};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints básicos para las etiquetas usadas en el grafo:
/// :Movie (fuente de verdad) y :MovieDocument (índice persistido).
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // Un mismo documento puede existir bajo varios nombres de índice.
        "DROP CONSTRAINT movie_document_id IF EXISTS",
        "CREATE CONSTRAINT movie_document_key IF NOT EXISTS
         FOR (d:MovieDocument)
         REQUIRE (d.index_name, d.id) IS UNIQUE",
        "CREATE INDEX movie_rating IF NOT EXISTS
         FOR (m:Movie)
         ON (m.vote_average)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado.");
    Ok(())
}

/// Origen de los registros de películas (contrato de consulta del grafo).
#[async_trait]
pub trait MovieSource: Send + Sync {
    /// Hasta `limit` películas, ordenadas por nota descendente.
    async fn fetch_movies(&self, limit: usize) -> error::Result<Vec<MovieRecord>>;
}

/// Acceso a Neo4j con conexión perezosa: se abre una sola vez por proceso.
pub struct Neo4jStore {
    cfg: AppConfig,
    graph: OnceCell<Arc<Graph>>,
}

impl Neo4jStore {
    pub fn new(cfg: AppConfig) -> Self {
        Self {
            cfg,
            graph: OnceCell::new(),
        }
    }

    /// Conexión compartida; si falla no queda nada cacheado.
    pub async fn graph(&self) -> error::Result<Arc<Graph>> {
        self.graph
            .get_or_try_init(|| async {
                let graph = connect_from_config(&self.cfg).await?;
                ensure_schema(&graph).await?;
                Ok::<_, anyhow::Error>(Arc::new(graph))
            })
            .await
            .map(Arc::clone)
            .map_err(|e| error::Error::index_unavailable(&self.cfg.index_name, format!("Neo4j inaccesible: {e}")))
    }
}

#[async_trait]
impl MovieSource for Neo4jStore {
    async fn fetch_movies(&self, limit: usize) -> error::Result<Vec<MovieRecord>> {
        let graph = self.graph().await?;
        fetch_movies(&graph, limit).await
    }
}

/// Una fila por par (película, género), con director y reparto agregados.
pub async fn fetch_movies(graph: &Graph, limit: usize) -> error::Result<Vec<MovieRecord>> {
    let mut cursor = graph
        .execute(
            query(
                "MATCH (movie:Movie)
                 WHERE movie.overview IS NOT NULL AND trim(movie.overview) <> ''
                 WITH movie ORDER BY movie.vote_average DESC, movie.id LIMIT $limit
                 MATCH (movie)-[:HAS_GENRE]->(genre:Genre)
                 OPTIONAL MATCH (movie)<-[:DIRECTED]-(director:Director)
                 OPTIONAL MATCH (movie)<-[acted:ACTED_IN]-(actor:Actor)
                 WITH movie, genre, director, actor ORDER BY coalesce(acted.order, 999)
                 WITH movie, genre,
                      collect(DISTINCT director.name) AS directors,
                      collect(DISTINCT actor.name) AS actors
                 RETURN movie.id AS movie_id, movie.title AS title,
                        movie.overview AS overview, movie.tagline AS tagline,
                        movie.release_date AS release_date, movie.vote_average AS rating,
                        movie.runtime AS runtime, genre.name AS genre,
                        head(directors) AS director_name, actors[..10] AS actors
                 ORDER BY rating DESC, movie_id",
            )
            .param("limit", limit as i64),
        )
        .await?;

    let mut rows = Vec::new();
    while let Some(row) = cursor.next().await? {
        if let Some(record) = record_from_row(&row) {
            rows.push(record);
        }
    }

    let movies = fold_movie_rows(rows);
    info!("{} películas recuperadas desde Neo4j.", movies.len());
    Ok(movies)
}

fn record_from_row(row: &Row) -> Option<MovieRecord> {
    let id = row
        .get::<i64>("movie_id")
        .map(|id| id.to_string())
        .or_else(|| row.get::<String>("movie_id"))?;

    let rating = row
        .get::<f64>("rating")
        .or_else(|| row.get::<i64>("rating").map(|r| r as f64))
        .unwrap_or(0.0);
    let runtime = row
        .get::<i64>("runtime")
        .and_then(|r| u32::try_from(r).ok());

    Some(MovieRecord {
        id,
        title: row.get("title").unwrap_or_default(),
        overview: row.get("overview"),
        tagline: row.get("tagline"),
        release_date: row.get("release_date"),
        rating,
        runtime,
        genres: row.get::<String>("genre").into_iter().collect(),
        director: row.get("director_name"),
        actors: row.get("actors").unwrap_or_default(),
    })
}

/// Agrupa las filas (película, género) por id de película, conservando el
/// orden de primera aparición y fusionando los géneros sin duplicados.
pub fn fold_movie_rows(rows: Vec<MovieRecord>) -> Vec<MovieRecord> {
    let mut movies: Vec<MovieRecord> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for row in rows {
        match by_id.get(&row.id) {
            Some(&pos) => {
                let movie = &mut movies[pos];
                for genre in row.genres {
                    if !movie.genres.contains(&genre) {
                        movie.genres.push(genre);
                    }
                }
                if movie.director.is_none() {
                    movie.director = row.director;
                }
                if movie.actors.is_empty() {
                    movie.actors = row.actors;
                }
            }
            None => {
                by_id.insert(row.id.clone(), movies.len());
                movies.push(row);
            }
        }
    }
    movies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::movie;

    #[test]
    fn rows_are_folded_per_movie() {
        let rows = vec![
            movie("1", "Inception", 8.8, "Nolan", &["Action"]),
            movie("2", "Interstellar", 8.6, "Nolan", &["Sci-Fi"]),
            movie("1", "Inception", 8.8, "Nolan", &["Sci-Fi"]),
            movie("1", "Inception", 8.8, "Nolan", &["Action"]),
        ];
        let movies = fold_movie_rows(rows);
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].id, "1");
        assert_eq!(movies[0].genres, vec!["Action", "Sci-Fi"]);
        assert_eq!(movies[1].id, "2");
    }

    #[test]
    fn duplicate_titles_with_different_ids_stay_apart() {
        let rows = vec![
            movie("10", "Solaris", 7.0, "Tarkovsky", &["Drama"]),
            movie("11", "Solaris", 6.2, "Soderbergh", &["Drama"]),
        ];
        assert_eq!(fold_movie_rows(rows).len(), 2);
    }
}
