//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + índice).

use std::{env, time::Duration};

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Dónde vive el índice vectorial.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBackendKind {
    /// Índice efímero en memoria, se reconstruye en cada arranque.
    Memory,
    /// Índice persistido en Neo4j bajo un nombre fijo.
    Neo4j,
}

impl IndexBackendKind {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(Self::Memory),
            "neo4j" => Ok(Self::Neo4j),
            other => Err(anyhow!("Backend de índice no soportado: {other}")),
        }
    }
}

/// Campos de metadatos que declaran aristas de similitud entre documentos.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeField {
    Director,
    Genres,
    RatingBucket,
    Actors,
}

impl EdgeField {
    pub const ALL: [EdgeField; 4] = [
        EdgeField::Director,
        EdgeField::Genres,
        EdgeField::RatingBucket,
        EdgeField::Actors,
    ];

    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "director" => Ok(Self::Director),
            "genres" | "genre" => Ok(Self::Genres),
            "rating" | "rating_bucket" => Ok(Self::RatingBucket),
            "actors" | "actor" => Ok(Self::Actors),
            other => Err(anyhow!("Campo de arista desconocido: {other}")),
        }
    }

    /// Lista separada por comas; `none` (o vacío) desactiva las aristas.
    pub fn parse_list(s: &str) -> Result<Vec<Self>> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Vec::new());
        }
        let mut fields = Vec::new();
        for part in trimmed.split(',').filter(|p| !p.trim().is_empty()) {
            let field = Self::from_str(part)?;
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        Ok(fields)
    }
}

/// Parámetros de recuperación compartidos por todas las sesiones.
#[derive(Clone, Debug)]
pub struct RetrieverSettings {
    pub k: usize,
    pub start_k: usize,
    pub max_depth: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            k: 10,
            start_k: 5,
            max_depth: 3,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,

    pub index_backend: IndexBackendKind,
    pub index_name: String,
    pub index_use_existing: bool,
    pub movie_fetch_limit: usize,
    pub edge_fields: Vec<EdgeField>,
    pub retriever: RetrieverSettings,

    pub turn_timeout: Duration,
    pub warm_index_on_start: bool,

    /// Inactividad tras la que se descarta una conversación.
    pub session_ttl: Duration,
    /// Conversaciones vivas como máximo; se expulsa la menos reciente.
    pub max_sessions: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow!("Falta {key} en el entorno"))
        };
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let neo4j_uri = required("NEO4J_URI")?;
        let neo4j_user = required("NEO4J_USER")?;
        let neo4j_password = required("NEO4J_PASSWORD")?;

        let server_addr = or_default("SERVER_ADDR", "127.0.0.1:3322");

        let llm_provider = LlmProvider::from_str(&or_default("LLM_PROVIDER", "openai"))?;
        let llm_embedding_model = or_default("LLM_EMBEDDING_MODEL", "text-embedding-3-small");
        let llm_chat_model = or_default("LLM_CHAT_MODEL", "gpt-4o-mini");

        let index_backend = IndexBackendKind::from_str(&or_default("INDEX_BACKEND", "memory"))?;
        let index_name = or_default("INDEX_NAME", "movie_embeddings");
        let index_use_existing = parse_bool("INDEX_USE_EXISTING", &or_default("INDEX_USE_EXISTING", "true"))?;
        let movie_fetch_limit = parse_number("MOVIE_FETCH_LIMIT", &or_default("MOVIE_FETCH_LIMIT", "500"))?;
        let edge_fields = EdgeField::parse_list(&or_default(
            "RETRIEVER_EDGES",
            "director,genres,rating,actors",
        ))?;

        let retriever = RetrieverSettings {
            k: parse_number("RETRIEVER_K", &or_default("RETRIEVER_K", "10"))?,
            start_k: parse_number("RETRIEVER_START_K", &or_default("RETRIEVER_START_K", "5"))?,
            max_depth: parse_number("RETRIEVER_MAX_DEPTH", &or_default("RETRIEVER_MAX_DEPTH", "3"))?,
        };
        if retriever.k == 0 {
            return Err(anyhow!("RETRIEVER_K debe ser mayor que 0"));
        }

        let turn_timeout_secs: u64 =
            parse_number("TURN_TIMEOUT_SECS", &or_default("TURN_TIMEOUT_SECS", "60"))?;
        let warm_index_on_start =
            parse_bool("WARM_INDEX_ON_START", &or_default("WARM_INDEX_ON_START", "true"))?;

        let session_ttl_secs: u64 =
            parse_number("SESSION_TTL_SECS", &or_default("SESSION_TTL_SECS", "1800"))?;
        let max_sessions: usize = parse_number("MAX_SESSIONS", &or_default("MAX_SESSIONS", "1000"))?;
        if max_sessions == 0 {
            return Err(anyhow!("MAX_SESSIONS debe ser mayor que 0"));
        }

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            index_backend,
            index_name,
            index_use_existing,
            movie_fetch_limit,
            edge_fields,
            retriever,
            turn_timeout: Duration::from_secs(turn_timeout_secs),
            warm_index_on_start,
            session_ttl: Duration::from_secs(session_ttl_secs),
            max_sessions,
        })
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("Valor inválido para {key}: '{raw}'"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Valor booleano inválido para {key}: '{raw}'")),
    }
}
