//! Modelos de dominio: registros de películas del grafo, documentos
//! indexables, candidatos de búsqueda y mensajes de conversación.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Valor literal usado cuando falta un campo opcional.
pub const UNKNOWN: &str = "Unknown";

/// Fila de película tal como la devuelve el grafo (:Movie + relaciones).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MovieRecord {
    pub id: String,
    pub title: String,
    pub overview: Option<String>,
    pub tagline: Option<String>,
    pub release_date: Option<String>,
    pub rating: f64,
    pub runtime: Option<u32>,
    pub genres: Vec<String>,
    pub director: Option<String>,
    /// Reparto ordenado por orden de aparición en los créditos.
    pub actors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingBucket {
    Low,
    Medium,
    High,
}

impl RatingBucket {
    /// `< 5` low, `[5, 7)` medium, `>= 7` high. NaN cae en low.
    pub fn from_rating(rating: f64) -> Self {
        if rating >= 7.0 {
            Self::High
        } else if rating >= 5.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthBucket {
    Short,
    Medium,
    Long,
}

impl LengthBucket {
    /// `< 90` short, `[90, 120)` medium, `>= 120` long.
    pub fn from_runtime(minutes: u32) -> Self {
        if minutes >= 120 {
            Self::Long
        } else if minutes >= 90 {
            Self::Medium
        } else {
            Self::Short
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "short" => Some(Self::Short),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            _ => None,
        }
    }
}

/// Metadatos normalizados de un documento.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    pub year: String,
    pub rating: f64,
    pub rating_bucket: RatingBucket,
    pub runtime: u32,
    pub length_bucket: LengthBucket,
    /// Géneros unidos por ", " o `Unknown`.
    pub genres: String,
    pub director: String,
    /// Hasta 5 actores unidos por ", " o `Unknown`.
    pub main_actors: String,
    /// Hasta 10 actores, usados para las aristas del grafo.
    pub actors: Vec<String>,
    pub movie_id: String,
}

/// Unidad de texto + metadatos indexable. Inmutable una vez construida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub overview: String,
    pub metadata: DocumentMetadata,
}

/// Documento devuelto por una búsqueda, con su puntuación.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub document: Arc<Document>,
    /// Similitud coseno entre la consulta y el documento.
    pub score: f64,
    /// Saltos desde el documento semilla más cercano (0 = coincidencia vectorial).
    pub depth: usize,
}

/// Vista resumida de una película para el usuario y el LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub title: String,
    pub overview: String,
    pub director: String,
    pub actors: String,
    pub genres: String,
    pub rating: f64,
    pub runtime: u32,
    pub year: String,
}

const SUMMARY_OVERVIEW_CHARS: usize = 300;

impl From<&Candidate> for MovieSummary {
    fn from(candidate: &Candidate) -> Self {
        let doc = &candidate.document;
        let meta = &doc.metadata;
        Self {
            title: meta.title.clone(),
            overview: truncate_chars(&doc.overview, SUMMARY_OVERVIEW_CHARS),
            director: meta.director.clone(),
            actors: meta.main_actors.clone(),
            genres: meta.genres.clone(),
            rating: meta.rating,
            runtime: meta.runtime,
            year: meta.year.clone(),
        }
    }
}

/// Corta un texto a `max` caracteres respetando los límites UTF-8.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Entrada del historial de una conversación.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Marca los mensajes de error mostrados al usuario.
    #[serde(default)]
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(content)
        }
    }
}
