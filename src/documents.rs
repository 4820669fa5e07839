//! Conversión de registros de películas del grafo en documentos
//! indexables (texto enriquecido + metadatos normalizados).

use tracing::{debug, info};

use crate::models::{
    Document, DocumentMetadata, LengthBucket, MovieRecord, RatingBucket, UNKNOWN,
};

/// Actores mostrados en el texto y en `main_actors`.
pub const MAIN_ACTORS: usize = 5;
/// Actores conservados para las aristas del grafo.
pub const EDGE_ACTORS: usize = 10;

const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Identificador estable del documento: depende sólo del id de la película.
pub fn document_id(movie_id: &str) -> String {
    format!("movie_{movie_id}")
}

/// Construye un documento a partir de un registro, o `None` si la
/// sinopsis está vacía.
pub fn build_document(record: &MovieRecord) -> Option<Document> {
    let overview = record.overview.as_deref().map(str::trim).unwrap_or("");
    if overview.is_empty() {
        return None;
    }

    let title = non_blank(Some(record.title.as_str())).unwrap_or(UNKNOWN).to_string();
    let director = non_blank(record.director.as_deref())
        .unwrap_or(UNKNOWN)
        .to_string();

    let actors: Vec<String> = record
        .actors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .take(EDGE_ACTORS)
        .map(str::to_string)
        .collect();
    let main_actors = if actors.is_empty() {
        UNKNOWN.to_string()
    } else {
        actors
            .iter()
            .take(MAIN_ACTORS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    let genre_names: Vec<&str> = record
        .genres
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .collect();
    let genres = if genre_names.is_empty() {
        UNKNOWN.to_string()
    } else {
        genre_names.join(", ")
    };

    let mut parts = vec![format!("Título: {title}")];
    if let Some(tagline) = non_blank(record.tagline.as_deref()) {
        parts.push(tagline.to_string());
    }
    parts.push(overview.to_string());
    parts.push(format!("Dirigida por {director}"));
    parts.push(format!("Reparto: {main_actors}"));
    parts.push(format!("Géneros: {genres}"));
    let content = parts.join(PARAGRAPH_SEPARATOR);

    let runtime = record.runtime.unwrap_or(0);
    let metadata = DocumentMetadata {
        title,
        year: release_year(record.release_date.as_deref()),
        rating: record.rating,
        rating_bucket: RatingBucket::from_rating(record.rating),
        runtime,
        length_bucket: LengthBucket::from_runtime(runtime),
        genres,
        director,
        main_actors,
        actors,
        movie_id: record.id.clone(),
    };

    Some(Document {
        id: document_id(&record.id),
        content,
        overview: overview.to_string(),
        metadata,
    })
}

/// Construye todos los documentos válidos, conservando el orden de entrada.
pub fn build_documents(records: &[MovieRecord]) -> Vec<Document> {
    let documents: Vec<Document> = records
        .iter()
        .filter_map(|record| {
            let doc = build_document(record);
            if doc.is_none() {
                debug!("Película {} ('{}') sin sinopsis, se omite.", record.id, record.title);
            }
            doc
        })
        .collect();

    info!(
        "{} documentos creados ({} registros omitidos).",
        documents.len(),
        records.len() - documents.len()
    );
    documents
}

/// Año de estreno: lo que precede al primer separador de la fecha.
pub fn release_year(release_date: Option<&str>) -> String {
    match non_blank(release_date) {
        Some(date) => date
            .split(|c: char| !c.is_ascii_alphanumeric())
            .next()
            .filter(|year| !year.is_empty())
            .unwrap_or(UNKNOWN)
            .to_string(),
        None => UNKNOWN.to_string(),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::movie;

    #[test]
    fn blank_overview_is_not_indexable() {
        let mut record = movie("1", "Vacía", 7.0, "Nolan", &["Drama"]);
        record.overview = None;
        assert!(build_document(&record).is_none());

        record.overview = Some("   \n\t ".to_string());
        assert!(build_document(&record).is_none());
    }

    #[test]
    fn id_depends_only_on_movie_id() {
        let a = movie("27205", "Duplicada", 8.0, "Nolan", &["Drama"]);
        let b = movie("157336", "Duplicada", 8.0, "Nolan", &["Drama"]);
        let doc_a = build_document(&a).unwrap();
        let doc_b = build_document(&b).unwrap();
        assert_eq!(doc_a.id, "movie_27205");
        assert_ne!(doc_a.id, doc_b.id);

        let mut renamed = a.clone();
        renamed.title = "Otro título".to_string();
        assert_eq!(build_document(&renamed).unwrap().id, doc_a.id);
    }

    #[test]
    fn content_follows_fixed_order() {
        let mut record = movie("1", "Inception", 8.8, "Christopher Nolan", &["Sci-Fi", "Action"]);
        record.tagline = Some("Your mind is the scene of the crime.".to_string());
        let doc = build_document(&record).unwrap();
        let parts: Vec<&str> = doc.content.split("\n\n").collect();
        assert_eq!(parts[0], "Título: Inception");
        assert_eq!(parts[1], "Your mind is the scene of the crime.");
        assert_eq!(parts[2], doc.overview);
        assert_eq!(parts[3], "Dirigida por Christopher Nolan");
        assert!(parts[4].starts_with("Reparto: "));
        assert_eq!(parts[5], "Géneros: Sci-Fi, Action");
    }

    #[test]
    fn tagline_is_optional() {
        let record = movie("1", "Inception", 8.8, "Christopher Nolan", &["Sci-Fi"]);
        let doc = build_document(&record).unwrap();
        assert_eq!(doc.content.split("\n\n").count(), 5);
    }

    #[test]
    fn missing_fields_are_normalised() {
        let mut record = movie("9", "Sin datos", 4.2, "", &[]);
        record.director = None;
        record.actors.clear();
        record.release_date = None;
        record.runtime = None;
        let meta = build_document(&record).unwrap().metadata;
        assert_eq!(meta.director, UNKNOWN);
        assert_eq!(meta.genres, UNKNOWN);
        assert_eq!(meta.main_actors, UNKNOWN);
        assert_eq!(meta.year, UNKNOWN);
        assert_eq!(meta.runtime, 0);
        assert_eq!(meta.rating_bucket, RatingBucket::Low);
        assert_eq!(meta.length_bucket, LengthBucket::Short);
    }

    #[test]
    fn actor_lists_are_capped() {
        let mut record = movie("3", "Coral", 6.0, "Altman", &["Drama"]);
        record.actors = (1..=12).map(|i| format!("Actor {i}")).collect();
        let meta = build_document(&record).unwrap().metadata;
        assert_eq!(meta.main_actors.split(", ").count(), MAIN_ACTORS);
        assert_eq!(meta.actors.len(), EDGE_ACTORS);
        assert_eq!(meta.actors[9], "Actor 10");
    }

    #[test]
    fn year_is_prefix_before_separator() {
        assert_eq!(release_year(Some("2010-07-16")), "2010");
        assert_eq!(release_year(Some("1997/12/19")), "1997");
        assert_eq!(release_year(Some("2014")), "2014");
        assert_eq!(release_year(Some("")), UNKNOWN);
        assert_eq!(release_year(None), UNKNOWN);
    }

    #[test]
    fn build_documents_skips_invalid_records() {
        let mut empty = movie("2", "Vacía", 5.0, "X", &["Drama"]);
        empty.overview = Some(String::new());
        let records = vec![movie("1", "A", 7.0, "X", &["Drama"]), empty];
        let docs = build_documents(&records);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "movie_1");
    }
}
