use crate::error::BackendError;
use crate::http::{endpoint_url, ensure_success};
use crate::models::{IndexHit, Passage, PassageMetadata, QueryFilters};
use crate::traits::{ensure_unique_ids, VectorIndex};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, BackendError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        Ok(Self {
            endpoint,
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> Result<url::Url, BackendError> {
        endpoint_url(
            &self.endpoint,
            &format!("collections/{}{}", self.collection, suffix),
        )
    }

    /// Creates the collection with cosine distance when it does not exist.
    pub fn ensure_collection(&self) -> Result<(), BackendError> {
        let response = self.client.get(self.collection_url("")?).send()?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(BackendError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let response = self
            .client
            .put(self.collection_url("")?)
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()?;
        ensure_success("qdrant", response)?;
        info!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

/// Qdrant only accepts integer or UUID point ids.
pub fn point_id(passage_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, passage_id.as_bytes())
}

fn payload(passage: &Passage) -> Result<Value, BackendError> {
    let mut payload = match serde_json::to_value(&passage.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("id".to_string(), json!(passage.id));
    payload.insert("text".to_string(), json!(passage.text));
    Ok(Value::Object(payload))
}

fn filter_body(filters: &QueryFilters) -> Option<Value> {
    let must = filters
        .predicates()
        .into_iter()
        .map(|(key, value)| json!({ "key": key, "match": { "value": value } }))
        .collect::<Vec<_>>();
    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

fn parse_hits(parsed: &Value) -> Result<Vec<IndexHit>, BackendError> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::BackendResponse {
            backend: "qdrant".to_string(),
            details: "search response has no result array".to_string(),
        })?;

    hits.iter()
        .map(|hit| {
            let payload = hit.pointer("/payload").cloned().unwrap_or(Value::Null);
            let text = payload
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string);
            let metadata: PassageMetadata = serde_json::from_value(payload)?;
            Ok(IndexHit { text, metadata })
        })
        .collect()
}

impl VectorIndex for QdrantStore {
    fn upsert(&self, passages: &[Passage]) -> Result<(), BackendError> {
        ensure_unique_ids(passages)?;

        let points = passages
            .iter()
            .map(|passage| {
                if passage.embedding.len() != self.vector_size {
                    return Err(BackendError::Request(format!(
                        "embedding dimension {} != {}",
                        passage.embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point_id(&passage.id),
                    "vector": passage.embedding,
                    "payload": payload(passage)?,
                }))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()?;
        ensure_success("qdrant", response)?;
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<IndexHit>, BackendError> {
        if embedding.len() != self.vector_size {
            return Err(BackendError::Request(format!(
                "query vector dim {} is not {}",
                embedding.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": embedding,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter_body(filters) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.collection_url("/points/search")?)
            .json(&body)
            .send()?;
        let parsed: Value = ensure_success("qdrant", response)?.json()?;
        parse_hits(&parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    #[test]
    fn point_ids_are_stable_per_passage() {
        assert_eq!(point_id("a.pdf_h_0"), point_id("a.pdf_h_0"));
        assert_ne!(point_id("a.pdf_h_0"), point_id("a.pdf_h_1"));
    }

    #[test]
    fn filters_become_must_clauses() {
        let filters = QueryFilters {
            section: Some(Section::Method),
            pdf_name: Some("a.pdf".to_string()),
            ..QueryFilters::default()
        };
        let body = filter_body(&filters).unwrap();
        assert_eq!(body["must"][0]["key"], "section");
        assert_eq!(body["must"][0]["match"]["value"], "method");
        assert_eq!(body["must"][1]["key"], "pdf_name");
        assert!(filter_body(&QueryFilters::default()).is_none());
    }

    #[test]
    fn search_response_is_parsed_into_hits() {
        let response = json!({
            "result": [
                {
                    "id": "d9d3c1c4-0000-0000-0000-000000000000",
                    "score": 0.91,
                    "payload": {
                        "text": "Metodologia aplicada",
                        "pdf_name": "a.pdf",
                        "title": "Tese",
                        "page_number": 3,
                        "section": "method"
                    }
                },
                { "id": 2, "score": 0.5, "payload": { "pdf_name": "b.pdf" } }
            ]
        });

        let hits = parse_hits(&response).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text.as_deref(), Some("Metodologia aplicada"));
        assert_eq!(hits[0].metadata.resolved_page(), Some(3));
        assert_eq!(hits[0].metadata.section, Some(Section::Method));
        assert_eq!(hits[1].text, None);
    }

    #[test]
    fn payload_carries_text_and_wire_metadata() {
        let passage = Passage {
            id: "a.pdf_h_0".to_string(),
            text: "body".to_string(),
            embedding: vec![0.0; 4],
            metadata: PassageMetadata {
                pdf_name: "a.pdf".to_string(),
                page: Some(0),
                page_number: Some(0),
                ..PassageMetadata::default()
            },
        };
        let value = payload(&passage).unwrap();
        assert_eq!(value["text"], "body");
        assert_eq!(value["pdf_name"], "a.pdf");
        assert_eq!(value["page"], 0);
        assert_eq!(value["page_number"], 0);
    }
}
