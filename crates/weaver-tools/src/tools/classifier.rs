//! Deterministic keyword classifier provider.

use async_trait::async_trait;
use serde_json::json;

use crate::{Tool, ToolContext, ToolError, ToolRequest, ToolResponse};

/// Keyword-scoring classifier conforming to the classifier tool contract:
/// `text → {labels[], scores[]}`.
///
/// A label scores by the fraction of its keywords present in the input.
/// Labels with score zero are omitted; output is sorted by descending score.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    labels: Vec<(String, Vec<String>)>,
}

impl KeywordClassifier {
    /// A classifier with no labels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label with its keyword list.
    pub fn with_label(
        mut self,
        label: impl Into<String>,
        keywords: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.labels.push((
            label.into(),
            keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        ));
        self
    }
}

#[async_trait]
impl Tool for KeywordClassifier {
    fn name(&self) -> &str {
        "classifier"
    }

    fn description(&self) -> &str {
        "Scores text against configured labels by keyword overlap"
    }

    async fn invoke(
        &self,
        request: &ToolRequest,
        _ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let haystack = request.input.to_lowercase();
        let mut scored: Vec<(&str, f64)> = self
            .labels
            .iter()
            .filter_map(|(label, keywords)| {
                if keywords.is_empty() {
                    return None;
                }
                let hits = keywords.iter().filter(|k| haystack.contains(*k)).count();
                (hits > 0).then(|| (label.as_str(), hits as f64 / keywords.len() as f64))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let labels: Vec<&str> = scored.iter().map(|(l, _)| *l).collect();
        let scores: Vec<f64> = scored.iter().map(|(_, s)| *s).collect();
        Ok(ToolResponse::structured(
            json!({"labels": labels, "scores": scores}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> KeywordClassifier {
        KeywordClassifier::new()
            .with_label("pothole", ["pothole", "road", "asphalt"])
            .with_label("streetlight", ["light", "lamp", "dark"])
    }

    #[tokio::test]
    async fn scores_by_keyword_overlap() {
        let response = classifier()
            .invoke(
                &ToolRequest::text("Massive pothole tearing up the road"),
                &ToolContext::new("acme", "job-1"),
            )
            .await
            .unwrap();
        assert_eq!(response.output["labels"][0], "pothole");
        let score = response.output["scores"][0].as_f64().unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unmatched_labels_are_omitted() {
        let response = classifier()
            .invoke(
                &ToolRequest::text("nothing relevant here"),
                &ToolContext::new("acme", "job-1"),
            )
            .await
            .unwrap();
        assert_eq!(response.output["labels"].as_array().unwrap().len(), 0);
        assert_eq!(response.output["scores"].as_array().unwrap().len(), 0);
    }
}
