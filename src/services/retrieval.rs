use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::RagConfig;

/// One ranked snippet from the external vector-search collaborator.
#[derive(Debug, Clone)]
pub struct RetrievedSnippet {
    pub text: String,
    pub source: Option<String>,
    pub score: f32,
}

/// Contract for the external embedding/vector-store collaborator. Ingestion,
/// chunking, and similarity search all live behind this seam; the server
/// only ever asks for ranked snippets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedSnippet>>;
}

/// Null collaborator used when retrieval is switched off.
pub struct DisabledRetrieval;

#[async_trait]
impl RetrievalProvider for DisabledRetrieval {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedSnippet>> {
        Ok(Vec::new())
    }
}

/// Query the collaborator and fold the surviving snippets into one context
/// block. Returns `None` when nothing scores above the floor, so callers can
/// fall through to a plain (non-augmented) prompt.
pub async fn retrieve_context(
    provider: &dyn RetrievalProvider,
    query: &str,
    config: &RagConfig,
) -> Result<Option<String>> {
    let snippets = provider.search(query, config.top_k).await?;
    debug!("Retrieval returned {} snippets", snippets.len());

    let context = build_context(&snippets, config.min_score);
    if let Some(ref block) = context {
        info!(
            "Using retrieved context ({} chars) for query of {} chars",
            block.len(),
            query.len()
        );
    }
    Ok(context)
}

/// Join snippet texts with `---` separators, dropping low-scoring ones.
pub fn build_context(snippets: &[RetrievedSnippet], min_score: f32) -> Option<String> {
    let kept: Vec<&str> = snippets
        .iter()
        .filter(|s| s.score >= min_score)
        .map(|s| s.text.as_str())
        .collect();

    if kept.is_empty() {
        return None;
    }
    Some(kept.join("\n---\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(text: &str, score: f32) -> RetrievedSnippet {
        RetrievedSnippet {
            text: text.to_string(),
            source: Some("doc.pdf".to_string()),
            score,
        }
    }

    #[test]
    fn test_build_context_filters_and_joins() {
        let snippets = vec![snippet("a", 0.9), snippet("low", 0.1), snippet("b", 0.5)];
        assert_eq!(build_context(&snippets, 0.3).unwrap(), "a\n---\nb");
    }

    #[test]
    fn test_build_context_empty_when_all_below_floor() {
        let snippets = vec![snippet("low", 0.1)];
        assert!(build_context(&snippets, 0.3).is_none());
        assert!(build_context(&[], 0.3).is_none());
    }

    #[tokio::test]
    async fn test_retrieve_context_passes_top_k_through() {
        let mut provider = MockRetrievalProvider::new();
        provider
            .expect_search()
            .withf(|query, top_k| query == "q" && *top_k == 5)
            .returning(|_, _| Ok(vec![]));

        let config = RagConfig::default();
        let context = retrieve_context(&provider, "q", &config).await.unwrap();
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_context_builds_block() {
        let mut provider = MockRetrievalProvider::new();
        provider
            .expect_search()
            .returning(|_, _| Ok(vec![snippet("relevant", 0.8)]));

        let config = RagConfig::default();
        let context = retrieve_context(&provider, "q", &config).await.unwrap();
        assert_eq!(context.unwrap(), "relevant");
    }

    #[tokio::test]
    async fn test_disabled_retrieval_is_always_empty() {
        let provider = DisabledRetrieval;
        assert!(provider.search("q", 5).await.unwrap().is_empty());
    }
}
