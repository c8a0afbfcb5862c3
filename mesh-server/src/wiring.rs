//! Assembles the orchestrator from configuration.

use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Context;
use mesh_adapters::embeddings::{
    EmbeddingAdapter, HashingEmbedder, OpenAiEmbeddings, OpenAiEmbeddingsConfig,
};
use mesh_adapters::openai::{OpenAiAdapter, OpenAiConfig};
use mesh_adapters::traits::ModelAdapter;
use mesh_config::{
    EmbedderKind, HistorySection, MatchingSection, ModelSection, SelectionKind, ServiceConfig,
    StrategyKind,
};
use mesh_history::{ChatHistory, FileJournalHistory, InMemoryHistory};
use mesh_orchestrator::{
    CapabilityMatcher, ChatOrchestrator, HttpToolInvoker, LabelScorer, ResponseComposer,
    RetryPolicy, SemanticScorer, Selection, SharedClassifier, SubstringScorer, ToolDispatcher,
};
use mesh_registry::{InMemoryToolRegistry, ToolRegistry};
use tracing::{info, warn};

/// Builds the full request pipeline described by `config`.
///
/// # Errors
///
/// Fails when an adapter cannot be configured, the history journal cannot be
/// opened, or a tunable is out of range.
pub async fn build_orchestrator(config: &ServiceConfig) -> anyhow::Result<ChatOrchestrator> {
    let adapter = completion_adapter(&config.model)?;
    let matcher = capability_matcher(&config.matching, &config.model).await?;
    let invoker = HttpToolInvoker::with_timeout(config.dispatch.timeout())?;
    let composer = ResponseComposer::new(adapter, matcher, ToolDispatcher::new(Arc::new(invoker)));

    let registry: Arc<dyn ToolRegistry> = Arc::new(InMemoryToolRegistry::with_liveness_window(
        config.registry.liveness_window(),
    )?);
    let history = chat_history(&config.history).await?;

    let max_attempts = NonZeroU32::new(config.orchestrator.max_attempts)
        .context("orchestrator.max_attempts must be at least 1")?;
    let orchestrator = ChatOrchestrator::new(registry, history, composer)
        .with_retry_policy(RetryPolicy::default().with_max_attempts(max_attempts))
        .with_request_timeout(config.orchestrator.request_timeout())?;
    info!(?orchestrator, "orchestrator assembled");
    Ok(orchestrator)
}

/// Builds the OpenAI-compatible completion adapter.
///
/// # Errors
///
/// Fails on a malformed base URL or a missing key for the public API.
pub fn completion_adapter(model: &ModelSection) -> anyhow::Result<Arc<dyn ModelAdapter>> {
    let mut config = OpenAiConfig::new(model.name.as_str()).with_timeout(model.timeout());
    if let Some(base_url) = &model.base_url {
        config = config
            .with_base_url(base_url)
            .context("invalid model.base_url")?;
    }
    if let Some(key) = model.resolved_api_key() {
        config = config.with_api_key(key);
    }
    if let Some(temperature) = model.temperature {
        config = config.with_default_temperature(temperature);
    }
    let adapter = OpenAiAdapter::new(config).context("failed to build completion adapter")?;
    Ok(Arc::new(adapter))
}

/// Builds the capability matcher, warming the semantic classifier when selected.
///
/// A failed warm-up is logged and retried lazily on the first request.
///
/// # Errors
///
/// Fails when the embedder cannot be configured or a tunable is out of range.
pub async fn capability_matcher(
    matching: &MatchingSection,
    model: &ModelSection,
) -> anyhow::Result<CapabilityMatcher> {
    let scorer: Arc<dyn LabelScorer> = match matching.strategy {
        StrategyKind::Substring => Arc::new(SubstringScorer),
        StrategyKind::Semantic => {
            let classifier = Arc::new(
                SharedClassifier::new(embedder(matching, model)?)
                    .with_temperature(matching.temperature)?,
            );
            match classifier.warm_up().await {
                Ok(info) => info!(dimensions = info.dimensions(), "semantic classifier ready"),
                Err(err) => warn!(%err, "semantic classifier warm-up failed; will retry lazily"),
            }
            Arc::new(SemanticScorer::new(classifier))
        }
    };

    let selection = match matching.effective_selection() {
        SelectionKind::AllMatches => Selection::AllMatches,
        SelectionKind::BestMatchAboveThreshold => Selection::BestMatchAboveThreshold,
    };
    Ok(CapabilityMatcher::new(scorer)
        .with_selection(selection)
        .with_threshold(matching.threshold)?)
}

fn embedder(
    matching: &MatchingSection,
    model: &ModelSection,
) -> anyhow::Result<Arc<dyn EmbeddingAdapter>> {
    match matching.embedder {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
        EmbedderKind::Remote => {
            let mut config = OpenAiEmbeddingsConfig::from_env(matching.embedding_model.as_str())
                .with_timeout(model.timeout());
            if let Some(base_url) = matching.embedding_base_url.as_ref().or(model.base_url.as_ref())
            {
                config = config
                    .with_base_url(base_url)
                    .context("invalid embedding base URL")?;
            }
            if let Some(key) = model.resolved_api_key() {
                config = config.with_api_key(key);
            }
            let embeddings =
                OpenAiEmbeddings::new(config).context("failed to build embedding adapter")?;
            Ok(Arc::new(embeddings))
        }
    }
}

/// Opens the file journal when configured, otherwise an in-memory store.
///
/// # Errors
///
/// Fails when the journal cannot be opened or replayed.
pub async fn chat_history(history: &HistorySection) -> anyhow::Result<Arc<dyn ChatHistory>> {
    match &history.journal_path {
        Some(path) => {
            let journal = FileJournalHistory::open(path.clone())
                .await
                .with_context(|| format!("failed to open history journal {}", path.display()))?;
            Ok(Arc::new(journal))
        }
        None => Ok(Arc::new(InMemoryHistory::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_orchestrator::MatchStrategy;

    fn local_config(extra: &str) -> ServiceConfig {
        ServiceConfig::from_toml(&format!(
            "[model]\nbase_url = \"http://127.0.0.1:9\"\n{extra}"
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn default_pipeline_uses_substring_all_matches() {
        let config = local_config("");
        let matcher = capability_matcher(&config.matching, &config.model)
            .await
            .unwrap();
        assert_eq!(matcher.strategy(), MatchStrategy::Substring);
        assert_eq!(matcher.selection(), Selection::AllMatches);
        assert!(build_orchestrator(&config).await.is_ok());
    }

    #[tokio::test]
    async fn semantic_strategy_warms_hashing_classifier() {
        let config = local_config("[matching]\nstrategy = \"semantic\"\nthreshold = 0.4\n");
        let matcher = capability_matcher(&config.matching, &config.model)
            .await
            .unwrap();
        assert_eq!(matcher.strategy(), MatchStrategy::Semantic);
        assert_eq!(matcher.selection(), Selection::BestMatchAboveThreshold);
        assert!((matcher.threshold() - 0.4).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn history_defaults_to_memory() {
        let history = chat_history(&HistorySection::default()).await.unwrap();
        let session = mesh_primitives::SessionId::random();
        history.ensure_session(session).await.unwrap();
        assert!(history.session_turns(session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn journal_history_is_opened_from_config() {
        let path = std::env::temp_dir()
            .join(format!("toolmesh-wiring-{}", mesh_primitives::SessionId::random()))
            .join("history.ndjson");
        let section = HistorySection {
            journal_path: Some(path.clone()),
        };
        let history = chat_history(&section).await.unwrap();
        history.ensure_session(mesh_primitives::SessionId::random()).await.unwrap();
        assert!(path.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
