//! Capability matching: scoring candidate labels and selecting tools.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mesh_primitives::Tool;
use tracing::{debug, warn};

use crate::classifier::SharedClassifier;
use crate::error::{OrchestratorError, OrchestratorResult};

/// Default confidence a label must exceed to be selected.
pub const DEFAULT_THRESHOLD: f32 = 0.3;

/// Where a candidate label came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// `"{name}: {description}"`.
    Summary,
    /// One declared capability string.
    Capability,
}

/// Matchable string derived from a tool, mapped back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLabel {
    text: String,
    kind: LabelKind,
    tool_index: usize,
}

impl CandidateLabel {
    /// Returns the label text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the label origin.
    #[must_use]
    pub const fn kind(&self) -> LabelKind {
        self.kind
    }

    /// Returns the index of the owning tool in the snapshot the label was built from.
    #[must_use]
    pub const fn tool_index(&self) -> usize {
        self.tool_index
    }
}

/// Builds the label set for a tool snapshot: one summary label per tool
/// followed by one label per capability.
#[must_use]
pub fn candidate_labels(tools: &[Tool]) -> Vec<CandidateLabel> {
    let mut labels = Vec::new();
    for (tool_index, tool) in tools.iter().enumerate() {
        labels.push(CandidateLabel {
            text: format!("{}: {}", tool.name(), tool.description()),
            kind: LabelKind::Summary,
            tool_index,
        });
        labels.extend(tool.capabilities().iter().map(|capability| CandidateLabel {
            text: capability.clone(),
            kind: LabelKind::Capability,
            tool_index,
        }));
    }
    labels
}

/// A scored label together with the tool behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    label: String,
    tool: Tool,
    score: f32,
}

impl MatchResult {
    /// Creates a result.
    #[must_use]
    pub fn new(label: impl Into<String>, tool: Tool, score: f32) -> Self {
        Self {
            label: label.into(),
            tool,
            score,
        }
    }

    /// Returns the label that produced the score.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the owning tool.
    #[must_use]
    pub const fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Consumes the result, returning the tool.
    #[must_use]
    pub fn into_tool(self) -> Tool {
        self.tool
    }

    /// Returns the score in `[0, 1]`.
    #[must_use]
    pub const fn score(&self) -> f32 {
        self.score
    }
}

/// Available scoring strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Case-insensitive capability substring test.
    Substring,
    /// Zero-shot classification over all labels.
    Semantic,
}

impl MatchStrategy {
    /// Selection cardinality each strategy was designed around.
    #[must_use]
    pub const fn default_selection(self) -> Selection {
        match self {
            Self::Substring => Selection::AllMatches,
            Self::Semantic => Selection::BestMatchAboveThreshold,
        }
    }
}

/// How many tools a match may select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Every tool owning at least one label scored above the threshold.
    AllMatches,
    /// Only the tool behind the top-ranked label, if it beats the threshold.
    BestMatchAboveThreshold,
}

/// Scores candidate labels against a message.
#[async_trait]
pub trait LabelScorer: Send + Sync {
    /// Strategy implemented by this scorer.
    fn strategy(&self) -> MatchStrategy;

    /// Returns one score in `[0, 1]` per label, aligned with `labels`.
    async fn score(&self, message: &str, labels: &[CandidateLabel]) -> OrchestratorResult<Vec<f32>>;
}

/// Scores capability labels 1.0 when they occur in the message, ignoring case.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubstringScorer;

#[async_trait]
impl LabelScorer for SubstringScorer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::Substring
    }

    async fn score(&self, message: &str, labels: &[CandidateLabel]) -> OrchestratorResult<Vec<f32>> {
        let haystack = message.to_lowercase();
        Ok(labels
            .iter()
            .map(|label| match label.kind {
                LabelKind::Capability if haystack.contains(&label.text.to_lowercase()) => 1.0,
                _ => 0.0,
            })
            .collect())
    }
}

/// Scores labels jointly through the shared classifier.
#[derive(Debug, Clone)]
pub struct SemanticScorer {
    classifier: Arc<SharedClassifier>,
}

impl SemanticScorer {
    /// Wraps a shared classifier.
    #[must_use]
    pub fn new(classifier: Arc<SharedClassifier>) -> Self {
        Self { classifier }
    }

    /// Returns the underlying classifier.
    #[must_use]
    pub fn classifier(&self) -> &Arc<SharedClassifier> {
        &self.classifier
    }
}

#[async_trait]
impl LabelScorer for SemanticScorer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::Semantic
    }

    async fn score(&self, message: &str, labels: &[CandidateLabel]) -> OrchestratorResult<Vec<f32>> {
        let texts: Vec<String> = labels.iter().map(|label| label.text.clone()).collect();
        self.classifier.classify(message, &texts).await
    }
}

/// Ranks tools against a message and applies the configured selection.
#[derive(Clone)]
pub struct CapabilityMatcher {
    scorer: Arc<dyn LabelScorer>,
    selection: Selection,
    threshold: f32,
}

impl fmt::Debug for CapabilityMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityMatcher")
            .field("strategy", &self.scorer.strategy())
            .field("selection", &self.selection)
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl Default for CapabilityMatcher {
    fn default() -> Self {
        Self {
            scorer: Arc::new(SubstringScorer),
            selection: Selection::AllMatches,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl CapabilityMatcher {
    /// Creates a matcher using the scorer's default selection and threshold.
    #[must_use]
    pub fn new(scorer: Arc<dyn LabelScorer>) -> Self {
        let selection = scorer.strategy().default_selection();
        Self {
            scorer,
            selection,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Overrides the selection cardinality.
    #[must_use]
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Overrides the confidence threshold.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::InvalidConfig`] unless `0 <= threshold < 1`.
    pub fn with_threshold(mut self, threshold: f32) -> OrchestratorResult<Self> {
        if !(0.0..1.0).contains(&threshold) {
            return Err(OrchestratorError::InvalidConfig(
                "match threshold must be within [0, 1)",
            ));
        }
        self.threshold = threshold;
        Ok(self)
    }

    /// Returns the active strategy.
    #[must_use]
    pub fn strategy(&self) -> MatchStrategy {
        self.scorer.strategy()
    }

    /// Returns the selection cardinality.
    #[must_use]
    pub const fn selection(&self) -> Selection {
        self.selection
    }

    /// Returns the confidence threshold.
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Scores every candidate label, highest score first.
    ///
    /// Ties keep label order, so earlier tools win.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Matching`] when the scorer fails or returns
    /// a score count that does not match the label count.
    pub async fn rank(&self, message: &str, tools: &[Tool]) -> OrchestratorResult<Vec<MatchResult>> {
        let labels = candidate_labels(tools);
        if labels.is_empty() {
            return Ok(Vec::new());
        }

        let scores = self.scorer.score(message, &labels).await?;
        if scores.len() != labels.len() {
            return Err(OrchestratorError::matching(format!(
                "scorer returned {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }

        let mut ranked: Vec<MatchResult> = labels
            .into_iter()
            .zip(scores)
            .map(|(label, score)| MatchResult::new(label.text, tools[label.tool_index].clone(), score))
            .collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(ranked)
    }

    /// Returns the selected tools, one result per tool, best first.
    ///
    /// Scoring failures are logged and yield no selection.
    pub async fn match_tools(&self, message: &str, tools: &[Tool]) -> Vec<MatchResult> {
        let ranked = match self.rank(message, tools).await {
            Ok(ranked) => ranked,
            Err(err) => {
                warn!(?err, strategy = ?self.strategy(), "capability matching failed; using no tools");
                return Vec::new();
            }
        };

        let selected = self.select(ranked);
        debug!(
            selected = selected.len(),
            tools = tools.len(),
            strategy = ?self.strategy(),
            "capability matching finished"
        );
        selected
    }

    fn select(&self, ranked: Vec<MatchResult>) -> Vec<MatchResult> {
        match self.selection {
            Selection::BestMatchAboveThreshold => ranked
                .into_iter()
                .next()
                .filter(|top| top.score > self.threshold)
                .into_iter()
                .collect(),
            Selection::AllMatches => {
                let mut seen = HashSet::new();
                ranked
                    .into_iter()
                    .filter(|result| result.score > self.threshold)
                    .filter(|result| seen.insert(result.tool.id()))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_primitives::{ToolId, ToolRegistration};

    fn tool(name: &str, capabilities: &[&str]) -> Tool {
        let registration = ToolRegistration::new(
            name,
            format!("{name} tool"),
            format!("http://{}.local/api", name.to_lowercase()),
            capabilities.iter().copied(),
        )
        .unwrap();
        Tool::new(ToolId::random(), registration)
    }

    struct FixedScorer(Vec<f32>);

    #[async_trait]
    impl LabelScorer for FixedScorer {
        fn strategy(&self) -> MatchStrategy {
            MatchStrategy::Semantic
        }

        async fn score(&self, _message: &str, _labels: &[CandidateLabel]) -> OrchestratorResult<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenScorer;

    #[async_trait]
    impl LabelScorer for BrokenScorer {
        fn strategy(&self) -> MatchStrategy {
            MatchStrategy::Semantic
        }

        async fn score(&self, _message: &str, _labels: &[CandidateLabel]) -> OrchestratorResult<Vec<f32>> {
            Err(OrchestratorError::matching("model unavailable"))
        }
    }

    #[test]
    fn labels_cover_summary_and_capabilities() {
        let labels = candidate_labels(&[tool("Calculator", &["math", "arithmetic"])]);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].text(), "Calculator: Calculator tool");
        assert_eq!(labels[0].kind(), LabelKind::Summary);
        assert_eq!(labels[2].text(), "arithmetic");
        assert_eq!(labels[2].tool_index(), 0);
    }

    #[tokio::test]
    async fn substring_selects_every_tool_with_the_capability() {
        let tools = vec![
            tool("Calculator", &["arithmetic"]),
            tool("Weather", &["weather"]),
            tool("Abacus", &["Arithmetic", "counting"]),
        ];
        let matcher = CapabilityMatcher::default();
        let selected = matcher
            .match_tools("Can you do some ARITHMETIC for me?", &tools)
            .await;

        let names: Vec<&str> = selected.iter().map(|m| m.tool().name()).collect();
        assert_eq!(names, vec!["Calculator", "Abacus"]);
    }

    #[tokio::test]
    async fn substring_ignores_summary_labels() {
        let tools = vec![tool("Calculator", &["arithmetic"])];
        let selected = CapabilityMatcher::default()
            .match_tools("Calculator: Calculator tool", &tools)
            .await;
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn best_match_requires_strictly_greater_score() {
        let tools = vec![tool("Calculator", &[])];

        let at_threshold = CapabilityMatcher::new(Arc::new(FixedScorer(vec![0.3])));
        assert!(at_threshold.match_tools("2+2", &tools).await.is_empty());

        let above = CapabilityMatcher::new(Arc::new(FixedScorer(vec![0.31])));
        let selected = above.match_tools("2+2", &tools).await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].tool().name(), "Calculator");
    }

    #[tokio::test]
    async fn best_match_only_considers_top_label() {
        let tools = vec![tool("Calculator", &["math"]), tool("Weather", &[])];
        // Labels: Calculator summary, math, Weather summary.
        let matcher = CapabilityMatcher::new(Arc::new(FixedScorer(vec![0.1, 0.5, 0.4])));
        assert_eq!(matcher.selection(), Selection::BestMatchAboveThreshold);

        let selected = matcher.match_tools("anything", &tools).await;
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].label(), "math");
    }

    #[tokio::test]
    async fn all_matches_deduplicates_tools() {
        let tools = vec![tool("Calculator", &["math"]), tool("Weather", &[])];
        let matcher = CapabilityMatcher::new(Arc::new(FixedScorer(vec![0.6, 0.9, 0.4])))
            .with_selection(Selection::AllMatches);

        let selected = matcher.match_tools("anything", &tools).await;
        let names: Vec<&str> = selected.iter().map(|m| m.tool().name()).collect();
        assert_eq!(names, vec!["Calculator", "Weather"]);
        assert!((selected[0].score() - 0.9).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn scorer_failure_selects_nothing() {
        let tools = vec![tool("Calculator", &["math"])];
        let matcher = CapabilityMatcher::new(Arc::new(BrokenScorer));
        assert!(matcher.match_tools("math", &tools).await.is_empty());
        assert!(matcher.rank("math", &tools).await.is_err());
    }

    #[tokio::test]
    async fn mismatched_score_count_is_a_matching_error() {
        let tools = vec![tool("Calculator", &["math"])];
        let matcher = CapabilityMatcher::new(Arc::new(FixedScorer(vec![0.9])));
        let err = matcher.rank("math", &tools).await.expect_err("two labels");
        assert!(matches!(err, OrchestratorError::Matching { .. }));
    }

    #[test]
    fn threshold_must_be_below_one() {
        assert!(CapabilityMatcher::default().with_threshold(1.0).is_err());
        assert!(CapabilityMatcher::default().with_threshold(0.0).is_ok());
    }
}
