//! Static analysis port for the self-healing phase.
//!
//! The engine asks the analyzer whether the tool is installed before using
//! it; a missing tool degrades gracefully per configuration instead of
//! failing the phase.

use futures_util::future::BoxFuture;

/// Result of one analysis pass over a story's implementation.
#[derive(Debug, Clone, Default)]
pub struct AnalysisReport {
    /// Whether the implementation passed analysis.
    pub success: bool,
    /// The tool itself is not installed (distinct from a failed analysis).
    pub tool_missing: bool,
    /// Findings to feed back into self-correction.
    pub issues: Vec<String>,
    pub error: Option<String>,
}

/// Port for static analysis tooling.
pub trait StaticAnalyzer: Send + Sync {
    /// Whether the analysis tool is installed and runnable.
    fn is_installed<'a>(&'a self) -> BoxFuture<'a, bool>;

    /// Analyze the story's implementation.
    fn analyze<'a>(&'a self, story_ref: &str) -> BoxFuture<'a, AnalysisReport>;
}

/// Analyzer that reports the tool as absent. The graceful-degradation
/// default for environments without analysis tooling.
pub struct UninstalledAnalyzer;

impl StaticAnalyzer for UninstalledAnalyzer {
    fn is_installed<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async { false })
    }

    fn analyze<'a>(&'a self, _story_ref: &str) -> BoxFuture<'a, AnalysisReport> {
        Box::pin(async {
            AnalysisReport {
                tool_missing: true,
                ..AnalysisReport::default()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uninstalled_analyzer_reports_tool_missing() {
        let analyzer = UninstalledAnalyzer;
        assert!(!analyzer.is_installed().await);
        let report = analyzer.analyze("story-1-2.md").await;
        assert!(report.tool_missing);
        assert!(!report.success);
    }
}
