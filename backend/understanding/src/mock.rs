//! Scripted analyzer for tests and offline runs.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use docpipe_core::{AnalyzedDocument, DocumentAnalyzer, PipelineError, PipelineResult};

/// Returns a fixed document, optionally failing the first N calls.
///
/// When constructed with [`ScriptedAnalyzer::echo`] the input bytes are read
/// as UTF-8 and returned as a single-line page, which lets plain-text fixtures
/// stand in for PDFs.
pub struct ScriptedAnalyzer {
    document: Option<AnalyzedDocument>,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl ScriptedAnalyzer {
    pub fn returning(document: AnalyzedDocument) -> Self {
        Self {
            document: Some(document),
            failures_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn echo() -> Self {
        Self {
            document: None,
            failures_remaining: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAnalyzer for ScriptedAnalyzer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, document: &[u8], _locale: &str) -> PipelineResult<AnalyzedDocument> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PipelineError::provider(
                "scripted",
                format!("injected analysis failure on call {call}"),
            ));
        }
        match &self.document {
            Some(doc) => Ok(doc.clone()),
            None => Ok(AnalyzedDocument::from_pages(vec![vec![
                String::from_utf8_lossy(document).into_owned(),
            ]])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_then_echoes() {
        let analyzer = ScriptedAnalyzer::echo().failing_first(1);
        assert!(analyzer.analyze(b"hello", "en-US").await.is_err());
        let doc = analyzer.analyze(b"hello", "en-US").await.unwrap();
        assert_eq!(doc.concatenated_text(), "hello");
        assert_eq!(analyzer.calls(), 2);
    }
}
