//! Results channel from lifecycles to whoever runs them

use snapgrid_common::TestResults;
use tokio::sync::mpsc;

/// Handle given to each lifecycle at construction
pub type ResultsSender = mpsc::UnboundedSender<TestResults>;

/// Create a results channel
pub fn results_channel() -> (ResultsSender, ResultsCollector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, ResultsCollector { rx })
}

/// Receiving end owned by the runner
pub struct ResultsCollector {
    rx: mpsc::UnboundedReceiver<TestResults>,
}

impl ResultsCollector {
    /// Take everything published so far
    pub fn drain(&mut self) -> Vec<TestResults> {
        let mut results = Vec::new();
        while let Ok(result) = self.rx.try_recv() {
            results.push(result);
        }
        results
    }

    /// Wait until every sender is dropped and return all results
    pub async fn collect(mut self) -> Vec<TestResults> {
        let mut results = Vec::new();
        while let Some(result) = self.rx.recv().await {
            results.push(result);
        }
        results
    }
}
