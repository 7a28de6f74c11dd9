//! Merges proposals from independent signal providers into one ranked plan.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use waypoint_common::{Category, Location, Proposal, Strategy, Task};

use crate::traits::SignalProvider;

pub struct PrioritySignalAggregator {
    providers: Vec<Arc<dyn SignalProvider>>,
}

impl PrioritySignalAggregator {
    pub fn new(providers: Vec<Arc<dyn SignalProvider>>) -> Self {
        Self { providers }
    }

    pub fn with_provider(mut self, provider: Arc<dyn SignalProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Ranked, deduplicated tasks for `strategy`, at most `limit` of them.
    pub async fn plan(&self, strategy: Strategy, limit: usize) -> Vec<Task> {
        let relevant: Vec<&Arc<dyn SignalProvider>> = self
            .providers
            .iter()
            .filter(|p| strategy.consults(p.source()))
            .collect();

        let results = join_all(relevant.iter().map(|p| p.proposals())).await;

        let mut proposals = Vec::new();
        for (provider, result) in relevant.iter().zip(results) {
            match result {
                Ok(batch) => {
                    debug!(source = %provider.source(), count = batch.len(), "Signal proposals");
                    proposals.extend(batch);
                }
                Err(e) => {
                    warn!(source = %provider.source(), error = %e, "Signal provider failed, skipping");
                }
            }
        }

        let mut tasks = merge(proposals);
        let merged = tasks.len();
        tasks.truncate(limit);
        info!(
            strategy = %strategy,
            providers = relevant.len(),
            merged,
            planned = tasks.len(),
            "Planned tasks"
        );
        tasks
    }
}

/// Group by (location, category), keeping the max score and the union of
/// reasons. Sorted by score descending, then location, then category.
pub fn merge(proposals: Vec<Proposal>) -> Vec<Task> {
    let mut by_key: HashMap<(Location, Category), Task> = HashMap::new();

    for p in proposals {
        if !p.score.is_finite() || p.score < 0.0 {
            warn!(location = %p.location, category = %p.category, score = p.score, "Dropping proposal with invalid score");
            continue;
        }
        match by_key.get_mut(&(p.location.clone(), p.category)) {
            Some(task) => {
                if p.score > task.priority_score {
                    task.priority_score = p.score;
                    task.source = p.source;
                }
                task.reasons.insert(p.reason);
            }
            None => {
                by_key.insert(
                    (p.location.clone(), p.category),
                    Task {
                        location: p.location,
                        category: p.category,
                        priority_score: p.score,
                        source: p.source,
                        reasons: BTreeSet::from([p.reason]),
                    },
                );
            }
        }
    }

    let mut tasks: Vec<Task> = by_key.into_values().collect();
    tasks.sort_by(|a, b| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then_with(|| a.location.cmp(&b.location))
            .then_with(|| a.category.cmp(&b.category))
    });
    tasks
}
