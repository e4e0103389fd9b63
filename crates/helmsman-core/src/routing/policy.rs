use super::{RoutingCandidate, RoutingTask};
use helmsman_config::RoutingStrategy;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of a policy selection, before auditing.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub target: usize,
    pub fallback: Option<usize>,
    pub reason: String,
    pub confidence: f64,
}

/// Cycles through candidates using one shared counter.
///
/// Each `select` consumes exactly one counter value, so concurrent callers
/// never observe the same position twice.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    counter: AtomicU64,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the sequence at a known counter value.
    pub fn starting_at(counter: u64) -> Self {
        Self {
            counter: AtomicU64::new(counter),
        }
    }

    /// Counter value the next selection will consume.
    pub fn position(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    fn select(&self, candidates: &[RoutingCandidate]) -> Selection {
        let count = candidates.len() as u64;
        let tick = self.counter.fetch_add(1, Ordering::SeqCst);
        let target = (tick % count) as usize;
        let fallback = (count > 1).then(|| (target + 1) % candidates.len());
        Selection {
            target,
            fallback,
            reason: format!("round robin position {} of {}", target + 1, count),
            confidence: 1.0 / count as f64,
        }
    }
}

/// Picks the candidate covering the most task requirements.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapabilityBasedPolicy;

impl CapabilityBasedPolicy {
    fn select(&self, task: &RoutingTask, candidates: &[RoutingCandidate]) -> Selection {
        let mut scored: Vec<(usize, usize)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, candidate)| {
                let overlap = task
                    .requirements
                    .intersection(&candidate.capabilities)
                    .count();
                (idx, overlap)
            })
            .collect();
        scored.sort_by(|(a_idx, a_score), (b_idx, b_score)| {
            match b_score.cmp(a_score) {
                CmpOrdering::Equal => candidates[*a_idx].id.cmp(&candidates[*b_idx].id),
                other => other,
            }
        });

        let (target, score) = scored[0];
        let required = task.requirements.len();
        let confidence = if required == 0 {
            1.0
        } else {
            score as f64 / required as f64
        };
        Selection {
            target,
            fallback: scored.get(1).map(|(idx, _)| *idx),
            reason: format!("matched {score} of {required} required capabilities"),
            confidence,
        }
    }
}

/// Picks the candidate with the fewest in-flight assignments.
///
/// Load is counted per candidate id and increases on every selection;
/// callers report completion through [`release`](Self::release).
#[derive(Debug, Default)]
pub struct LoadBalancedPolicy {
    loads: Mutex<HashMap<String, u64>>,
}

impl LoadBalancedPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, id: &str) -> u64 {
        self.loads.lock().get(id).copied().unwrap_or(0)
    }

    /// Record that one assignment to `id` has finished.
    pub fn release(&self, id: &str) {
        let mut loads = self.loads.lock();
        if let Some(load) = loads.get_mut(id) {
            *load = load.saturating_sub(1);
        }
    }

    fn select(&self, candidates: &[RoutingCandidate]) -> Selection {
        let mut loads = self.loads.lock();
        let mut ordered: Vec<(usize, u64)> = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, loads.get(&c.id).copied().unwrap_or(0)))
            .collect();
        ordered.sort_by(|(a_idx, a_load), (b_idx, b_load)| match a_load.cmp(b_load) {
            CmpOrdering::Equal => candidates[*a_idx].id.cmp(&candidates[*b_idx].id),
            other => other,
        });

        let (target, load) = ordered[0];
        *loads.entry(candidates[target].id.clone()).or_insert(0) += 1;
        let total: u64 = ordered.iter().map(|(_, l)| *l).sum();
        Selection {
            target,
            fallback: ordered.get(1).map(|(idx, _)| *idx),
            reason: format!("lowest load ({load} in flight)"),
            confidence: if total == 0 {
                1.0
            } else {
                1.0 - load as f64 / total as f64
            },
        }
    }
}

/// Routing strategy, fixed at construction.
#[derive(Debug)]
pub enum RoutingPolicy {
    RoundRobin(RoundRobinPolicy),
    CapabilityBased(CapabilityBasedPolicy),
    LoadBalanced(LoadBalancedPolicy),
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::RoundRobin(RoundRobinPolicy::new())
    }
}

impl RoutingPolicy {
    pub fn from_config(strategy: RoutingStrategy) -> Self {
        match strategy {
            RoutingStrategy::RoundRobin => Self::RoundRobin(RoundRobinPolicy::new()),
            RoutingStrategy::CapabilityBased => Self::CapabilityBased(CapabilityBasedPolicy),
            RoutingStrategy::LoadBalanced => Self::LoadBalanced(LoadBalancedPolicy::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundRobin(_) => "round_robin",
            Self::CapabilityBased(_) => "capability_based",
            Self::LoadBalanced(_) => "load_balanced",
        }
    }

    /// Choose among `candidates`, which must be non-empty.
    pub(crate) fn select(&self, task: &RoutingTask, candidates: &[RoutingCandidate]) -> Selection {
        match self {
            Self::RoundRobin(policy) => policy.select(candidates),
            Self::CapabilityBased(policy) => policy.select(task, candidates),
            Self::LoadBalanced(policy) => policy.select(candidates),
        }
    }

    /// Report a finished assignment. Only load balancing tracks this.
    pub fn release(&self, id: &str) {
        if let Self::LoadBalanced(policy) = self {
            policy.release(id);
        }
    }
}
