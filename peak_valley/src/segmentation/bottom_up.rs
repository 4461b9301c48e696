use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use log::trace;

use super::{ensure_finite, is_flat, scaled_penalty, Budget, CostModel, SegmentCost, Segmenter, Stopping};
use crate::defaults::{DEFAULT_GREEDY_MIN_SIZE, DEFAULT_PENALTY, DEFAULT_TIME_BUDGET_MS};
use crate::error::Result;
use crate::series::log_returns;
use crate::stats;

const METHOD: &str = "greedy segmentation";

/// Bottom-up merging of a regular grid of `min_size` segments.
///
/// Adjacent segments are merged cheapest first until the cheapest merge
/// costs more than the scaled penalty, or until the target count is reached.
/// With `on_returns` the segmentation runs on the log returns of the input,
/// so regimes are trends rather than price levels.
#[derive(Debug, Clone)]
pub struct GreedySegmenter {
    pub cost: CostModel,
    pub stopping: Stopping,
    pub min_size: usize,
    pub on_returns: bool,
    pub time_budget: Option<Duration>,
}

impl Default for GreedySegmenter {
    fn default() -> Self {
        GreedySegmenter {
            cost: CostModel::L2,
            stopping: Stopping::Penalty(DEFAULT_PENALTY),
            min_size: DEFAULT_GREEDY_MIN_SIZE,
            on_returns: true,
            time_budget: Some(Duration::from_millis(DEFAULT_TIME_BUDGET_MS)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct SegmentNode {
    start: usize,
    end: usize,
    prev: Option<usize>,
    next: Option<usize>,
    alive: bool,
    version: u64,
}

#[derive(Clone, Copy, Debug)]
struct MergeCandidate {
    left: usize,
    right: usize,
    left_version: u64,
    right_version: u64,
    boundary: usize,
    delta: f64,
}

impl PartialEq for MergeCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeCandidate {}

impl PartialOrd for MergeCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap pops the cheapest merge, earliest boundary first
        other
            .delta
            .total_cmp(&self.delta)
            .then_with(|| other.boundary.cmp(&self.boundary))
    }
}

struct Segments<'a> {
    nodes: Vec<SegmentNode>,
    cost: &'a SegmentCost,
    count: usize,
}

impl<'a> Segments<'a> {
    /// Grid of `min_size` segments; the last one absorbs the remainder.
    fn grid(cost: &'a SegmentCost, min_size: usize) -> Self {
        let n = cost.len();
        let count = (n / min_size).max(1);
        let nodes = (0..count)
            .map(|i| SegmentNode {
                start: i * min_size,
                end: if i + 1 == count { n } else { (i + 1) * min_size },
                prev: i.checked_sub(1),
                next: (i + 1 < count).then_some(i + 1),
                alive: true,
                version: 0,
            })
            .collect();
        Segments { nodes, cost, count }
    }

    fn candidate(&self, left: usize) -> Option<MergeCandidate> {
        let l = self.nodes.get(left).filter(|node| node.alive)?;
        let right = l.next?;
        let r = &self.nodes[right];
        let delta = self.cost.cost(l.start, r.end)
            - self.cost.cost(l.start, l.end)
            - self.cost.cost(r.start, r.end);
        Some(MergeCandidate {
            left,
            right,
            left_version: l.version,
            right_version: r.version,
            boundary: l.end,
            delta,
        })
    }

    fn is_current(&self, candidate: &MergeCandidate) -> bool {
        let (l, r) = (&self.nodes[candidate.left], &self.nodes[candidate.right]);
        l.alive
            && r.alive
            && l.next == Some(candidate.right)
            && l.version == candidate.left_version
            && r.version == candidate.right_version
    }

    fn merge(&mut self, candidate: &MergeCandidate) {
        let right = self.nodes[candidate.right];
        let left = &mut self.nodes[candidate.left];
        left.end = right.end;
        left.next = right.next;
        left.version += 1;
        if let Some(next) = right.next {
            self.nodes[next].prev = Some(candidate.left);
        }
        let dead = &mut self.nodes[candidate.right];
        dead.alive = false;
        dead.version += 1;
        self.count -= 1;
    }

    /// Start of every segment but the first, ascending.
    fn boundaries(&self) -> Vec<usize> {
        let mut out = vec![];
        let mut cursor = self.nodes.first().and_then(|node| node.next);
        while let Some(i) = cursor {
            out.push(self.nodes[i].start);
            cursor = self.nodes[i].next;
        }
        out
    }
}

impl Segmenter for GreedySegmenter {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn detect(&self, values: &[f64]) -> Result<Vec<usize>> {
        ensure_finite(values)?;
        let data = if self.on_returns {
            log_returns(values)
        } else {
            values.to_vec()
        };
        let min_size = self.min_size.max(1);
        if data.len() < 2 * min_size || is_flat(&data) {
            return Ok(vec![]);
        }

        let cost = SegmentCost::new(self.cost, &data);
        let mut segments = Segments::grid(&cost, min_size);
        let (target, threshold) = match self.stopping {
            Stopping::Count(k) => (k + 1, f64::INFINITY),
            Stopping::Penalty(penalty) => (
                1,
                scaled_penalty(penalty, data.len(), stats::variance(&data)),
            ),
        };

        let budget = Budget::start(METHOD, self.time_budget);
        let mut heap: BinaryHeap<MergeCandidate> = (0..segments.nodes.len())
            .filter_map(|i| segments.candidate(i))
            .collect();

        let mut merges = 0usize;
        while segments.count > target {
            if merges % 64 == 0 {
                budget.check()?;
            }
            let Some(best) = pop_current(&mut heap, &segments) else {
                break;
            };
            if best.delta > threshold {
                break;
            }
            segments.merge(&best);
            merges += 1;
            let prev = segments.nodes[best.left].prev;
            for left in prev.into_iter().chain([best.left]) {
                if let Some(candidate) = segments.candidate(left) {
                    heap.push(candidate);
                }
            }
        }
        trace!(
            "Greedy segmentation merged {} times, {} segments left",
            merges,
            segments.count
        );

        let boundaries = segments.boundaries();
        Ok(if self.on_returns {
            // Return b spans prices b and b + 1, so the turn happened at price b
            boundaries
        } else {
            boundaries.into_iter().map(|b| b - 1).collect()
        })
    }
}

fn pop_current(heap: &mut BinaryHeap<MergeCandidate>, segments: &Segments) -> Option<MergeCandidate> {
    while let Some(candidate) = heap.pop() {
        if segments.is_current(&candidate) {
            return Some(candidate);
        }
    }
    None
}
