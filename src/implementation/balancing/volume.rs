// Copyright 2024 the parsat developers
//
// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Turns a globally agreed event map into integer per-job volumes. The
//! computation is purely functional: every worker that feeds it the same
//! state map and global epoch obtains the same result, which is what lets
//! the balancer skip an explicit volume broadcast entirely.

use rand::{Rng, SeedableRng};
use rand_xoshiro::SplitMix64;

use crate::{EventMap, JobId};

/// The per-job outcome of one balancing computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeEntry {
    pub job_id: JobId,
    /// The demand the job declared in its latest event.
    pub demand: i32,
    pub priority: f32,
    /// The real-valued assignment before rounding.
    pub assignment: f64,
    /// The integer number of workers the job should occupy.
    pub volume: i32,
}

/// Computes integer volumes for every job with positive demand in `states`
/// using cutoff-priority proportional allocation:
///
/// 1. each job gets `min(demand, V * priority / sum(priority * demand) * demand)`,
/// 2. leftover capacity goes to higher-priority jobs first, jobs of equal
///    priority sharing proportionally to their unmet demand,
/// 3. real values are rounded by searching a common remainder threshold such
///    that the total matches `V = load_factor * cluster_size` within one unit,
///    with jobs assigned at most one worker pinned to exactly one.
///
/// Residual off-by-one ties after the threshold search are broken by a
/// `SplitMix64` stream seeded from the cluster seed and the global epoch,
/// so rounding stays identical across all workers of one epoch while
/// varying between epochs.
pub fn calculate_volumes(
    states: &EventMap,
    load_factor: f32,
    cluster_size: usize,
    seed: u64,
) -> Vec<VolumeEntry> {
    let mut entries: Vec<VolumeEntry> = states
        .entries()
        .filter(|e| e.demand > 0)
        .map(|e| VolumeEntry {
            job_id: e.job_id,
            demand: e.demand,
            priority: e.priority,
            assignment: 0.0,
            volume: 0,
        })
        .collect();
    if entries.is_empty() {
        return entries;
    }
    // Deterministic processing order regardless of map iteration order.
    entries.sort_unstable_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.job_id.cmp(&b.job_id))
    });

    let total = load_factor as f64 * cluster_size as f64;
    assign_real_shares(&mut entries, total);
    round_to_volumes(&mut entries, total, seed ^ states.global_epoch());
    entries
}

/// Steps 1 and 2: the real-valued cutoff-priority allocation. `entries`
/// must be sorted by descending priority.
fn assign_real_shares(entries: &mut [VolumeEntry], total: f64) {
    let aggregated: f64 = entries
        .iter()
        .map(|e| e.demand as f64 * e.priority as f64)
        .sum();

    for e in entries.iter_mut() {
        let met_ratio = (total * e.priority as f64 / aggregated).min(1.0);
        e.assignment = met_ratio * e.demand as f64;
    }

    let mut remaining = total - entries.iter().map(|e| e.assignment).sum::<f64>();
    if remaining < 0.1 {
        return;
    }

    // Hand the leftover to priority groups from best to worst; a group
    // that cannot be fully satisfied shares proportionally to unmet demand.
    let mut at = 0;
    while at < entries.len() && remaining > 0.0 {
        let group_priority = entries[at].priority;
        let mut end = at;
        while end < entries.len() && entries[end].priority == group_priority {
            end += 1;
        }
        let group = &mut entries[at..end];
        let group_unmet: f64 = group.iter().map(|e| e.demand as f64 - e.assignment).sum();
        if group_unmet <= remaining {
            for e in group.iter_mut() {
                e.assignment = e.demand as f64;
            }
            remaining -= group_unmet;
        } else {
            if group_unmet > 0.0 {
                for e in group.iter_mut() {
                    let unmet = e.demand as f64 - e.assignment;
                    e.assignment += remaining * unmet / group_unmet;
                }
            }
            remaining = 0.0;
        }
        at = end;
    }
}

/// Step 3: the iterative remainder search. Jobs with an assignment of at
/// most one worker are pinned to exactly one; all remaining jobs round
/// against one common threshold picked such that the sum of volumes lands
/// within one unit of `total`.
fn round_to_volumes(entries: &mut [VolumeEntry], total: f64, seed: u64) {
    let mut thresholds: Vec<f64> = entries
        .iter()
        .filter(|e| e.assignment > 1.0)
        .map(|e| e.assignment.fract())
        .filter(|r| *r > 0.0)
        .collect();
    thresholds.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    thresholds.dedup();

    let sum_for = |entries: &[VolumeEntry], threshold: f64| -> i64 {
        entries
            .iter()
            .map(|e| rounded(e.assignment, threshold) as i64)
            .sum()
    };

    // Binary search over the candidate thresholds; index `len` stands for
    // the right-hand limit 1.0 (round everything down).
    let mut lower = 0_i64;
    let mut upper = thresholds.len() as i64;
    let mut best_idx = upper;
    let mut best_diff = f64::INFINITY;
    let mut last_sum: Option<i64> = None;
    loop {
        let idx = (lower + upper) / 2;
        let threshold = threshold_at(&thresholds, idx as usize);
        let sum = sum_for(entries, threshold);
        let diff = total - sum as f64;
        if diff.abs() < best_diff.abs() {
            best_diff = diff;
            best_idx = idx;
        }
        if last_sum == Some(sum) || lower >= upper {
            break;
        }
        last_sum = Some(sum);
        if (sum as f64) < total {
            // Too few workers used: lower the threshold, round more up.
            upper = (idx - 1).max(0);
        } else if sum as f64 > total {
            lower = (idx + 1).min(thresholds.len() as i64);
        } else {
            break;
        }
    }

    let threshold = threshold_at(&thresholds, best_idx as usize);
    for e in entries.iter_mut() {
        e.volume = rounded(e.assignment, threshold);
    }

    settle_residue(entries, total, seed);
}

fn threshold_at(thresholds: &[f64], idx: usize) -> f64 {
    if idx < thresholds.len() {
        thresholds[idx]
    } else {
        1.0
    }
}

fn rounded(assignment: f64, threshold: f64) -> i32 {
    if assignment <= 1.0 {
        1
    } else if assignment.fract() < threshold {
        assignment.floor() as i32
    } else {
        assignment.ceil() as i32
    }
}

/// If the best threshold still leaves the sum off by a unit or more,
/// promote or demote individual jobs, picked pseudo-randomly but
/// deterministically for the given epoch, until the sum fits.
fn settle_residue(entries: &mut [VolumeEntry], total: f64, seed: u64) {
    let mut rng = SplitMix64::seed_from_u64(seed);
    let mut sum: i64 = entries.iter().map(|e| e.volume as i64).sum();

    while (sum as f64) > total.ceil() {
        let adjustable: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.assignment > 1.0 && e.volume as f64 > e.assignment.floor())
            .map(|(i, _)| i)
            .collect();
        let Some(&pick) = pick_one(&adjustable, &mut rng) else { break };
        entries[pick].volume -= 1;
        sum -= 1;
    }
    while (sum as f64) < total.floor() {
        let adjustable: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.assignment > 1.0 && (e.volume as f64) < e.assignment.ceil())
            .map(|(i, _)| i)
            .collect();
        let Some(&pick) = pick_one(&adjustable, &mut rng) else { break };
        entries[pick].volume += 1;
        sum += 1;
    }
}

fn pick_one<'a>(candidates: &'a [usize], rng: &mut SplitMix64) -> Option<&'a usize> {
    if candidates.is_empty() {
        None
    } else {
        candidates.get(rng.gen_range(0..candidates.len()))
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_volumes {
    use crate::{calculate_volumes, Event, EventMap};

    fn states(events: &[(i32, i32, f32)]) -> EventMap {
        let mut map = EventMap::new();
        for (i, &(job_id, demand, priority)) in events.iter().enumerate() {
            map.insert_if_novel(Event { job_id, epoch: 1 + i as u32, demand, priority });
        }
        map
    }

    #[test]
    fn empty_state_yields_no_volumes() {
        let map = EventMap::new();
        assert!(calculate_volumes(&map, 1.0, 8, 0).is_empty());
    }

    #[test]
    fn single_job_fills_the_cluster_up_to_its_demand() {
        let map = states(&[(1, 16, 0.5)]);
        let result = calculate_volumes(&map, 1.0, 8, 0);
        assert_eq!(1, result.len());
        assert_eq!(8, result[0].volume);
    }

    #[test]
    fn single_small_job_is_capped_by_its_demand() {
        let map = states(&[(1, 3, 0.5)]);
        let result = calculate_volumes(&map, 1.0, 8, 0);
        assert_eq!(3, result[0].volume);
    }

    #[test]
    fn priority_cutoff_splits_seven_to_one() {
        let map = states(&[(1, 8, 0.9), (2, 8, 0.1)]);
        let result = calculate_volumes(&map, 1.0, 8, 0);
        let volume_of = |job| result.iter().find(|e| e.job_id == job).unwrap().volume;
        assert_eq!(7, volume_of(1));
        assert_eq!(1, volume_of(2));
        assert_eq!(8, result.iter().map(|e| e.volume).sum::<i32>());
    }

    #[test]
    fn equal_jobs_split_the_cluster_evenly() {
        let map = states(&[(1, 8, 0.5), (2, 8, 0.5)]);
        let result = calculate_volumes(&map, 1.0, 8, 0);
        assert!(result.iter().all(|e| e.volume == 4));
    }

    #[test]
    fn zero_demand_jobs_receive_nothing() {
        let map = states(&[(1, 8, 0.5), (2, 0, 0.5)]);
        let result = calculate_volumes(&map, 1.0, 8, 0);
        assert!(result.iter().all(|e| e.job_id != 2));
    }

    #[test]
    fn conservation_holds_for_many_shapes() {
        let shapes: &[&[(i32, i32, f32)]] = &[
            &[(1, 5, 0.3), (2, 7, 0.7), (3, 2, 0.5)],
            &[(1, 100, 0.5), (2, 100, 0.5)],
            &[(1, 13, 0.9), (2, 5, 0.4), (3, 9, 0.4), (4, 2, 0.1)],
            &[(1, 64, 1.0)],
        ];
        for shape in shapes {
            let map = states(shape);
            for cluster in [4_usize, 8, 16, 31] {
                let total_demand: i32 = shape.iter().map(|s| s.1).sum();
                if (total_demand as f64) < cluster as f64 {
                    // Not enough demand to fill the cluster: out of scope.
                    continue;
                }
                let result = calculate_volumes(&map, 1.0, cluster, 0);
                let sum: i64 = result.iter().map(|e| e.volume as i64).sum();
                let v = cluster as f64;
                // Jobs pinned to one worker may force the total above the
                // target; in that case the sum must sit exactly at the
                // smallest achievable value.
                let min_achievable: i64 = result
                    .iter()
                    .map(|e| if e.assignment <= 1.0 { 1 } else { e.assignment.floor() as i64 })
                    .sum();
                if min_achievable > v.ceil() as i64 {
                    assert_eq!(min_achievable, sum, "for {shape:?} on {cluster}");
                } else {
                    assert!(
                        sum >= v.floor() as i64 && sum <= v.ceil() as i64,
                        "sum {sum} out of [{}, {}] for {shape:?} on {cluster}",
                        v.floor(),
                        v.ceil()
                    );
                }
            }
        }
    }

    #[test]
    fn identical_inputs_yield_identical_outputs() {
        let map = states(&[(1, 13, 0.9), (2, 5, 0.4), (3, 9, 0.4)]);
        let a = calculate_volumes(&map, 1.0, 16, 0);
        let b = calculate_volumes(&map, 1.0, 16, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn volumes_never_exceed_demand() {
        let map = states(&[(1, 2, 0.9), (2, 3, 0.8), (3, 4, 0.7)]);
        let result = calculate_volumes(&map, 1.0, 32, 0);
        for e in &result {
            assert!(e.volume <= e.demand.max(1));
        }
    }
}
