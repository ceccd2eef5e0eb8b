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

//! The full clause-exchange pipeline across a small job tree: three
//! workers produce clauses, their buffers are merged at the root under a
//! byte budget, and the merged broadcast is digested everywhere with
//! duplicate and self-import suppression.

use rand::SeedableRng;
use rand_xoshiro::SplitMix64;

use parsat::*;

fn worker(num_solvers: usize) -> SharingManager {
    let params = Parameters::default();
    let setups: Vec<SolverSetup> = (0..num_solvers)
        .map(|i| SolverSetup {
            local_id: i,
            global_id: i,
            strict_clause_length_limit: params.strict_clause_length_limit,
            strict_lbd_limit: params.strict_lbd_limit,
            clause_base_buffer_size: params.clause_buffer_base_size,
            min_num_chunks_per_solver: params.min_import_chunks_per_solver,
            num_buffered_cls_generations: params.buffered_import_generations,
            anticipated_lits_to_import_per_cycle: 300.0,
            ..Default::default()
        })
        .collect();
    SharingManager::new(&params, &setups)
}

#[test]
fn a_sharing_epoch_flows_up_the_tree_and_back_down() {
    let workers: Vec<SharingManager> = (0..3).map(|_| worker(2)).collect();
    for w in &workers {
        w.set_epoch(1);
    }

    // Distinct production on every worker, one clause shared by two.
    workers[0].export_clause(0, vec![1, 2], 2);
    workers[0].export_clause(1, vec![3, 4, 5], 2);
    workers[1].export_clause(0, vec![1, 2], 2);
    workers[1].export_clause(1, vec![6], 1);
    workers[2].export_clause(0, vec![7, 8, 9], 3);

    // Reduction at the root: merge the three local buffers.
    let mut merger = BufferMerger::new(1024);
    for w in &workers {
        merger.add(BufferReader::new(w.prepare_sharing(512)));
    }
    let mut excess = Vec::new();
    let mut rng = SplitMix64::seed_from_u64(1);
    let merged = merger.merge_preserving_excess_with_random_tie_breaking(&mut excess, &mut rng);
    assert!(excess.is_empty());

    // The duplicate [1, 2] appears once in the merged broadcast.
    let merged_clauses: Vec<Clause> = BufferReader::new(merged.clone()).collect();
    assert_eq!(4, merged_clauses.len());

    // Broadcast: every worker digests the same buffer.
    for w in &workers {
        w.digest_sharing(merged.clone());
    }

    // Worker 2 produced none of the small clauses: both of its solvers
    // get all four.
    for local in 0..2 {
        let mut mgr = workers[2].import_manager(local).lock();
        let mut received = mgr.take_units();
        while let Some(c) = mgr.next_clause() {
            received.extend(c.lits);
        }
        assert!(received.contains(&6));
        assert!(received.contains(&1));
    }

    // On worker 0, solver 0 produced [1, 2]: it must not get it back.
    {
        let mut mgr = workers[0].import_manager(0).lock();
        let mut clauses = Vec::new();
        while let Some(c) = mgr.next_clause() {
            clauses.push(c.lits);
        }
        assert!(!clauses.contains(&vec![1, 2]));
        assert!(clauses.contains(&vec![7, 8, 9]));
    }
}

#[test]
fn the_byte_budget_rolls_excess_into_the_next_epoch() {
    let producer = worker(1);
    for v in 0..20 {
        producer.export_clause(0, vec![3 * v + 1, 3 * v + 2, 3 * v + 3], 2);
    }

    let mut merger = BufferMerger::new(3 + 5 * 3);
    merger.add(BufferReader::new(producer.prepare_sharing(4096)));
    let mut excess = Vec::new();
    let merged = merger.merge_preserving_excess(&mut excess);

    assert_eq!(5, BufferReader::new(merged).count());
    assert_eq!(15, BufferReader::new(excess.clone()).count());

    // Next epoch: the excess is just another input.
    let mut next = BufferMerger::new(4096);
    next.add(BufferReader::new(excess));
    let carried = next.merge_discarding_excess();
    assert_eq!(15, BufferReader::new(carried).count());
}

#[test]
fn deterministic_mode_serializes_admissions_across_solvers() {
    use std::sync::{Arc, Mutex};

    let order: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    let sync = Arc::new(DeterministicClauseSynchronizer::new(
        vec![0, 1],
        u64::MAX,
        Box::new(move |call| sink.lock().unwrap().push(call.clause.lits[0])),
    ));

    let threads: Vec<_> = (0..2)
        .map(|solver| {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || {
                for i in 0..50 {
                    let lit = 100 * (solver as i32 + 1) + i;
                    sync.insert_blocking(solver, 0, Clause::new(vec![lit], 1), 1);
                }
                sync.notify_solver_done(solver);
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // Both solvers are done: the final sync step flushes the remainders.
    let winner = sync.wait_until_sync_ready();
    assert_eq!(0, winner, "the smallest global id with a result wins");
    assert!(sync.sync_and_check_for_local_winner(winner, |_| {}));

    let order = order.lock().unwrap();
    assert_eq!(100, order.len());
    // Per-solver admissions keep their production order, however the two
    // threads were scheduled.
    let lane: Vec<i32> = order.iter().copied().filter(|l| *l < 200).collect();
    assert!(lane.windows(2).all(|w| w[0] < w[1]));
    let lane: Vec<i32> = order.iter().copied().filter(|l| *l >= 200).collect();
    assert!(lane.windows(2).all(|w| w[0] < w[1]));
}
