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

//! The binary job tree: node `i`'s parent sits at `(i-1)/2`, its children
//! at `2i+1` and `2i+2`. Each worker holding a node tracks the cluster
//! ranks of its tree neighbors as far as it knows them.

use fxhash::{FxHashMap, FxHashSet};

pub fn parent_index(index: usize) -> usize {
    index.saturating_sub(1) / 2
}

pub fn left_child_index(index: usize) -> usize {
    2 * index + 1
}

pub fn right_child_index(index: usize) -> usize {
    2 * index + 2
}

/// A worker's view of its job node's neighborhood.
#[derive(Debug, Clone)]
pub struct JobTree {
    index: usize,
    /// Known ranks by tree index.
    ranks: FxHashMap<usize, usize>,
    /// For the root, the client that submitted the job.
    client_rank: Option<usize>,
    has_left_child: bool,
    has_right_child: bool,
    /// Ranks that once held children of this node.
    past_children: FxHashSet<usize>,
}

impl JobTree {
    pub fn new(index: usize) -> Self {
        JobTree {
            index,
            ranks: FxHashMap::default(),
            client_rank: None,
            has_left_child: false,
            has_right_child: false,
            past_children: FxHashSet::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_root(&self) -> bool {
        self.index == 0
    }

    pub fn is_leaf(&self) -> bool {
        !self.has_left_child && !self.has_right_child
    }

    /// How many nodes a full tree of `volume` nodes keeps below this one;
    /// a node only wants children whose index is still within the volume.
    pub fn wants_child(&self, left: bool, volume: i32) -> bool {
        let child = if left {
            left_child_index(self.index)
        } else {
            right_child_index(self.index)
        };
        (child as i32) < volume
    }

    pub fn parent_rank(&self) -> Option<usize> {
        if self.is_root() {
            self.client_rank
        } else {
            self.ranks.get(&parent_index(self.index)).copied()
        }
    }

    pub fn root_rank(&self) -> Option<usize> {
        self.ranks.get(&0).copied()
    }

    pub fn left_child_rank(&self) -> Option<usize> {
        self.has_left_child
            .then(|| self.ranks.get(&left_child_index(self.index)).copied())
            .flatten()
    }

    pub fn right_child_rank(&self) -> Option<usize> {
        self.has_right_child
            .then(|| self.ranks.get(&right_child_index(self.index)).copied())
            .flatten()
    }

    pub fn set_client_rank(&mut self, rank: usize) {
        self.client_rank = Some(rank);
    }

    /// Records (or corrects) the rank holding some index of the tree.
    pub fn update_node(&mut self, index: usize, rank: usize) {
        self.ranks.insert(index, rank);
    }

    pub fn set_left_child(&mut self, rank: usize) {
        self.has_left_child = true;
        self.update_node(left_child_index(self.index), rank);
    }

    pub fn set_right_child(&mut self, rank: usize) {
        self.has_right_child = true;
        self.update_node(right_child_index(self.index), rank);
    }

    pub fn unset_left_child(&mut self) {
        if let Some(rank) = self.left_child_rank() {
            self.past_children.insert(rank);
        }
        self.has_left_child = false;
    }

    pub fn unset_right_child(&mut self) {
        if let Some(rank) = self.right_child_rank() {
            self.past_children.insert(rank);
        }
        self.has_right_child = false;
    }

    pub fn past_children(&self) -> &FxHashSet<usize> {
        &self.past_children
    }
}

// ############################################################################
// #### TESTS #################################################################
// ############################################################################

#[cfg(test)]
mod test_tree {
    use super::*;

    #[test]
    fn index_arithmetic_is_consistent() {
        for i in 1..100 {
            let p = parent_index(i);
            assert!(left_child_index(p) == i || right_child_index(p) == i);
        }
        assert_eq!(0, parent_index(0));
    }

    #[test]
    fn the_root_reports_to_its_client() {
        let mut tree = JobTree::new(0);
        assert!(tree.is_root());
        assert_eq!(None, tree.parent_rank());
        tree.set_client_rank(7);
        assert_eq!(Some(7), tree.parent_rank());
    }

    #[test]
    fn children_are_tracked_and_remembered_after_removal() {
        let mut tree = JobTree::new(1);
        tree.set_left_child(4);
        tree.set_right_child(5);
        assert_eq!(Some(4), tree.left_child_rank());
        assert_eq!(Some(5), tree.right_child_rank());
        assert!(!tree.is_leaf());

        tree.unset_left_child();
        assert_eq!(None, tree.left_child_rank());
        assert!(tree.past_children().contains(&4));
    }

    #[test]
    fn a_node_wants_children_only_within_the_volume() {
        let tree = JobTree::new(1);
        // Children of node 1 are indices 3 and 4.
        assert!(tree.wants_child(true, 4));
        assert!(!tree.wants_child(false, 4));
        assert!(tree.wants_child(false, 5));
    }
}
