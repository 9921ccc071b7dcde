//! Arena tree over belief states
//!
//! Nodes live in a single vector and refer to each other by `i64` index;
//! -1 marks "no parent". States are appended at creation, so every child
//! index is strictly greater than its parent's. Back-propagation and tree
//! post-processing depend on that ordering.

use crate::belief::BeliefState;
use crate::common::{PlannerError, PlannerResult};

#[derive(Debug, Clone)]
pub struct TreeNode<C> {
    state: BeliefState<C>,
    parent_index: i64,
    child_indices: Vec<i64>,
}

impl<C> TreeNode<C> {
    pub fn new(state: BeliefState<C>, parent_index: i64) -> Self {
        Self {
            state,
            parent_index,
            child_indices: Vec::new(),
        }
    }

    pub fn state(&self) -> &BeliefState<C> {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut BeliefState<C> {
        &mut self.state
    }

    pub fn parent_index(&self) -> i64 {
        self.parent_index
    }

    pub fn child_indices(&self) -> &[i64] {
        &self.child_indices
    }

    pub(crate) fn set_parent_index(&mut self, parent_index: i64) {
        self.parent_index = parent_index;
    }

    pub(crate) fn add_child_index(&mut self, child_index: i64) {
        self.child_indices.push(child_index);
    }

    pub(crate) fn clear_child_indices(&mut self) {
        self.child_indices.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlannerTree<C> {
    nodes: Vec<TreeNode<C>>,
}

impl<C> PlannerTree<C> {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TreeNode<C>] {
        &self.nodes
    }

    pub fn node(&self, index: i64) -> &TreeNode<C> {
        &self.nodes[index as usize]
    }

    pub fn node_mut(&mut self, index: i64) -> &mut TreeNode<C> {
        &mut self.nodes[index as usize]
    }

    /// Install the root state; only valid on an empty tree
    pub fn push_root(&mut self, state: BeliefState<C>) -> PlannerResult<i64> {
        if !self.nodes.is_empty() {
            return Err(PlannerError::InvalidArgument(
                "tree already has a root".to_string(),
            ));
        }
        self.nodes.push(TreeNode::new(state, -1));
        Ok(0)
    }

    /// Append a state as a child of `parent_index`, returning the new index
    pub fn add_child(&mut self, parent_index: i64, state: BeliefState<C>) -> PlannerResult<i64> {
        if parent_index < 0 || parent_index as usize >= self.nodes.len() {
            return Err(PlannerError::InvariantViolation(format!(
                "parent index {} out of bounds for tree of {} nodes",
                parent_index,
                self.nodes.len()
            )));
        }
        let child_index = self.nodes.len() as i64;
        self.nodes.push(TreeNode::new(state, parent_index));
        self.nodes[parent_index as usize].add_child_index(child_index);
        Ok(child_index)
    }

    pub(crate) fn push_node(&mut self, node: TreeNode<C>) -> i64 {
        let index = self.nodes.len() as i64;
        self.nodes.push(node);
        index
    }

    /// Check parent/child cross-listing, index ordering, and bounds
    pub fn validate_linkage(&self) -> PlannerResult<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            let index = index as i64;
            let parent = node.parent_index();
            if index == 0 {
                if parent >= 0 {
                    return Err(PlannerError::InvariantViolation(
                        "root node has a parent".to_string(),
                    ));
                }
            } else {
                if parent < 0 || parent >= index {
                    return Err(PlannerError::InvariantViolation(format!(
                        "node {} has parent {} (parents must precede children)",
                        index, parent
                    )));
                }
                let listed = self.nodes[parent as usize]
                    .child_indices()
                    .iter()
                    .filter(|&&c| c == index)
                    .count();
                if listed != 1 {
                    return Err(PlannerError::InvariantViolation(format!(
                        "node {} listed {} times among children of {}",
                        index, listed, parent
                    )));
                }
            }
            for &child in node.child_indices() {
                if child <= index || child as usize >= self.nodes.len() {
                    return Err(PlannerError::InvariantViolation(format!(
                        "node {} lists child {} outside ({}, {})",
                        index,
                        child,
                        index,
                        self.nodes.len()
                    )));
                }
                if self.nodes[child as usize].parent_index() != index {
                    return Err(PlannerError::InvariantViolation(format!(
                        "child {} does not point back at parent {}",
                        child, index
                    )));
                }
            }
        }
        Ok(())
    }

}

impl<C: Clone> PlannerTree<C> {
    /// Clear the nearest-neighbor eligibility bit on `root` and every
    /// descendant. Iterative so deep trees cannot exhaust the stack.
    pub fn disable_branch(&mut self, root: i64) {
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &mut self.nodes[index as usize];
            node.state_mut().disable_for_nn();
            stack.extend_from_slice(node.child_indices());
        }
    }
}
