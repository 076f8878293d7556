use std::collections::VecDeque;

use serde::Serialize;
use tracing::warn;

use crate::domain::{CyclePolicy, Nid};
use crate::error::FactError;

/// Reflexive-transitive closure of a containment graph as `(leader, member)` pairs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransitiveClosure {
    members: Vec<Vec<Nid>>,
    leaders: Vec<Vec<Nid>>,
}

impl TransitiveClosure {
    /// Computes the closure over `node_count` nodes and `parent -> child` edges.
    ///
    /// Every node leads itself. Traversal keeps a visited set per leader, so it
    /// terminates on any input; whether a cycle is an error depends on `policy`.
    pub fn compute(
        graph: &str,
        node_count: usize,
        edges: &[(Nid, Nid)],
        policy: CyclePolicy,
        describe: impl Fn(Nid) -> String,
    ) -> Result<Self, FactError> {
        let mut children = vec![Vec::new(); node_count];
        for &(parent, child) in edges {
            if parent.index() < node_count && child.index() < node_count {
                children[parent.index()].push(child);
            }
        }

        if let Some(node) = find_cycle(&children) {
            match policy {
                CyclePolicy::Reject => {
                    return Err(FactError::ContainmentCycle {
                        graph: graph.to_string(),
                        node: describe(node),
                    });
                }
                CyclePolicy::Truncate => {
                    warn!(graph, node = %describe(node), "containment cycle tolerated");
                }
            }
        }

        let mut members = Vec::with_capacity(node_count);
        let mut seen = vec![usize::MAX; node_count];
        let mut queue = VecDeque::new();
        for leader in Nid::range(node_count)?.map(Nid::new) {
            let slot = leader.index();
            let mut reached = vec![leader];
            seen[slot] = slot;
            queue.push_back(slot);
            while let Some(current) = queue.pop_front() {
                for child in &children[current] {
                    if seen[child.index()] != slot {
                        seen[child.index()] = slot;
                        reached.push(*child);
                        queue.push_back(child.index());
                    }
                }
            }
            reached.sort_unstable();
            members.push(reached);
        }

        let mut leaders = vec![Vec::new(); node_count];
        for (reached, leader) in members.iter().zip(Nid::range(node_count)?.map(Nid::new)) {
            for member in reached {
                leaders[member.index()].push(leader);
            }
        }

        Ok(Self { members, leaders })
    }

    pub fn node_count(&self) -> usize {
        self.members.len()
    }

    pub fn members_of(&self, leader: Nid) -> &[Nid] {
        self.members
            .get(leader.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn leaders_of(&self, member: Nid) -> &[Nid] {
        self.leaders
            .get(member.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, leader: Nid, member: Nid) -> bool {
        self.members_of(leader).binary_search(&member).is_ok()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (Nid, Nid)> + '_ {
        self.members
            .iter()
            .zip((0u32..).map(Nid::new))
            .flat_map(|(reached, leader)| reached.iter().map(move |member| (leader, *member)))
    }

    pub fn len(&self) -> usize {
        self.members.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

pub fn roots(node_count: usize, edges: &[(Nid, Nid)]) -> Vec<Nid> {
    let mut is_child = vec![false; node_count];
    for &(_, child) in edges {
        if let Some(flag) = is_child.get_mut(child.index()) {
            *flag = true;
        }
    }
    is_child
        .iter()
        .zip((0u32..).map(Nid::new))
        .filter(|(child, _)| !**child)
        .map(|(_, node)| node)
        .collect()
}

fn find_cycle(children: &[Vec<Nid>]) -> Option<Nid> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    let mut marks = vec![Mark::New; children.len()];
    for start in 0..children.len() {
        if marks[start] != Mark::New {
            continue;
        }
        let mut stack = vec![(start, 0usize)];
        marks[start] = Mark::Active;
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(child) = children[node].get(*next) {
                *next += 1;
                match marks[child.index()] {
                    Mark::Active => return Some(*child),
                    Mark::New => {
                        marks[child.index()] = Mark::Active;
                        stack.push((child.index(), 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}
