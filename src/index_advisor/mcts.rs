//! Monte Carlo tree search for budgeted index selection
//!
//! Tree nodes are index sets; an edge adds one candidate. Rewards come from
//! [`BenefitInference`], so no optimizer call happens during the search. Sets
//! over the storage budget are penalised rather than forbidden, and only sets
//! within budget are ever returned.

use super::search::BenefitInference;
use super::workload::config_key;
use super::{IndexFactory, IndexId};
use crate::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use tracing::debug;

const EXPLORATION: f64 = std::f64::consts::SQRT_2;

#[derive(Debug)]
struct Node {
    chosen: Vec<IndexId>,
    untried: Vec<IndexId>,
    children: Vec<usize>,
    parent: Option<usize>,
    visits: u32,
    reward: f64,
}

pub struct MctsSearch<'a, 'w> {
    inference: &'a BenefitInference<'w>,
    candidates: Vec<IndexId>,
    storage: HashMap<IndexId, f64>,
    budget: f64,
    max_index_num: Option<usize>,
    iterations: usize,
    rng: StdRng,
    scale: f64,
    nodes: Vec<Node>,
    best: (Vec<IndexId>, f64),
}

impl<'a, 'w> MctsSearch<'a, 'w> {
    pub fn new(
        inference: &'a BenefitInference<'w>,
        factory: &IndexFactory,
        candidates: &[IndexId],
        budget: f64,
        max_index_num: Option<usize>,
        iterations: usize,
        seed: u64,
    ) -> Result<Self> {
        let storage = candidates
            .iter()
            .map(|id| (*id, factory.index(*id).storage_mb()))
            .collect();
        let scale = inference.workload().total_origin_cost()?.max(f64::EPSILON);
        Ok(Self {
            inference,
            candidates: candidates.to_vec(),
            storage,
            budget,
            max_index_num,
            iterations,
            rng: StdRng::seed_from_u64(seed),
            scale,
            nodes: Vec::new(),
            best: (Vec::new(), 0.0),
        })
    }

    fn storage_of(&self, set: &[IndexId]) -> f64 {
        set.iter().map(|id| self.storage.get(id).copied().unwrap_or(0.0)).sum()
    }

    fn is_full(&self, set: &[IndexId]) -> bool {
        self.max_index_num.is_some_and(|max| set.len() >= max)
    }

    /// Normalised benefit minus the overflow penalty; tracks the best feasible set
    fn reward(&mut self, set: &[IndexId]) -> Result<f64> {
        let benefit = self.inference.infer_benefit(set)?;
        let storage = self.storage_of(set);
        let overflow = (storage - self.budget).max(0.0);
        if overflow == 0.0 && benefit > self.best.1 {
            self.best = (config_key(set).to_vec(), benefit);
        }
        Ok(benefit / self.scale - overflow / self.budget)
    }

    fn add_node(&mut self, chosen: Vec<IndexId>, parent: Option<usize>) -> usize {
        let untried = if self.is_full(&chosen) {
            Vec::new()
        } else {
            self.candidates
                .iter()
                .filter(|id| !chosen.contains(id))
                .copied()
                .collect()
        };
        self.nodes.push(Node {
            chosen,
            untried,
            children: Vec::new(),
            parent,
            visits: 0,
            reward: 0.0,
        });
        self.nodes.len() - 1
    }

    fn select_child(&self, node: usize) -> usize {
        let parent_visits = f64::from(self.nodes[node].visits.max(1));
        let mut best = self.nodes[node].children[0];
        let mut best_score = f64::NEG_INFINITY;
        for child in &self.nodes[node].children {
            let n = &self.nodes[*child];
            let score = if n.visits == 0 {
                f64::INFINITY
            } else {
                n.reward / f64::from(n.visits) + EXPLORATION * (parent_visits.ln() / f64::from(n.visits)).sqrt()
            };
            if score > best_score {
                best_score = score;
                best = *child;
            }
        }
        best
    }

    /// Random completion that stays within budget and count
    fn rollout(&mut self, start: &[IndexId]) -> Vec<IndexId> {
        let mut set = start.to_vec();
        let mut remaining: Vec<IndexId> = self
            .candidates
            .iter()
            .filter(|id| !set.contains(id))
            .copied()
            .collect();
        remaining.shuffle(&mut self.rng);
        let mut storage = self.storage_of(&set);
        for id in remaining {
            if self.is_full(&set) {
                break;
            }
            let size = self.storage.get(&id).copied().unwrap_or(0.0);
            if storage + size <= self.budget {
                storage += size;
                set.push(id);
            }
        }
        set
    }

    pub fn run(mut self) -> Result<Vec<IndexId>> {
        if self.candidates.is_empty() {
            return Ok(Vec::new());
        }
        let root = self.add_node(Vec::new(), None);
        for _ in 0..self.iterations {
            // selection
            let mut node = root;
            while self.nodes[node].untried.is_empty() && !self.nodes[node].children.is_empty() {
                node = self.select_child(node);
            }
            // expansion
            if !self.nodes[node].untried.is_empty() {
                let pick = self.rng.random_range(0..self.nodes[node].untried.len());
                let action = self.nodes[node].untried.swap_remove(pick);
                let mut chosen = self.nodes[node].chosen.clone();
                chosen.push(action);
                let child = self.add_node(chosen, Some(node));
                self.nodes[node].children.push(child);
                node = child;
            }
            // simulation
            let chosen = self.nodes[node].chosen.clone();
            let mut reward = self.reward(&chosen)?;
            let completed = self.rollout(&chosen);
            if completed.len() > chosen.len() {
                reward = reward.max(self.reward(&completed)?);
            }
            // backpropagation
            let mut current = Some(node);
            while let Some(index) = current {
                self.nodes[index].visits += 1;
                self.nodes[index].reward += reward;
                current = self.nodes[index].parent;
            }
        }
        debug!(nodes = self.nodes.len(), benefit = self.best.1, "Tree search finished");
        Ok(self.best.0)
    }
}
