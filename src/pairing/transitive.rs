//! 既有匹配图上的传递闭包扩展

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use log::info;

use crate::corpus::Corpus;
use crate::pairing::{PairGenerator, TransitivePairingOptions};
use crate::types::{ImageId, ImagePair, pair_id};

/// 传递闭包策略
///
/// 把既有匹配图片对视为无向图，每一轮对所有已知图片对 (a, b) 及
/// 任意已知 (b, c) 提出新的候选 (a, c)。规范 pair id 的哈希集合保证
/// 整个 pass 中同一个无序图片对绝不会重复产出；本轮新发现的图片对
/// 只在下一轮参与扩展
pub struct TransitivePairGenerator {
    options: TransitivePairingOptions,
    seed_pairs: Vec<ImagePair>,
    current_iteration: usize,
    /// 按发现顺序保存的已知图片对，轮内迭代顺序由它决定
    known_pairs: Vec<ImagePair>,
    adjacency: HashMap<ImageId, Vec<ImageId>>,
    image_pair_ids: HashSet<u64>,
    pending: VecDeque<ImagePair>,
}

impl TransitivePairGenerator {
    pub fn new<C: Corpus>(options: TransitivePairingOptions, corpus: &C) -> Result<Self> {
        options.check()?;
        let seed_pairs = corpus.matched_pairs()?;
        info!("传递闭包配对: {} 对既有匹配", seed_pairs.len());
        let mut generator = Self {
            options,
            seed_pairs,
            current_iteration: 0,
            known_pairs: vec![],
            adjacency: HashMap::new(),
            image_pair_ids: HashSet::new(),
            pending: VecDeque::new(),
        };
        generator.reset();
        Ok(generator)
    }

    /// 把一个图片对并入已知集合，重复或自环直接忽略
    fn ingest(&mut self, a: ImageId, b: ImageId) -> bool {
        if a == b || !self.image_pair_ids.insert(pair_id(a, b)) {
            return false;
        }
        self.known_pairs.push((a, b));
        self.adjacency.entry(a).or_default().push(b);
        self.adjacency.entry(b).or_default().push(a);
        true
    }

    /// 执行一轮闭包扩展，返回本轮新发现的图片对
    fn expand_round(&mut self) -> Vec<ImagePair> {
        let mut discovered = vec![];
        // 轮内只在轮开始时的已知集合上扩展
        let snapshot_len = self.known_pairs.len();
        for idx in 0..snapshot_len {
            let (a, b) = self.known_pairs[idx];
            if let Some(neighbors) = self.adjacency.get(&b) {
                for &c in neighbors {
                    if c != a && self.image_pair_ids.insert(pair_id(a, c)) {
                        discovered.push((a, c));
                    }
                }
            }
            if let Some(neighbors) = self.adjacency.get(&a) {
                for &c in neighbors {
                    if c != b && self.image_pair_ids.insert(pair_id(c, b)) {
                        discovered.push((c, b));
                    }
                }
            }
        }
        // 新发现的图片对从下一轮开始参与扩展
        for &(a, b) in &discovered {
            self.known_pairs.push((a, b));
            self.adjacency.entry(a).or_default().push(b);
            self.adjacency.entry(b).or_default().push(a);
        }
        discovered
    }
}

impl PairGenerator for TransitivePairGenerator {
    fn reset(&mut self) {
        self.current_iteration = 0;
        self.known_pairs.clear();
        self.adjacency.clear();
        self.image_pair_ids.clear();
        self.pending.clear();
        let seed_pairs = self.seed_pairs.clone();
        for (a, b) in seed_pairs {
            self.ingest(a, b);
        }
    }

    fn has_finished(&self) -> bool {
        self.current_iteration >= self.options.num_iterations && self.pending.is_empty()
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        loop {
            if !self.pending.is_empty() {
                let take = self.options.batch_size.min(self.pending.len());
                return self.pending.drain(..take).collect();
            }
            if self.current_iteration >= self.options.num_iterations {
                return vec![];
            }
            self.current_iteration += 1;
            let discovered = self.expand_round();
            self.pending.extend(discovered);
        }
    }
}
