//! 分块穷举配对

use anyhow::{Result, ensure};
use log::info;

use crate::corpus::Corpus;
use crate::pairing::{ExhaustivePairingOptions, PairGenerator};
use crate::types::ImagePair;

/// 穷举策略
///
/// 把 N x N 上三角矩阵按 `block_size` 切成方块，两个游标按行优先顺序
/// 逐块推进，块内只产出 `idx1 < idx2` 的组合，保证每个无序图片对
/// 恰好出现一次，同时把驻留内存的图片数量约束在一个块以内
pub struct ExhaustivePairGenerator {
    options: ExhaustivePairingOptions,
    image_ids: Vec<u32>,
    start_idx1: usize,
    start_idx2: usize,
}

impl ExhaustivePairGenerator {
    pub fn new<C: Corpus>(options: ExhaustivePairingOptions, corpus: &C) -> Result<Self> {
        options.check()?;
        let image_ids = corpus.image_ids();
        ensure!(image_ids.len() >= 2, "穷举配对至少需要 2 张图片");
        info!("穷举配对: {} 张图片", image_ids.len());
        Ok(Self { options, image_ids, start_idx1: 0, start_idx2: 0 })
    }
}

impl PairGenerator for ExhaustivePairGenerator {
    fn reset(&mut self) {
        self.start_idx1 = 0;
        self.start_idx2 = 0;
    }

    fn has_finished(&self) -> bool {
        self.start_idx1 >= self.image_ids.len()
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        let n = self.image_ids.len();
        let block_size = self.options.block_size;
        while self.start_idx1 < n {
            let end_idx1 = (self.start_idx1 + block_size).min(n);
            let end_idx2 = (self.start_idx2 + block_size).min(n);

            let mut pairs = vec![];
            for idx1 in self.start_idx1..end_idx1 {
                // 对角块跳过下三角与对角线本身
                for idx2 in self.start_idx2.max(idx1 + 1)..end_idx2 {
                    pairs.push((self.image_ids[idx1], self.image_ids[idx2]));
                }
            }

            // 推进到同一行的下一个块，行扫完后换到下一行的对角块
            self.start_idx2 += block_size;
            if self.start_idx2 >= n {
                self.start_idx1 += block_size;
                self.start_idx2 = self.start_idx1;
            }

            // 末尾的单图片对角块可能为空，继续推进而不是交付空批
            if !pairs.is_empty() {
                return pairs;
            }
        }
        vec![]
    }
}
