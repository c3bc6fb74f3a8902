//! 外部图片对列表重放

use std::fs;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::{info, warn};

use crate::corpus::Corpus;
use crate::pairing::{ImportedPairingOptions, PairGenerator};
use crate::types::ImagePair;

/// 重放调用方提供的图片对列表
///
/// 列表中无法解析的图片名只告警并跳过，不影响整个 pass；
/// 解析成功的图片对按文件顺序分批交付
pub struct ImportedPairGenerator {
    options: ImportedPairingOptions,
    image_pairs: Vec<ImagePair>,
    pair_idx: usize,
}

impl ImportedPairGenerator {
    pub fn new<C: Corpus>(options: ImportedPairingOptions, corpus: &C) -> Result<Self> {
        options.check()?;
        info!("读取外部图片对列表: {}", options.match_list_path.display());
        let content = fs::read_to_string(&options.match_list_path).with_context(|| {
            format!("无法读取图片对列表 {}", options.match_list_path.display())
        })?;

        let mut image_pairs = vec![];
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name1, name2)) = line.split_whitespace().collect_tuple() else {
                warn!("第 {} 行不是合法的图片对，已跳过: {}", lineno + 1, line);
                continue;
            };
            match (corpus.find_image_id(name1), corpus.find_image_id(name2)) {
                (Some(a), Some(b)) if a != b => image_pairs.push((a, b)),
                (Some(_), Some(_)) => {
                    warn!("第 {} 行的两个图片名相同，已跳过: {}", lineno + 1, line);
                }
                _ => {
                    warn!("第 {} 行包含未知图片名，已跳过: {}", lineno + 1, line);
                }
            }
        }
        info!("解析得到 {} 对图片", image_pairs.len());

        Ok(Self { options, image_pairs, pair_idx: 0 })
    }
}

impl PairGenerator for ImportedPairGenerator {
    fn reset(&mut self) {
        self.pair_idx = 0;
    }

    fn has_finished(&self) -> bool {
        self.pair_idx >= self.image_pairs.len()
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        let end = (self.pair_idx + self.options.block_size).min(self.image_pairs.len());
        let batch = self.image_pairs[self.pair_idx..end].to_vec();
        self.pair_idx = end;
        batch
    }
}
