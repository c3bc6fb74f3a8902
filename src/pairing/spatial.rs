//! 基于位置先验的空间近邻配对

use anyhow::{Result, ensure};
use kd_tree::KdTree;
use log::info;
use rayon::prelude::*;

use crate::corpus::Corpus;
use crate::pairing::{PairGenerator, SpatialPairingOptions, effective_num_threads};
use crate::types::{ImageId, ImagePair};

#[derive(Clone, Copy)]
struct PositionedImage {
    image_id: ImageId,
    xyz: [f64; 3],
}

impl kd_tree::KdPoint for PositionedImage {
    type Scalar = f64;
    type Dim = typenum::U3;

    fn at(&self, k: usize) -> f64 {
        self.xyz[k]
    }
}

/// 空间近邻策略
///
/// 对每张带位置先验的图片做 k 近邻搜索，近邻在 `max_distance` 之内才保留，
/// 但最近的 `min_num_neighbors` 个无条件保留，避免孤立图片被完全排除。
/// 没有位置先验的图片不参与搜索，也不会出现在任何产出的图片对中
pub struct SpatialPairGenerator {
    /// 每张图片一组的图片对，构造时已剔除空组
    batches: Vec<Vec<ImagePair>>,
    current_idx: usize,
}

impl SpatialPairGenerator {
    pub fn new<C: Corpus>(options: SpatialPairingOptions, corpus: &C) -> Result<Self> {
        options.check()?;

        let mut positioned = vec![];
        for image_id in corpus.image_ids() {
            if let Some(mut xyz) = corpus.position_prior(image_id) {
                if options.ignore_z {
                    xyz[2] = 0.0;
                }
                positioned.push(PositionedImage { image_id, xyz });
            }
        }
        ensure!(positioned.len() >= 2, "空间配对至少需要 2 张带位置先验的图片");
        info!("空间配对: {} 张图片带位置先验", positioned.len());

        let knn = options.max_num_neighbors.min(positioned.len() - 1);
        let max_distance_squared = options.max_distance * options.max_distance;
        let tree = KdTree::build_by_ordered_float(positioned.clone());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(effective_num_threads(options.num_threads))
            .build()?;
        let batches: Vec<Vec<ImagePair>> = pool.install(|| {
            positioned
                .par_iter()
                .map(|query| {
                    // 多取一个近邻，返回结果中包含查询图片自身
                    let mut found = tree.nearests(query, knn + 1);
                    // 距离升序，并列时按图片 id 升序，保证确定性
                    found.sort_by(|a, b| {
                        a.squared_distance
                            .partial_cmp(&b.squared_distance)
                            .unwrap()
                            .then(a.item.image_id.cmp(&b.item.image_id))
                    });

                    let mut pairs = vec![];
                    let mut rank = 0;
                    for neighbor in found {
                        if neighbor.item.image_id == query.image_id {
                            continue;
                        }
                        if rank >= knn {
                            break;
                        }
                        if neighbor.squared_distance <= max_distance_squared
                            || rank < options.min_num_neighbors
                        {
                            pairs.push((query.image_id, neighbor.item.image_id));
                        }
                        rank += 1;
                    }
                    pairs
                })
                .collect()
        });

        let batches = batches.into_iter().filter(|batch| !batch.is_empty()).collect();
        Ok(Self { batches, current_idx: 0 })
    }
}

impl PairGenerator for SpatialPairGenerator {
    fn reset(&mut self) {
        self.current_idx = 0;
    }

    fn has_finished(&self) -> bool {
        self.current_idx >= self.batches.len()
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        if self.has_finished() {
            return vec![];
        }
        let batch = self.batches[self.current_idx].clone();
        self.current_idx += 1;
        batch
    }
}
