//! 按拍摄顺序的时序窗口配对

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Result, ensure};
use log::info;

use crate::corpus::Corpus;
use crate::pairing::{
    PairGenerator, SequentialPairingOptions, VocabTreePairGenerator,
};
use crate::types::{ImageId, ImagePair, pair_id};

/// 时序策略
///
/// 图片按名字典序排列后，每张图片与其后 `overlap` 张构成候选对；
/// 开启二次幂扩展时再加上 2^i 间隔处的图片，用于覆盖慢速回环。
/// 语料库带 rig 元数据时，同帧图片以及窗口内相邻帧的全部图片也构成
/// 候选对。回环检测是一个内嵌的视觉检索 generator，每处理
/// `loop_detection_period` 张图片就消费它的一批结果
pub struct SequentialPairGenerator {
    options: SequentialPairingOptions,
    ordered_image_ids: Vec<ImageId>,
    /// 按首次出现顺序排列的帧，每帧内图片保持字典序
    frames: Vec<Vec<ImageId>>,
    frame_index_of: HashMap<ImageId, usize>,
    loop_detector: Option<Box<dyn PairGenerator>>,
    image_idx: usize,
}

impl SequentialPairGenerator {
    pub fn new<C: Corpus + 'static>(
        options: SequentialPairingOptions,
        corpus: Arc<C>,
    ) -> Result<Self> {
        options.check()?;
        let loop_detector = if options.loop_detection {
            let ordered = corpus.ordered_image_ids()?;
            let query_image_ids = ordered
                .iter()
                .copied()
                .step_by(options.loop_detection_period)
                .collect();
            let detector = VocabTreePairGenerator::new(
                options.vocab_tree_options(),
                corpus.clone(),
                query_image_ids,
            )?;
            Some(Box::new(detector) as Box<dyn PairGenerator>)
        } else {
            None
        };
        Self::with_loop_detector(options, &*corpus, loop_detector)
    }

    /// 用一个外部构造的回环检测 generator 创建时序 generator
    pub fn with_loop_detector<C: Corpus>(
        options: SequentialPairingOptions,
        corpus: &C,
        loop_detector: Option<Box<dyn PairGenerator>>,
    ) -> Result<Self> {
        options.check()?;
        let ordered_image_ids = corpus.ordered_image_ids()?;
        ensure!(ordered_image_ids.len() >= 2, "时序配对至少需要 2 张图片");
        info!("时序配对: {} 张图片", ordered_image_ids.len());

        let mut frames: Vec<Vec<ImageId>> = vec![];
        let mut frame_index_of = HashMap::new();
        if options.expand_rig_images {
            let mut index_of_frame = HashMap::new();
            for &image_id in &ordered_image_ids {
                let Some(frame_id) = corpus.frame_id(image_id) else {
                    continue;
                };
                let idx = *index_of_frame.entry(frame_id).or_insert_with(|| {
                    frames.push(vec![]);
                    frames.len() - 1
                });
                frames[idx].push(image_id);
                frame_index_of.insert(image_id, idx);
            }
        }

        Ok(Self {
            options,
            ordered_image_ids,
            frames,
            frame_index_of,
            loop_detector,
            image_idx: 0,
        })
    }

    /// 产出第 `idx` 张图片的时序窗口图片对
    fn window_pairs(&mut self, idx: usize) -> Vec<ImagePair> {
        let n = self.ordered_image_ids.len();
        let image_id = self.ordered_image_ids[idx];
        let mut seen = HashSet::new();
        let mut pairs = vec![];
        let mut push = |pairs: &mut Vec<ImagePair>, a: ImageId, b: ImageId| {
            if a != b && seen.insert(pair_id(a, b)) {
                pairs.push((a, b));
            }
        };

        for i in 1..=self.options.overlap {
            if idx + i < n {
                push(&mut pairs, image_id, self.ordered_image_ids[idx + i]);
            }
            if self.options.quadratic_overlap {
                // 2^i 间隔，小间隔与线性窗口重叠的部分由去重集合吸收
                if let Some(step) = 1usize.checked_shl(i as u32) {
                    if idx + step < n {
                        push(&mut pairs, image_id, self.ordered_image_ids[idx + step]);
                    }
                }
            }
        }

        if let Some(&frame_idx) = self.frame_index_of.get(&image_id) {
            // 同帧图片之间总是构成候选对
            for &other in &self.frames[frame_idx] {
                push(&mut pairs, image_id, other);
            }
            // 窗口内相邻帧的全部图片
            let frame_end = (frame_idx + self.options.overlap + 1).min(self.frames.len());
            for frame in &self.frames[frame_idx + 1..frame_end] {
                for &other in frame {
                    push(&mut pairs, image_id, other);
                }
            }
        }

        if let Some(detector) = &mut self.loop_detector {
            if idx % self.options.loop_detection_period == 0 && !detector.has_finished() {
                for (a, b) in detector.next_batch() {
                    push(&mut pairs, a, b);
                }
            }
        }

        pairs
    }
}

impl PairGenerator for SequentialPairGenerator {
    fn reset(&mut self) {
        self.image_idx = 0;
        if let Some(detector) = &mut self.loop_detector {
            detector.reset();
        }
    }

    fn has_finished(&self) -> bool {
        self.image_idx >= self.ordered_image_ids.len()
            && self.loop_detector.as_ref().is_none_or(|d| d.has_finished())
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        while self.image_idx < self.ordered_image_ids.len() {
            let idx = self.image_idx;
            self.image_idx += 1;
            let pairs = self.window_pairs(idx);
            if !pairs.is_empty() {
                return pairs;
            }
        }
        // 图片序列走完后排空回环检测剩余的批次
        if let Some(detector) = &mut self.loop_detector {
            while !detector.has_finished() {
                let pairs = detector.next_batch();
                if !pairs.is_empty() {
                    return pairs;
                }
            }
        }
        vec![]
    }
}
