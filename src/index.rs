//! 视觉检索索引
//!
//! 词袋模型下的近似视觉相似度检索：描述子被量化到视觉单词，
//! 图片之间通过共享单词的 TF-IDF 权重计分。索引文件的磁盘布局
//! 由外部词表协作者负责，这里只消费一个 `.npy` 单词矩阵。

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use log::debug;
use ndarray::ArrayView2;
use ndarray_npy::read_npy;

use crate::hamming::{DESCRIPTOR_SIZE, knn_hamming};
use crate::types::ImageId;

/// 单张候选图片的检索得分
#[derive(Debug, Clone, PartialEq)]
pub struct ImageScore {
    pub image_id: ImageId,
    pub score: f32,
}

/// 检索参数
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// 每个查询返回的最大图片数量
    pub max_num_images: usize,
    /// 每个描述子量化到的最近视觉单词数量
    pub num_neighbors: usize,
    /// 检索时访问的搜索树节点数量，对平铺索引无效
    pub num_checks: usize,
    /// 空间验证后保留的图片数量，0 表示关闭验证
    pub num_images_after_verification: usize,
}

/// 视觉索引的协作者边界
///
/// 索引阶段单写，查询阶段多读：`add` 必须在任何 `query` 之前完成
pub trait VisualIndex: Send + Sync {
    /// 将一张图片的描述子加入索引
    fn add(&mut self, image_id: ImageId, descriptors: ArrayView2<u8>) -> Result<()>;

    /// 查询与给定描述子最相似的图片
    ///
    /// 返回结果按得分降序排列，得分相同时按图片 id 升序，
    /// 这是下游确定性输出的前提
    fn query(&self, descriptors: ArrayView2<u8>, options: &QueryOptions) -> Result<Vec<ImageScore>>;

    /// 已索引的图片数量
    fn num_images(&self) -> usize;
}

/// 平铺词袋索引
pub struct BowVisualIndex {
    /// 视觉单词矩阵，按行连续存放
    words: Vec<u8>,
    /// 倒排列表：单词 -> (图片 id, 词频)
    inverted: Vec<Vec<(ImageId, u32)>>,
    num_indexed: usize,
}

impl BowVisualIndex {
    /// 从 `.npy` 单词矩阵加载词表
    pub fn open(vocab_path: &Path) -> Result<Self> {
        let words: ndarray::Array2<u8> = read_npy(vocab_path)
            .with_context(|| format!("无法读取视觉词表 {}", vocab_path.display()))?;
        ensure!(
            words.ncols() == DESCRIPTOR_SIZE,
            "视觉词表宽度应为 {} 字节，实际为 {}",
            DESCRIPTOR_SIZE,
            words.ncols()
        );
        ensure!(words.nrows() > 0, "视觉词表 {} 为空", vocab_path.display());
        debug!("加载视觉词表: {} 个单词", words.nrows());

        let num_words = words.nrows();
        let words = words.as_standard_layout().iter().copied().collect::<Vec<_>>();
        Ok(Self { words, inverted: vec![vec![]; num_words], num_indexed: 0 })
    }

    /// 统计每个单词在描述子集合中出现的次数
    fn quantize(&self, descriptors: ArrayView2<u8>, num_neighbors: usize) -> HashMap<usize, u32> {
        let descriptors = descriptors.as_standard_layout();
        let mut counts = HashMap::new();
        for row in descriptors.rows() {
            let row = row.to_slice().expect("descriptor row must be contiguous");
            for (word, _) in knn_hamming(row, &self.words, num_neighbors) {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl VisualIndex for BowVisualIndex {
    fn add(&mut self, image_id: ImageId, descriptors: ArrayView2<u8>) -> Result<()> {
        ensure!(descriptors.ncols() == DESCRIPTOR_SIZE, "描述子宽度应为 {} 字节", DESCRIPTOR_SIZE);
        // 索引阶段每个描述子只量化到最近的一个单词
        for (word, count) in self.quantize(descriptors, 1) {
            self.inverted[word].push((image_id, count));
        }
        self.num_indexed += 1;
        Ok(())
    }

    fn query(&self, descriptors: ArrayView2<u8>, options: &QueryOptions) -> Result<Vec<ImageScore>> {
        ensure!(descriptors.ncols() == DESCRIPTOR_SIZE, "描述子宽度应为 {} 字节", DESCRIPTOR_SIZE);
        let mut scores: HashMap<ImageId, f32> = HashMap::new();
        for (word, query_count) in self.quantize(descriptors, options.num_neighbors) {
            let list = &self.inverted[word];
            if list.is_empty() {
                continue;
            }
            let idf = ((1 + self.num_indexed) as f32 / (1 + list.len()) as f32).ln();
            for &(image_id, count) in list {
                *scores.entry(image_id).or_insert(0.0) +=
                    (query_count * count) as f32 * idf * idf;
            }
        }

        let mut results = scores
            .into_iter()
            .map(|(image_id, score)| ImageScore { image_id, score })
            .collect::<Vec<_>>();
        results.sort_unstable_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap().then(a.image_id.cmp(&b.image_id))
        });
        results.truncate(options.max_num_images);
        Ok(results)
    }

    fn num_images(&self) -> usize {
        self.num_indexed
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    fn word(byte: u8) -> Vec<u8> {
        vec![byte; DESCRIPTOR_SIZE]
    }

    fn index_with_words(bytes: &[u8]) -> BowVisualIndex {
        let words = bytes.iter().flat_map(|&b| word(b)).collect::<Vec<_>>();
        let num_words = bytes.len();
        BowVisualIndex { words, inverted: vec![vec![]; num_words], num_indexed: 0 }
    }

    fn descriptors(bytes: &[u8]) -> Array2<u8> {
        Array2::from_shape_vec(
            (bytes.len(), DESCRIPTOR_SIZE),
            bytes.iter().flat_map(|&b| word(b)).collect(),
        )
        .unwrap()
    }

    fn query_options() -> QueryOptions {
        QueryOptions {
            max_num_images: 10,
            num_neighbors: 1,
            num_checks: 64,
            num_images_after_verification: 0,
        }
    }

    #[test]
    fn test_query_prefers_same_words() {
        let mut index = index_with_words(&[0x00, 0x0F, 0xF0, 0xFF]);
        index.add(1, descriptors(&[0x00, 0x0F]).view()).unwrap();
        index.add(2, descriptors(&[0xF0, 0xFF]).view()).unwrap();
        index.add(3, descriptors(&[0x00, 0xFF]).view()).unwrap();

        let results = index.query(descriptors(&[0x00, 0x0F]).view(), &query_options()).unwrap();
        assert_eq!(results[0].image_id, 1);
        assert!(results[0].score > results.last().unwrap().score);
    }

    #[test]
    fn test_query_tie_breaks_by_image_id() {
        let mut index = index_with_words(&[0x00, 0xFF]);
        // 两张完全相同的图片，得分必然并列
        index.add(7, descriptors(&[0x00]).view()).unwrap();
        index.add(3, descriptors(&[0x00]).view()).unwrap();

        let results = index.query(descriptors(&[0x00]).view(), &query_options()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].image_id, 3);
        assert_eq!(results[1].image_id, 7);
    }

    #[test]
    fn test_query_respects_max_num_images() {
        let mut index = index_with_words(&[0x00, 0xFF]);
        for id in 1..=5 {
            index.add(id, descriptors(&[0x00]).view()).unwrap();
        }
        let mut options = query_options();
        options.max_num_images = 2;
        let results = index.query(descriptors(&[0x00]).view(), &options).unwrap();
        assert_eq!(results.len(), 2);
    }
}
