//! 候选图片对生成子系统
//!
//! 在 N 张图片的语料库上，穷举全部 O(N^2) 个组合再逐一匹配是不可行的，
//! 这里提供一组互补的策略，在特征匹配之前生成一个有界且高召回的候选集：
//! 穷举、外部列表重放、空间近邻、视觉词表检索、时序窗口、传递闭包。
//! 所有策略共享同一个迭代契约 [`PairGenerator`]。

mod exhaustive;
mod imported;
mod sequential;
mod spatial;
mod transitive;
mod vocab_tree;

use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::Args;
pub use exhaustive::ExhaustivePairGenerator;
pub use imported::ImportedPairGenerator;
pub use sequential::SequentialPairGenerator;
pub use spatial::SpatialPairGenerator;
pub use transitive::TransitivePairGenerator;
pub use vocab_tree::VocabTreePairGenerator;

use crate::types::ImagePair;

/// 所有配对策略共享的迭代契约
///
/// 调用方循环调用 `has_finished` 和 `next_batch` 获取分批的候选图片对。
/// 约定：
/// - 批大小只是调度提示，不保证均匀；
/// - `reset` 之后重新排空必须产生与第一次完全相同的批次序列；
/// - `has_finished` 为真后 `next_batch` 永远返回空，不会报错；
/// - 任何批次中都不会出现两端相同的图片对。
pub trait PairGenerator {
    /// 回到初始状态
    fn reset(&mut self);

    /// 是否已经产出全部图片对
    fn has_finished(&self) -> bool;

    /// 返回下一批非空的图片对，耗尽时返回空
    fn next_batch(&mut self) -> Vec<ImagePair>;

    /// 便捷方法：reset 后循环 next_batch 收集全部图片对
    fn all_pairs(&mut self) -> Vec<ImagePair> {
        self.reset();
        let mut pairs = vec![];
        while !self.has_finished() {
            pairs.extend(self.next_batch());
        }
        pairs
    }
}

/// 把 `-1` 形式的线程数配置换算成实际线程数
pub(crate) fn effective_num_threads(num_threads: i32) -> usize {
    if num_threads <= 0 { num_cpus::get() } else { num_threads as usize }
}

/// 穷举配对参数
#[derive(Args, Debug, Clone)]
pub struct ExhaustivePairingOptions {
    /// 分块大小，即同时驻留内存的图片数量
    #[arg(long, value_name = "SIZE", default_value_t = 50)]
    pub block_size: usize,
}

impl Default for ExhaustivePairingOptions {
    fn default() -> Self {
        Self { block_size: 50 }
    }
}

impl ExhaustivePairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.block_size > 1, "block_size 必须大于 1");
        Ok(())
    }

    /// 供外部特征缓存预设容量的提示，只依赖配置本身
    pub fn cache_size(&self) -> usize {
        self.block_size
    }
}

/// 视觉词表检索配对参数
#[derive(Args, Debug, Clone)]
pub struct VocabTreePairingOptions {
    /// 每个查询图片检索的相似图片数量
    #[arg(long, value_name = "N", default_value_t = 100)]
    pub num_images: usize,
    /// 每个查询描述子检索的最近邻数量
    #[arg(long, value_name = "N", default_value_t = 5)]
    pub num_nearest_neighbors: usize,
    /// 检索时访问的搜索树节点数量
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub num_checks: usize,
    /// 空间验证后保留的图片数量，0 表示关闭验证
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub num_images_after_verification: usize,
    /// 每张图片参与索引的最大特征数量，超过时只保留尺度最大的部分，-1 表示不限制
    #[arg(long, value_name = "N", default_value_t = -1)]
    pub max_num_features: i64,
    /// 视觉词表路径
    #[arg(long, value_name = "PATH")]
    pub vocab_tree_path: Option<PathBuf>,
    /// 限制查询集合的图片名列表文件，每行一个图片名
    #[arg(long, value_name = "PATH")]
    pub match_list_path: Option<PathBuf>,
    /// 索引与检索的线程数，-1 表示使用全部核心
    #[arg(long, value_name = "N", default_value_t = -1)]
    pub num_threads: i32,
}

impl Default for VocabTreePairingOptions {
    fn default() -> Self {
        Self {
            num_images: 100,
            num_nearest_neighbors: 5,
            num_checks: 64,
            num_images_after_verification: 0,
            max_num_features: -1,
            vocab_tree_path: None,
            match_list_path: None,
            num_threads: -1,
        }
    }
}

impl VocabTreePairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.num_images > 0, "num_images 必须为正");
        ensure!(self.num_nearest_neighbors > 0, "num_nearest_neighbors 必须为正");
        ensure!(self.num_checks > 0, "num_checks 必须为正");
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        5 * self.num_images
    }
}

/// 时序配对参数
#[derive(Args, Debug, Clone)]
pub struct SequentialPairingOptions {
    /// 与后续多少张图片构成候选对
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub overlap: usize,
    /// 是否额外与二次幂间隔处的图片构成候选对
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    pub quadratic_overlap: bool,
    /// 存在 rig 元数据时，是否与同帧及窗口内相邻帧的全部图片构成候选对
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    pub expand_rig_images: bool,
    /// 是否启用基于视觉词表的回环检测
    #[arg(long)]
    pub loop_detection: bool,
    /// 每隔多少张图片触发一次回环检测
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub loop_detection_period: usize,
    /// 回环检测检索的图片数量，应当明显大于 overlap
    #[arg(long, value_name = "N", default_value_t = 50)]
    pub loop_detection_num_images: usize,
    /// 回环检测中每个描述子检索的最近邻数量
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub loop_detection_num_nearest_neighbors: usize,
    /// 回环检测时访问的搜索树节点数量
    #[arg(long, value_name = "N", default_value_t = 64)]
    pub loop_detection_num_checks: usize,
    /// 回环检测空间验证后保留的图片数量，0 表示关闭验证
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub loop_detection_num_images_after_verification: usize,
    /// 回环检测索引每张图片的最大特征数量，-1 表示不限制
    #[arg(long, value_name = "N", default_value_t = -1)]
    pub loop_detection_max_num_features: i64,
    /// 视觉词表路径，仅回环检测需要
    #[arg(long, value_name = "PATH")]
    pub vocab_tree_path: Option<PathBuf>,
    /// 回环检测的线程数，-1 表示使用全部核心
    #[arg(long, value_name = "N", default_value_t = -1)]
    pub num_threads: i32,
}

impl Default for SequentialPairingOptions {
    fn default() -> Self {
        Self {
            overlap: 10,
            quadratic_overlap: true,
            expand_rig_images: true,
            loop_detection: false,
            loop_detection_period: 10,
            loop_detection_num_images: 50,
            loop_detection_num_nearest_neighbors: 1,
            loop_detection_num_checks: 64,
            loop_detection_num_images_after_verification: 0,
            loop_detection_max_num_features: -1,
            vocab_tree_path: None,
            num_threads: -1,
        }
    }
}

impl SequentialPairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.overlap > 0, "overlap 必须为正");
        if self.loop_detection {
            ensure!(self.loop_detection_period > 0, "loop_detection_period 必须为正");
            ensure!(self.loop_detection_num_images > 0, "loop_detection_num_images 必须为正");
            ensure!(
                self.vocab_tree_path.is_some(),
                "启用回环检测时必须提供 vocab_tree_path"
            );
        }
        self.vocab_tree_options().check()
    }

    /// 回环检测使用的视觉词表检索参数
    pub fn vocab_tree_options(&self) -> VocabTreePairingOptions {
        VocabTreePairingOptions {
            num_images: self.loop_detection_num_images,
            num_nearest_neighbors: self.loop_detection_num_nearest_neighbors,
            num_checks: self.loop_detection_num_checks,
            num_images_after_verification: self.loop_detection_num_images_after_verification,
            max_num_features: self.loop_detection_max_num_features,
            vocab_tree_path: self.vocab_tree_path.clone(),
            match_list_path: None,
            num_threads: self.num_threads,
        }
    }

    pub fn cache_size(&self) -> usize {
        usize::max(5 * self.loop_detection_num_images, 5 * self.overlap)
    }
}

/// 空间近邻配对参数
#[derive(Args, Debug, Clone)]
pub struct SpatialPairingOptions {
    /// 是否忽略位置先验的 Z 分量
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    pub ignore_z: bool,
    /// 每张图片保留的最大近邻数量
    #[arg(long, value_name = "N", default_value_t = 50)]
    pub max_num_neighbors: usize,
    /// 每张图片保证保留的最小近邻数量，即便超出 max_distance
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub min_num_neighbors: usize,
    /// 查询图片与近邻之间允许的最大距离，GPS 坐标下单位为米
    #[arg(long, value_name = "DIST", default_value_t = 100.0)]
    pub max_distance: f64,
    /// 近邻搜索的线程数，-1 表示使用全部核心
    #[arg(long, value_name = "N", default_value_t = -1)]
    pub num_threads: i32,
}

impl Default for SpatialPairingOptions {
    fn default() -> Self {
        Self {
            ignore_z: true,
            max_num_neighbors: 50,
            min_num_neighbors: 0,
            max_distance: 100.0,
            num_threads: -1,
        }
    }
}

impl SpatialPairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.max_num_neighbors > 0, "max_num_neighbors 必须为正");
        ensure!(
            self.min_num_neighbors <= self.max_num_neighbors,
            "min_num_neighbors ({}) 不能超过 max_num_neighbors ({})",
            self.min_num_neighbors,
            self.max_num_neighbors
        );
        ensure!(self.max_distance >= 0.0, "max_distance 不能为负");
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        5 * self.max_num_neighbors
    }
}

/// 传递闭包配对参数
#[derive(Args, Debug, Clone)]
pub struct TransitivePairingOptions {
    /// 每批交付的最大图片对数量
    #[arg(long, value_name = "SIZE", default_value_t = 1000)]
    pub batch_size: usize,
    /// 传递闭包的迭代轮数
    #[arg(long, value_name = "N", default_value_t = 3)]
    pub num_iterations: usize,
}

impl Default for TransitivePairingOptions {
    fn default() -> Self {
        Self { batch_size: 1000, num_iterations: 3 }
    }
}

impl TransitivePairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "batch_size 必须为正");
        ensure!(self.num_iterations > 0, "num_iterations 必须为正");
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        2 * self.batch_size
    }
}

/// 外部列表重放参数
#[derive(Args, Debug, Clone)]
pub struct ImportedPairingOptions {
    /// 每批交付的图片对数量
    #[arg(long, value_name = "SIZE", default_value_t = 1225)]
    pub block_size: usize,
    /// 图片对列表文件路径，每行一对 `name1 name2`
    #[arg(long, value_name = "PATH")]
    pub match_list_path: PathBuf,
}

impl Default for ImportedPairingOptions {
    fn default() -> Self {
        Self { block_size: 1225, match_list_path: PathBuf::new() }
    }
}

impl ImportedPairingOptions {
    pub fn check(&self) -> Result<()> {
        ensure!(self.block_size > 0, "block_size 必须为正");
        ensure!(!self.match_list_path.as_os_str().is_empty(), "match_list_path 不能为空");
        Ok(())
    }

    pub fn cache_size(&self) -> usize {
        self.block_size
    }
}
