//! 基于视觉词表检索的配对
//!
//! 分为两个阶段：先把全部图片的描述子阻塞式地加入视觉索引（单写），
//! 然后把查询分发到固定大小的工作线程池（多读）。查询结果带着单调递增的
//! 提交序号经有界通道送回，消费端用重排缓冲严格按提交顺序交付，
//! 工作线程的调度顺序不会泄漏到可观测的输出中

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, ensure};
use crossbeam_channel::{Receiver, Sender, bounded};
use indicatif::ProgressBar;
use log::{info, warn};
use ndarray::{Array2, s};

use crate::corpus::Corpus;
use crate::index::{BowVisualIndex, ImageScore, QueryOptions, VisualIndex};
use crate::pairing::{PairGenerator, VocabTreePairingOptions, effective_num_threads};
use crate::types::{ImageId, ImagePair};
use crate::utils::pb_style;

/// 单个查询的检索结果
struct Retrieval {
    image_id: ImageId,
    scores: Vec<ImageScore>,
}

struct QueryJob {
    seq: usize,
    image_id: ImageId,
    descriptors: Array2<u8>,
}

/// 固定大小的检索线程池
///
/// 任务与结果通道都有界，队列占满时提交方阻塞（背压），
/// 析构时关闭任务通道并等待全部工作线程退出
struct QueryPipeline {
    job_tx: Option<Sender<QueryJob>>,
    result_rx: Option<Receiver<(usize, Retrieval)>>,
    workers: Vec<JoinHandle<()>>,
}

impl QueryPipeline {
    fn spawn(
        index: Arc<dyn VisualIndex>,
        query_options: QueryOptions,
        num_threads: usize,
        capacity: usize,
    ) -> Self {
        let (job_tx, job_rx) = bounded::<QueryJob>(capacity);
        let (result_tx, result_rx) = bounded::<(usize, Retrieval)>(capacity);

        let mut workers = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let index = index.clone();
            let query_options = query_options.clone();
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    // 单个查询失败只影响它自己：告警并交付空结果，流水线继续
                    let scores = match index.query(job.descriptors.view(), &query_options) {
                        Ok(scores) => scores,
                        Err(e) => {
                            warn!("图片 {} 检索失败: {e:#}", job.image_id);
                            vec![]
                        }
                    };
                    let retrieval = Retrieval { image_id: job.image_id, scores };
                    if result_tx.send((job.seq, retrieval)).is_err() {
                        break;
                    }
                }
            }));
        }

        Self { job_tx: Some(job_tx), result_rx: Some(result_rx), workers }
    }

    fn submit(&self, job: QueryJob) {
        self.job_tx.as_ref().unwrap().send(job).unwrap();
    }

    fn recv(&self) -> (usize, Retrieval) {
        self.result_rx.as_ref().unwrap().recv().expect("检索工作线程意外退出")
    }
}

impl Drop for QueryPipeline {
    fn drop(&mut self) {
        // 先关闭两端通道让工作线程退出，再逐个 join
        self.job_tx.take();
        self.result_rx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// 视觉检索策略
pub struct VocabTreePairGenerator<C: Corpus> {
    corpus: Arc<C>,
    query_options: QueryOptions,
    max_num_features: i64,
    query_image_ids: Vec<ImageId>,
    pipeline: QueryPipeline,
    /// 流水线允许的在途查询上限
    capacity: usize,
    /// 乱序完成结果的重排缓冲，键为提交序号
    reorder: HashMap<usize, Retrieval>,
    /// 下一个可用的提交序号，跨 reset 单调递增
    next_seq: usize,
    /// 本轮第一个查询的序号
    base_seq: usize,
    query_idx: usize,
    result_idx: usize,
}

impl<C: Corpus> VocabTreePairGenerator<C> {
    /// 从配置的词表路径构建索引并创建 generator
    ///
    /// `query_image_ids` 为空时，查询集合取 `match_list_path` 里列出的图片，
    /// 两者都缺省则查询全部图片
    pub fn new(
        options: VocabTreePairingOptions,
        corpus: Arc<C>,
        query_image_ids: Vec<ImageId>,
    ) -> Result<Self> {
        options.check()?;
        let vocab_tree_path = options
            .vocab_tree_path
            .as_ref()
            .context("视觉检索配对必须提供 vocab_tree_path")?;
        let mut index = BowVisualIndex::open(vocab_tree_path)?;

        // 阻塞式索引阶段，必须在任何查询之前完成
        let image_ids = corpus.image_ids();
        ensure!(image_ids.len() >= 2, "视觉检索配对至少需要 2 张图片");
        info!("索引 {} 张图片", image_ids.len());
        let pb = ProgressBar::new(image_ids.len() as u64).with_style(pb_style());
        for &image_id in &image_ids {
            match corpus.descriptors(image_id) {
                Ok(descriptors) => {
                    let descriptors =
                        top_scale_descriptors(descriptors, options.max_num_features);
                    index.add(image_id, descriptors.view())?;
                }
                Err(e) => warn!("图片 {} 未参与索引: {e:#}", image_id),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        Self::with_index(options, corpus, Arc::new(index), query_image_ids)
    }

    /// 在一个已经完成索引的视觉索引上创建 generator
    pub fn with_index(
        options: VocabTreePairingOptions,
        corpus: Arc<C>,
        index: Arc<dyn VisualIndex>,
        query_image_ids: Vec<ImageId>,
    ) -> Result<Self> {
        options.check()?;
        let query_image_ids = resolve_query_image_ids(&options, &*corpus, query_image_ids)?;
        if query_image_ids.is_empty() {
            warn!("视觉检索配对的查询集合为空");
        }

        let query_options = QueryOptions {
            max_num_images: options.num_images,
            num_neighbors: options.num_nearest_neighbors,
            num_checks: options.num_checks,
            num_images_after_verification: options.num_images_after_verification,
        };
        let num_threads = effective_num_threads(options.num_threads);
        let capacity = 2 * num_threads;
        let pipeline = QueryPipeline::spawn(index, query_options.clone(), num_threads, capacity);

        Ok(Self {
            corpus,
            query_options,
            max_num_features: options.max_num_features,
            query_image_ids,
            pipeline,
            capacity,
            reorder: HashMap::new(),
            next_seq: 0,
            base_seq: 0,
            query_idx: 0,
            result_idx: 0,
        })
    }

    /// 向流水线补充查询，直到在途数量达到上限或查询耗尽
    fn fill_pipeline(&mut self) {
        while self.query_idx < self.query_image_ids.len()
            && self.query_idx - self.result_idx < self.capacity
        {
            let image_id = self.query_image_ids[self.query_idx];
            let seq = self.next_seq;
            self.next_seq += 1;
            self.query_idx += 1;
            match self.corpus.descriptors(image_id) {
                Ok(descriptors) => {
                    let descriptors = top_scale_descriptors(descriptors, self.max_num_features);
                    self.pipeline.submit(QueryJob { seq, image_id, descriptors });
                }
                Err(e) => {
                    // 读不到描述子的查询直接以空结果入重排缓冲，保持序号连续
                    warn!("无法读取图片 {} 的描述子: {e:#}", image_id);
                    self.reorder.insert(seq, Retrieval { image_id, scores: vec![] });
                }
            }
        }
    }

    /// 阻塞等待按提交顺序的下一个检索结果
    fn recv_in_order(&mut self) -> Retrieval {
        let expected = self.base_seq + self.result_idx;
        loop {
            if let Some(retrieval) = self.reorder.remove(&expected) {
                return retrieval;
            }
            let (seq, retrieval) = self.pipeline.recv();
            self.reorder.insert(seq, retrieval);
        }
    }
}

impl<C: Corpus> PairGenerator for VocabTreePairGenerator<C> {
    fn reset(&mut self) {
        // 排空在途查询，避免上一轮的结果污染下一轮
        while self.result_idx < self.query_idx {
            let _ = self.recv_in_order();
            self.result_idx += 1;
        }
        self.reorder.clear();
        self.base_seq = self.next_seq;
        self.query_idx = 0;
        self.result_idx = 0;
    }

    fn has_finished(&self) -> bool {
        self.result_idx >= self.query_image_ids.len()
    }

    fn next_batch(&mut self) -> Vec<ImagePair> {
        while !self.has_finished() {
            self.fill_pipeline();
            let retrieval = self.recv_in_order();
            self.result_idx += 1;

            // 空间验证裁剪在消费线程上同步完成
            let limit = match self.query_options.num_images_after_verification {
                0 => retrieval.scores.len(),
                n => n.min(retrieval.scores.len()),
            };
            let mut pairs = Vec::with_capacity(limit);
            for score in &retrieval.scores[..limit] {
                if score.image_id != retrieval.image_id {
                    pairs.push((retrieval.image_id, score.image_id));
                }
            }
            if !pairs.is_empty() {
                return pairs;
            }
        }
        vec![]
    }
}

/// 确定查询集合：显式列表 > match_list_path > 全部图片
fn resolve_query_image_ids<C: Corpus>(
    options: &VocabTreePairingOptions,
    corpus: &C,
    query_image_ids: Vec<ImageId>,
) -> Result<Vec<ImageId>> {
    if !query_image_ids.is_empty() {
        return Ok(query_image_ids);
    }
    let Some(match_list_path) = &options.match_list_path else {
        return Ok(corpus.image_ids());
    };

    let content = fs::read_to_string(match_list_path)
        .with_context(|| format!("无法读取查询图片列表 {}", match_list_path.display()))?;
    let mut ids = vec![];
    for (lineno, line) in content.lines().enumerate() {
        let name = line.trim();
        if name.is_empty() || name.starts_with('#') {
            continue;
        }
        match corpus.find_image_id(name) {
            Some(id) => ids.push(id),
            None => warn!("第 {} 行的图片名未知，已跳过: {}", lineno + 1, name),
        }
    }
    Ok(ids)
}

/// 按尺度截取参与索引或查询的描述子行数
fn top_scale_descriptors(descriptors: Array2<u8>, max_num_features: i64) -> Array2<u8> {
    if max_num_features > 0 && descriptors.nrows() > max_num_features as usize {
        descriptors.slice_move(s![..max_num_features as usize, ..])
    } else {
        descriptors
    }
}
