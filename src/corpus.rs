//! 语料库元数据的只读访问边界
//!
//! 配对策略只通过 [`Corpus`] 读取图片 id、名称、位置先验、帧归属、
//! 描述子以及既有匹配对，绝不修改语料库本身。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use ndarray::Array2;
use ndarray_npy::read_npy;
use serde::Deserialize;

use crate::hamming::DESCRIPTOR_SIZE;
use crate::types::{FrameId, ImageId, ImagePair};

/// 语料库的只读访问接口
pub trait Corpus {
    /// 所有图片 id，顺序在单个 generator 的生命周期内保持稳定
    fn image_ids(&self) -> Vec<ImageId>;

    /// 图片名称
    fn image_name(&self, image_id: ImageId) -> Result<String>;

    /// 按名称查找图片 id
    fn find_image_id(&self, name: &str) -> Option<ImageId>;

    /// 图片所属的帧，没有 rig 元数据时为 None
    fn frame_id(&self, image_id: ImageId) -> Option<FrameId>;

    /// 图片的位置先验（如 GPS），可能缺失
    fn position_prior(&self, image_id: ImageId) -> Option<[f64; 3]>;

    /// 图片的二进制描述子矩阵，每行一个描述子，按检测尺度降序排列
    fn descriptors(&self, image_id: ImageId) -> Result<Array2<u8>>;

    /// 既有匹配图片对，作为传递闭包扩展的种子图
    fn matched_pairs(&self) -> Result<Vec<ImagePair>>;

    /// 按图片名排序的 id 列表，作为时序配对的顺序键
    fn ordered_image_ids(&self) -> Result<Vec<ImageId>> {
        let mut named = self
            .image_ids()
            .into_iter()
            .map(|id| Ok((self.image_name(id)?, id)))
            .collect::<Result<Vec<_>>>()?;
        named.sort();
        Ok(named.into_iter().map(|(_, id)| id).collect())
    }
}

enum DescriptorSource {
    None,
    Inline(Array2<u8>),
    File(PathBuf),
}

struct ImageEntry {
    id: ImageId,
    name: String,
    frame: Option<FrameId>,
    position: Option<[f64; 3]>,
    descriptors: DescriptorSource,
}

/// 内存中的语料库实现
///
/// 既可以在测试中逐步构建，也可以从 JSON 描述文件加载，
/// 描述子以每张图片一个 `.npy` 文件的形式外部存放
#[derive(Default)]
pub struct MemoryCorpus {
    images: Vec<ImageEntry>,
    by_id: HashMap<ImageId, usize>,
    by_name: HashMap<String, ImageId>,
    matched: Vec<ImagePair>,
}

#[derive(Deserialize)]
struct CorpusFile {
    images: Vec<CorpusImage>,
    #[serde(default)]
    matched_pairs: Vec<(ImageId, ImageId)>,
}

#[derive(Deserialize)]
struct CorpusImage {
    id: ImageId,
    name: String,
    #[serde(default)]
    frame: Option<FrameId>,
    #[serde(default)]
    position: Option<[f64; 3]>,
    #[serde(default)]
    descriptors: Option<PathBuf>,
}

impl MemoryCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 JSON 描述文件加载语料库，描述子路径相对于描述文件所在目录解析
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("无法读取语料库描述文件 {}", path.display()))?;
        let file: CorpusFile = serde_json::from_str(&content)
            .with_context(|| format!("语料库描述文件 {} 格式错误", path.display()))?;
        let base = path.parent().unwrap_or(Path::new("."));

        let mut corpus = Self::new();
        for image in file.images {
            corpus.add_image(image.id, &image.name)?;
            if let Some(frame) = image.frame {
                corpus.set_frame(image.id, frame);
            }
            if let Some(position) = image.position {
                corpus.set_position(image.id, position);
            }
            if let Some(descriptors) = image.descriptors {
                corpus.set_descriptor_file(image.id, base.join(descriptors));
            }
        }
        for (a, b) in file.matched_pairs {
            corpus.add_matched_pair(a, b);
        }
        Ok(corpus)
    }

    pub fn add_image(&mut self, id: ImageId, name: &str) -> Result<()> {
        ensure!(!self.by_id.contains_key(&id), "图片 id {} 重复", id);
        ensure!(!self.by_name.contains_key(name), "图片名 {} 重复", name);
        self.by_id.insert(id, self.images.len());
        self.by_name.insert(name.to_string(), id);
        self.images.push(ImageEntry {
            id,
            name: name.to_string(),
            frame: None,
            position: None,
            descriptors: DescriptorSource::None,
        });
        Ok(())
    }

    pub fn set_frame(&mut self, id: ImageId, frame: FrameId) {
        if let Some(&idx) = self.by_id.get(&id) {
            self.images[idx].frame = Some(frame);
        }
    }

    pub fn set_position(&mut self, id: ImageId, position: [f64; 3]) {
        if let Some(&idx) = self.by_id.get(&id) {
            self.images[idx].position = Some(position);
        }
    }

    pub fn set_descriptors(&mut self, id: ImageId, descriptors: Array2<u8>) {
        if let Some(&idx) = self.by_id.get(&id) {
            self.images[idx].descriptors = DescriptorSource::Inline(descriptors);
        }
    }

    pub fn set_descriptor_file(&mut self, id: ImageId, path: PathBuf) {
        if let Some(&idx) = self.by_id.get(&id) {
            self.images[idx].descriptors = DescriptorSource::File(path);
        }
    }

    pub fn add_matched_pair(&mut self, a: ImageId, b: ImageId) {
        self.matched.push((a, b));
    }

    fn entry(&self, image_id: ImageId) -> Result<&ImageEntry> {
        match self.by_id.get(&image_id) {
            Some(&idx) => Ok(&self.images[idx]),
            None => bail!("语料库中不存在图片 {}", image_id),
        }
    }
}

impl Corpus for MemoryCorpus {
    fn image_ids(&self) -> Vec<ImageId> {
        self.images.iter().map(|image| image.id).collect()
    }

    fn image_name(&self, image_id: ImageId) -> Result<String> {
        Ok(self.entry(image_id)?.name.clone())
    }

    fn find_image_id(&self, name: &str) -> Option<ImageId> {
        self.by_name.get(name).copied()
    }

    fn frame_id(&self, image_id: ImageId) -> Option<FrameId> {
        self.by_id.get(&image_id).and_then(|&idx| self.images[idx].frame)
    }

    fn position_prior(&self, image_id: ImageId) -> Option<[f64; 3]> {
        self.by_id.get(&image_id).and_then(|&idx| self.images[idx].position)
    }

    fn descriptors(&self, image_id: ImageId) -> Result<Array2<u8>> {
        let entry = self.entry(image_id)?;
        let descriptors = match &entry.descriptors {
            DescriptorSource::None => bail!("图片 {} 没有描述子", entry.name),
            DescriptorSource::Inline(descriptors) => descriptors.clone(),
            DescriptorSource::File(path) => read_npy(path)
                .with_context(|| format!("无法读取描述子文件 {}", path.display()))?,
        };
        ensure!(
            descriptors.ncols() == DESCRIPTOR_SIZE,
            "图片 {} 的描述子宽度应为 {} 字节，实际为 {}",
            entry.name,
            DESCRIPTOR_SIZE,
            descriptors.ncols()
        );
        Ok(descriptors)
    }

    fn matched_pairs(&self) -> Result<Vec<ImagePair>> {
        Ok(self.matched.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_image_rejected() {
        let mut corpus = MemoryCorpus::new();
        corpus.add_image(1, "a.jpg").unwrap();
        assert!(corpus.add_image(1, "b.jpg").is_err());
        assert!(corpus.add_image(2, "a.jpg").is_err());
    }

    #[test]
    fn test_ordered_image_ids_sorts_by_name() {
        let mut corpus = MemoryCorpus::new();
        corpus.add_image(3, "c.jpg").unwrap();
        corpus.add_image(1, "a.jpg").unwrap();
        corpus.add_image(2, "b.jpg").unwrap();
        assert_eq!(corpus.ordered_image_ids().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_missing_descriptors_is_error() {
        let mut corpus = MemoryCorpus::new();
        corpus.add_image(1, "a.jpg").unwrap();
        assert!(corpus.descriptors(1).is_err());
        assert!(corpus.descriptors(99).is_err());
    }
}
