mod exhaustive;
mod imported;
mod sequential;
mod spatial;
mod transitive;
mod vocab_tree;

use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
pub use exhaustive::*;
pub use imported::*;
use log::info;
pub use sequential::*;
pub use spatial::*;
pub use transitive::*;
pub use vocab_tree::*;

use crate::config::Opts;
use crate::corpus::{Corpus, MemoryCorpus};
use crate::types::ImagePair;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> anyhow::Result<()>;
}

/// 所有子命令共享的语料库输入与结果输出参数
#[derive(Args, Debug, Clone)]
pub struct CorpusOptions {
    /// 语料库描述文件路径
    #[arg(long, value_name = "PATH")]
    pub corpus: PathBuf,
    /// 图片对输出文件，缺省时写到标准输出
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl CorpusOptions {
    pub fn load(&self) -> Result<MemoryCorpus> {
        MemoryCorpus::load_json(&self.corpus)
    }

    /// 把图片对以每行 `name1 name2` 的形式写出
    pub fn write_pairs<C: Corpus>(&self, corpus: &C, pairs: &[ImagePair]) -> Result<()> {
        info!("共生成 {} 对候选图片", pairs.len());
        let mut writer: BufWriter<Box<dyn Write>> = match &self.output {
            Some(path) => {
                let file = File::create(path)
                    .with_context(|| format!("无法创建输出文件 {}", path.display()))?;
                BufWriter::new(Box::new(file))
            }
            None => BufWriter::new(Box::new(stdout())),
        };
        for &(a, b) in pairs {
            writeln!(writer, "{} {}", corpus.image_name(a)?, corpus.image_name(b)?)?;
        }
        writer.flush()?;
        Ok(())
    }
}
