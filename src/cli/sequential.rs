use std::sync::Arc;

use clap::Parser;
use log::info;

use crate::cli::{CorpusOptions, SubCommandExtend};
use crate::config::Opts;
use crate::pairing::{PairGenerator, SequentialPairGenerator, SequentialPairingOptions};

#[derive(Parser, Debug, Clone)]
pub struct SequentialCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub options: SequentialPairingOptions,
}

impl SubCommandExtend for SequentialCommand {
    fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let corpus = Arc::new(self.corpus.load()?);
        let mut generator = SequentialPairGenerator::new(self.options.clone(), corpus.clone())?;
        let pairs = generator.all_pairs();
        info!("建议的特征缓存容量: {}", self.options.cache_size());
        self.corpus.write_pairs(&*corpus, &pairs)
    }
}
