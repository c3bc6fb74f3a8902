use std::sync::Arc;

use clap::Parser;
use log::info;

use crate::cli::{CorpusOptions, SubCommandExtend};
use crate::config::Opts;
use crate::pairing::{PairGenerator, VocabTreePairGenerator, VocabTreePairingOptions};

#[derive(Parser, Debug, Clone)]
pub struct VocabTreeCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub options: VocabTreePairingOptions,
}

impl SubCommandExtend for VocabTreeCommand {
    fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let corpus = Arc::new(self.corpus.load()?);
        let mut generator =
            VocabTreePairGenerator::new(self.options.clone(), corpus.clone(), vec![])?;
        let pairs = generator.all_pairs();
        info!("建议的特征缓存容量: {}", self.options.cache_size());
        self.corpus.write_pairs(&*corpus, &pairs)
    }
}
