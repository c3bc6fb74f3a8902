use clap::Parser;
use log::info;

use crate::cli::{CorpusOptions, SubCommandExtend};
use crate::config::Opts;
use crate::pairing::{PairGenerator, TransitivePairGenerator, TransitivePairingOptions};

#[derive(Parser, Debug, Clone)]
pub struct TransitiveCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub options: TransitivePairingOptions,
}

impl SubCommandExtend for TransitiveCommand {
    fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let corpus = self.corpus.load()?;
        let mut generator = TransitivePairGenerator::new(self.options.clone(), &corpus)?;
        let pairs = generator.all_pairs();
        info!("建议的特征缓存容量: {}", self.options.cache_size());
        self.corpus.write_pairs(&corpus, &pairs)
    }
}
