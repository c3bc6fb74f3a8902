use clap::Parser;
use log::info;

use crate::cli::{CorpusOptions, SubCommandExtend};
use crate::config::Opts;
use crate::pairing::{PairGenerator, SpatialPairGenerator, SpatialPairingOptions};

#[derive(Parser, Debug, Clone)]
pub struct SpatialCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub options: SpatialPairingOptions,
}

impl SubCommandExtend for SpatialCommand {
    fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let corpus = self.corpus.load()?;
        let mut generator = SpatialPairGenerator::new(self.options.clone(), &corpus)?;
        let pairs = generator.all_pairs();
        info!("建议的特征缓存容量: {}", self.options.cache_size());
        self.corpus.write_pairs(&corpus, &pairs)
    }
}
