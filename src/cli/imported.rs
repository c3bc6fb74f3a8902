use clap::Parser;
use log::info;

use crate::cli::{CorpusOptions, SubCommandExtend};
use crate::config::Opts;
use crate::pairing::{ImportedPairGenerator, ImportedPairingOptions, PairGenerator};

#[derive(Parser, Debug, Clone)]
pub struct ImportedCommand {
    #[command(flatten)]
    pub corpus: CorpusOptions,
    #[command(flatten)]
    pub options: ImportedPairingOptions,
}

impl SubCommandExtend for ImportedCommand {
    fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let corpus = self.corpus.load()?;
        let mut generator = ImportedPairGenerator::new(self.options.clone(), &corpus)?;
        let pairs = generator.all_pairs();
        info!("建议的特征缓存容量: {}", self.options.cache_size());
        self.corpus.write_pairs(&corpus, &pairs)
    }
}
