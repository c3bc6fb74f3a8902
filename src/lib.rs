pub mod cli;
pub mod config;
pub mod corpus;
pub mod hamming;
pub mod index;
pub mod pairing;
pub mod types;
pub mod utils;

pub use config::Opts;
pub use corpus::{Corpus, MemoryCorpus};
pub use pairing::PairGenerator;
