use clap::{Parser, Subcommand};

use crate::cli::*;

#[derive(Parser, Debug, Clone)]
#[command(name = "impair", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 穷举全部图片组合
    Exhaustive(ExhaustiveCommand),
    /// 按拍摄顺序的时序窗口配对
    Sequential(SequentialCommand),
    /// 基于位置先验的空间近邻配对
    Spatial(SpatialCommand),
    /// 基于视觉词表检索的配对
    VocabTree(VocabTreeCommand),
    /// 在既有匹配上做传递闭包扩展
    Transitive(TransitiveCommand),
    /// 重放外部提供的图片对列表
    Imported(ImportedCommand),
}
