use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use ndarray::Array2;
use ndarray_npy::write_npy;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

macro_rules! cargo_run {
    ($($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin("impair")?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

/// 写一个 4 张图片的语料库描述文件，可选位置先验与既有匹配
fn write_corpus(dir: &Path) -> Result<std::path::PathBuf> {
    let corpus = json!({
        "images": [
            {"id": 1, "name": "a.jpg", "position": [0.0, 0.0, 0.0]},
            {"id": 2, "name": "b.jpg", "position": [10.0, 0.0, 0.0]},
            {"id": 3, "name": "c.jpg", "position": [20.0, 0.0, 0.0]},
            {"id": 4, "name": "d.jpg", "position": [500.0, 0.0, 0.0]},
        ],
        "matched_pairs": [[1, 2], [2, 3]],
    });
    let path = dir.join("corpus.json");
    fs::write(&path, serde_json::to_string_pretty(&corpus)?)?;
    Ok(path)
}

#[test]
fn exhaustive_writes_all_pairs() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;
    let output = dir.path().join("pairs.txt");

    cargo_run!("exhaustive", "--corpus", &corpus, "-o", &output).success();

    let content = fs::read_to_string(&output)?;
    assert_eq!(content.lines().count(), 6);
    assert!(content.contains("a.jpg b.jpg"));
    assert!(content.contains("c.jpg d.jpg"));
    Ok(())
}

#[test]
fn exhaustive_rejects_bad_block_size() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;

    cargo_run!("exhaustive", "--corpus", &corpus, "--block-size", "1")
        .failure()
        .stderr(predicate::str::contains("block_size"));
    Ok(())
}

#[test]
fn spatial_respects_max_distance() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;
    let output = dir.path().join("pairs.txt");

    cargo_run!(
        "spatial",
        "--corpus",
        &corpus,
        "-o",
        &output,
        "--max-distance",
        "15"
    )
    .success();

    // 间距 10 的相邻图片配对，远处的 d.jpg 不出现
    let content = fs::read_to_string(&output)?;
    assert!(content.contains("a.jpg b.jpg"));
    assert!(!content.contains("d.jpg"));
    Ok(())
}

#[test]
fn transitive_expands_matches() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;
    let output = dir.path().join("pairs.txt");

    cargo_run!("transitive", "--corpus", &corpus, "-o", &output).success();

    let content = fs::read_to_string(&output)?;
    assert_eq!(content.trim(), "a.jpg c.jpg");
    Ok(())
}

#[test]
fn sequential_windows_by_name_order() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;
    let output = dir.path().join("pairs.txt");

    cargo_run!(
        "sequential",
        "--corpus",
        &corpus,
        "-o",
        &output,
        "--overlap",
        "1",
        "--quadratic-overlap",
        "false"
    )
    .success();

    let content = fs::read_to_string(&output)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["a.jpg b.jpg", "b.jpg c.jpg", "c.jpg d.jpg"]);
    Ok(())
}

#[test]
fn imported_replays_list() -> Result<()> {
    let dir = TempDir::new()?;
    let corpus = write_corpus(dir.path())?;
    let list = dir.path().join("list.txt");
    fs::write(&list, "a.jpg c.jpg\nb.jpg d.jpg\nnope.jpg a.jpg\n")?;
    let output = dir.path().join("pairs.txt");

    cargo_run!(
        "imported",
        "--corpus",
        &corpus,
        "-o",
        &output,
        "--match-list-path",
        &list
    )
    .success();

    let content = fs::read_to_string(&output)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec!["a.jpg c.jpg", "b.jpg d.jpg"]);
    Ok(())
}

#[test]
fn vocab_tree_end_to_end() -> Result<()> {
    let dir = TempDir::new()?;

    // 4 个视觉单词，每张图片的描述子落在不同的单词子集上
    let vocab: Array2<u8> = Array2::from_shape_fn((4, 32), |(i, _)| (i as u8) * 0x55);
    let vocab_path = dir.path().join("vocab.npy");
    write_npy(&vocab_path, &vocab)?;

    let mut images = vec![];
    for (id, name, byte) in [(1, "a.jpg", 0x00u8), (2, "b.jpg", 0x00), (3, "c.jpg", 0xFF)] {
        let descriptors = Array2::from_elem((8, 32), byte);
        let npy = dir.path().join(format!("{id}.npy"));
        write_npy(&npy, &descriptors)?;
        images.push(json!({"id": id, "name": name, "descriptors": format!("{id}.npy")}));
    }
    let corpus_path = dir.path().join("corpus.json");
    fs::write(&corpus_path, serde_json::to_string(&json!({"images": images}))?)?;

    let output = dir.path().join("pairs.txt");
    cargo_run!(
        "vocab-tree",
        "--corpus",
        &corpus_path,
        "-o",
        &output,
        "--vocab-tree-path",
        &vocab_path,
        "--num-images",
        "2"
    )
    .success();

    // 检索结果包含查询自身，保留 2 张意味着每个查询最多产出一对

    let content = fs::read_to_string(&output)?;
    let lines: Vec<&str> = content.lines().collect();
    assert!(lines.contains(&"a.jpg b.jpg"));
    assert!(lines.contains(&"b.jpg a.jpg"));
    assert!(!content.contains("c.jpg"), "孤立图片不应产出任何图片对");
    Ok(())
}
