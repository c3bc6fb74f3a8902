//! 二进制描述子的汉明距离计算

/// 描述子宽度，单位为字节，对应 256 位二进制描述子
pub const DESCRIPTOR_SIZE: usize = 32;

/// 计算两个 256 位描述子的汉明距离
#[inline(always)]
pub fn hamming(va: &[u8], vb: &[u8]) -> u32 {
    debug_assert_eq!(va.len(), DESCRIPTOR_SIZE);
    debug_assert_eq!(vb.len(), DESCRIPTOR_SIZE);
    let mut sum = 0;
    for (ca, cb) in va.chunks_exact(8).zip(vb.chunks_exact(8)) {
        let a = u64::from_le_bytes(ca.try_into().unwrap());
        let b = u64::from_le_bytes(cb.try_into().unwrap());
        sum += (a ^ b).count_ones();
    }
    sum
}

/// 在 words 中查找与 query 距离最小的 k 个描述子
///
/// 返回 (索引, 距离) 列表，按距离升序排列，距离相同时按索引升序，
/// 保证任何并列情况下结果都是确定的
pub fn knn_hamming(query: &[u8], words: &[u8], k: usize) -> Vec<(usize, u32)> {
    if k == 0 {
        return vec![];
    }
    let mut best: Vec<(u32, usize)> = Vec::with_capacity(k + 1);
    for (i, word) in words.chunks_exact(DESCRIPTOR_SIZE).enumerate() {
        let d = hamming(query, word);
        if best.len() == k {
            // 队列已满且不优于最差结果时跳过
            let &(worst_d, worst_i) = best.last().unwrap();
            if (d, i) >= (worst_d, worst_i) {
                continue;
            }
        }
        let pos = best.partition_point(|&e| e < (d, i));
        best.insert(pos, (d, i));
        best.truncate(k);
    }
    best.into_iter().map(|(d, i)| (i, d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_identical() {
        let va = [0u8; 32];
        let vb = [0u8; 32];
        assert_eq!(hamming(&va, &vb), 0);
    }

    #[test]
    fn test_hamming_all_different() {
        let va = [0u8; 32];
        let vb = [255u8; 32];
        assert_eq!(hamming(&va, &vb), 256);
    }

    #[test]
    fn test_hamming_single_bit() {
        let va = [0u8; 32];
        let mut vb = [0u8; 32];
        vb[17] = 0b0001_0000;
        assert_eq!(hamming(&va, &vb), 1);
    }

    #[test]
    fn test_knn_hamming_sorted_by_distance() {
        let query = [0u8; 32];
        // 三个单词，距离分别为 0、2、1
        let mut words = vec![0u8; 96];
        words[32] = 3;
        words[64] = 1;

        let result = knn_hamming(&query, &words, 3);
        assert_eq!(result, vec![(0, 0), (2, 1), (1, 2)]);
    }

    #[test]
    fn test_knn_hamming_tie_break_by_index() {
        let query = [0u8; 32];
        // 四个距离完全相同的单词，应该按索引升序返回前两个
        let words = vec![1u8; 128];
        let result = knn_hamming(&query, &words, 2);
        assert_eq!(result, vec![(0, 32), (1, 32)]);
    }

    #[test]
    fn test_knn_hamming_k_exceeds_words() {
        let query = [0u8; 32];
        let words = vec![255u8; 64];
        let result = knn_hamming(&query, &words, 5);
        assert_eq!(result.len(), 2);
    }
}
