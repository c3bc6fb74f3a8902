//! 基础标识符类型与图片对的规范编码

/// 图片在语料库中的唯一标识
pub type ImageId = u32;

/// 帧的唯一标识，一帧对应同一时刻由多相机拍摄的一组图片
pub type FrameId = u32;

/// 一对待匹配的候选图片，语义上无序，两端保证不相等
pub type ImagePair = (ImageId, ImageId);

/// 单个语料库允许的最大图片数量，保证 pair_id 编码不会碰撞
pub const MAX_NUM_IMAGES: u64 = i32::MAX as u64;

/// 将无序图片对编码为与顺序无关的规范 id
///
/// 所有需要去重的策略都以该 id 作为哈希集合的键
#[inline]
pub fn pair_id(a: ImageId, b: ImageId) -> u64 {
    debug_assert!((a as u64) < MAX_NUM_IMAGES && (b as u64) < MAX_NUM_IMAGES);
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    lo as u64 * MAX_NUM_IMAGES + hi as u64
}

/// `pair_id` 的逆变换，返回 (min, max)
#[inline]
pub fn pair_from_id(id: u64) -> ImagePair {
    ((id / MAX_NUM_IMAGES) as ImageId, (id % MAX_NUM_IMAGES) as ImageId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_id_order_independent() {
        assert_eq!(pair_id(3, 7), pair_id(7, 3));
        assert_ne!(pair_id(3, 7), pair_id(3, 8));
    }

    #[test]
    fn test_pair_id_roundtrip() {
        for (a, b) in [(0, 1), (1, 2), (42, 7), (1000000, 999999)] {
            let (lo, hi) = pair_from_id(pair_id(a, b));
            assert_eq!((lo, hi), (a.min(b), a.max(b)));
        }
    }

    #[test]
    fn test_pair_id_no_collision_near_boundary() {
        let max = (MAX_NUM_IMAGES - 1) as ImageId;
        assert_ne!(pair_id(0, max), pair_id(1, 1));
        let (lo, hi) = pair_from_id(pair_id(max, max - 1));
        assert_eq!((lo, hi), (max - 1, max));
    }
}
