//! Tag - event sink のメッセージに付けるキュー名（複数キューで sink を共有できる）

use rand::Rng;

/// 生成する tag の長さ
pub const DEFAULT_TAG_LEN: usize = 12;

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// `len` 文字のランダムな英字 tag
pub fn random_tag(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}
