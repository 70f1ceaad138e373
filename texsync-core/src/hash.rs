use sha1::{Digest, Sha1};

/// Git blob object id of `content` (`sha1("blob <len>\0" ++ content)`).
pub fn blob_sha1(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    hex::encode(hasher.finalize())
}
