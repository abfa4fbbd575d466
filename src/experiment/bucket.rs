//! Deterministic user-to-bucket hashing.
//!
//! Routing and intra-layer traffic splits both reduce to hashing the user id
//! together with the id of the containing entity (room or group). The mapping
//! must be bit-exact across processes and restarts so that a user lands in
//! the same bucket on every replica.

use sha1::{Digest, Sha1};

/// Map `uid` into `[0, bucket_count)` using the salt of the containing entity.
///
/// The hash input is `"{uid}_{salt}"`; the first four digest bytes are read
/// big-endian and reduced modulo `bucket_count`.
pub fn bucket_of(uid: &str, salt: i64, bucket_count: u32) -> u32 {
    if bucket_count == 0 {
        return 0;
    }
    let digest = Sha1::digest(format!("{}_{}", uid, salt).as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    head % bucket_count
}
