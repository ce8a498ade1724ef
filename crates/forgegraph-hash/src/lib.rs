//! Hashing primitives used throughout the graph engine.
//!
//! Two independent concerns live here: a fast 64-bit hasher used to key the
//! concurrent sharded map (`forgegraph-shard-map`), and a set of
//! consistent-hashing helpers used to place content digests onto the 32-bit
//! keyspace that cache cluster nodes partition among themselves
//! (`forgegraph-cache-cluster`). Clients and servers in a cluster must agree
//! bit-exactly on the functions in this module.
//!
//! This is the one crate in the workspace that does not forbid unsafe code:
//! [`hex_encode_u64`] below uses one verified `unsafe` block to avoid a heap
//! allocation on a hot path. Every other crate forbids it.

/// Hashes a byte slice with a fast, non-cryptographic 64-bit hash, suitable
/// for keying the sharded map. Not used for content addressing.
pub fn key_hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, 0)
}

/// Hex-encodes a `u64` into a fixed 16-byte stack buffer, returning a `&str`.
/// Avoids the heap allocation `hex::encode` would perform for this common
/// case.
pub fn hex_encode_u64(value: u64, buf: &mut [u8; 16]) -> &str {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let bytes = value.to_be_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        buf[i * 2] = HEX_CHARS[(b >> 4) as usize];
        buf[i * 2 + 1] = HEX_CHARS[(b & 0x0f) as usize];
    }
    // SAFETY: buf is filled with ASCII hex characters only, which is valid
    // UTF-8 by construction.
    unsafe { std::str::from_utf8_unchecked(buf) }
}

/// Hex-encodes a 64-bit key hash without an intermediate allocation beyond
/// the returned `String`.
pub fn key_hash64_hex(bytes: &[u8]) -> String {
    let mut buf = [0u8; 16];
    hex_encode_u64(key_hash64(bytes), &mut buf).to_owned()
}

/// Maps node index `i` of `n` cluster nodes onto `[0, 2^32)`.
///
/// `n` must be non-zero; arcs `[hash_point(i, n), hash_point(i + 1, n))` for
/// `i` in `0..n` are contiguous and together cover the keyspace (the final
/// arc's upper bound is `2^32 - 1` only when `n` evenly divides `u32::MAX`;
/// otherwise the last few keyspace values are folded into the final arc by
/// the caller, which always treats `hash_point(n, n)` as `u32::MAX`).
pub fn hash_point(i: u32, n: u32) -> u32 {
    assert!(n > 0, "hash_point: n must be non-zero");
    if i >= n {
        return u32::MAX;
    }
    let step = u32::MAX as u64 / n as u64;
    (i as u64 * step) as u32
}

/// Reads the first four little-endian bytes of a content digest as a `u32`.
///
/// Panics if `bytes` has fewer than four bytes; content digests used for
/// cache cluster routing (sha1, or blake3 truncated per configuration) are
/// always at least 20 bytes, so this is a precondition violation rather than
/// routine input.
pub fn hash(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

/// Offsets `hash(bytes)` by flipping its top bit (equivalent to `+ 2^31 mod
/// 2^32` since the addend has only its top bit set and cannot carry into the
/// lower 31 bits). This exact arithmetic — XOR of the top bit rather than a
/// generic modular add — is load-bearing: cluster peers implemented in other
/// languages replicate artifacts to whichever peer owns this alternate slot,
/// and any deviation desyncs replication routing.
pub fn alternate_hash(bytes: &[u8]) -> u32 {
    hash(bytes) ^ 0x8000_0000
}
