//! Hash engines used by the wire protocol: SHA-1, SHA-256, SHA-512,
//! RIPEMD-160, HMAC-SHA-256, HMAC-SHA-512, and the double-SHA-256 digest
//! used for payload checksums and identifiers.
//!
//! Each engine wraps the equivalent RustCrypto crate (`sha1`, `sha2`,
//! `ripemd`, `hmac`) behind the streaming `init`/`update`/`finalize` shape;
//! none of the compression functions are hand-rolled.

mod pool;

use hmac::{Hmac, Mac};
use ripemd::Ripemd160;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

/// First four bytes of `double_sha256(&[])`, known at compile time so the
/// framing layer can validate a zero-length payload's checksum without
/// hashing an empty slice on every such message.
pub const EMPTY_PAYLOAD_CHECKSUM: [u8; 4] = [0x5d, 0xf6, 0xe0, 0xe2];

macro_rules! digest_engine {
    ($name:ident, $inner:ty, $out:literal, $local:ident, $acquire:ident, $release:ident) => {
        #[derive(Default)]
        pub struct $name($inner);

        impl $name {
            pub fn init() -> Self {
                Self::default()
            }

            pub fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.0, data);
            }

            pub fn finalize(self) -> [u8; $out] {
                self.0.finalize().into()
            }

            /// Finalizes and resets internal state in one step, so the
            /// engine can be returned to its pool instead of dropped.
            pub fn finalize_reset(&mut self) -> [u8; $out] {
                Digest::finalize_reset(&mut self.0).into()
            }
        }

        pool::engine_pool!($local, $acquire, $release, $name);
    };
}

digest_engine!(Sha1Engine, Sha1, 20, SHA1_POOL, acquire_sha1, release_sha1);
digest_engine!(Sha256Engine, Sha256, 32, SHA256_POOL, acquire_sha256, release_sha256);
digest_engine!(Sha512Engine, Sha512, 64, SHA512_POOL, acquire_sha512, release_sha512);
digest_engine!(Ripemd160Engine, Ripemd160, 20, RIPEMD160_POOL, acquire_ripemd160, release_ripemd160);

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub struct HmacSha256Engine(HmacSha256);

impl HmacSha256Engine {
    pub fn init(key: &[u8]) -> Self {
        HmacSha256Engine(HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length"))
    }

    pub fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.0, data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into_bytes().into()
    }
}

pub struct HmacSha512Engine(HmacSha512);

impl HmacSha512Engine {
    pub fn init(key: &[u8]) -> Self {
        HmacSha512Engine(HmacSha512::new_from_slice(key).expect("HMAC accepts keys of any length"))
    }

    pub fn update(&mut self, data: &[u8]) {
        Mac::update(&mut self.0, data);
    }

    pub fn finalize(self) -> [u8; 64] {
        self.0.finalize().into_bytes().into()
    }
}

/// SHA-256 composed with itself: `sha256(sha256(input))`.
///
/// Pulls a pooled [`Sha256Engine`] for each of the two passes rather than
/// allocating fresh hasher state, since this runs on every inbound and
/// outbound message.
pub fn double_sha256(input: &[u8]) -> [u8; 32] {
    let mut engine = acquire_sha256();
    engine.update(input);
    let first_digest = engine.finalize_reset();

    engine.update(&first_digest);
    let digest = engine.finalize_reset();

    release_sha256(engine);
    digest
}

/// The first four bytes of [`double_sha256`], used as the payload checksum
/// in message headers.
pub fn checksum4(payload: &[u8]) -> [u8; 4] {
    if payload.is_empty() {
        return EMPTY_PAYLOAD_CHECKSUM;
    }
    let digest = double_sha256(payload);
    [digest[0], digest[1], digest[2], digest[3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn double_sha256_matches_known_vectors() {
        assert_eq!(
            double_sha256(b"hello"),
            hex!("9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50")
        );
    }

    #[test]
    fn empty_payload_checksum_matches_constant() {
        assert_eq!(checksum4(&[]), EMPTY_PAYLOAD_CHECKSUM);
        let digest = double_sha256(&[]);
        assert_eq!(&digest[..4], &EMPTY_PAYLOAD_CHECKSUM);
    }

    #[test]
    fn sha1_engine_matches_known_vector() {
        let mut engine = Sha1Engine::init();
        engine.update(b"abc");
        assert_eq!(engine.finalize(), hex!("a9993e364706816aba3e25717850c26c9cd0d89"));
    }

    #[test]
    fn hmac_sha256_is_deterministic_for_same_key() {
        let mut a = HmacSha256Engine::init(b"key");
        a.update(b"message");
        let mut b = HmacSha256Engine::init(b"key");
        b.update(b"message");
        assert_eq!(a.finalize(), b.finalize());
    }
}
