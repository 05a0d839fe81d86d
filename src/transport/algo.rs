//! SSH algorithm preferences for NE8000-class devices.
//!
//! Carrier routers commonly run VRP images whose SSH stacks predate the
//! modern default algorithm sets, so the tables below keep the legacy
//! Diffie-Hellman groups, CBC ciphers and SHA-1 MACs enabled alongside the
//! current algorithms.

use std::borrow::Cow;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{Preferred, cipher, compression, kex, mac};

/// Key exchange algorithms in order of preference.
pub const DEVICE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::DH_GEX_SHA256,
    kex::DH_GEX_SHA1,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
];

/// Ciphers in order of preference, CTR/GCM first, legacy CBC last.
pub const DEVICE_CIPHERS: &[cipher::Name] = &[
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

/// MAC algorithms, ETM variants preferred.
pub const DEVICE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

/// Compression methods. VRP devices usually negotiate none.
pub const DEVICE_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

/// Host key algorithms, including RSA/DSA for older images.
pub const DEVICE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

/// Algorithm preference set handed to the SSH client configuration.
pub fn preferred() -> Preferred {
    Preferred {
        kex: Cow::Borrowed(DEVICE_KEX_ORDER),
        key: Cow::Borrowed(DEVICE_KEY_TYPES),
        cipher: Cow::Borrowed(DEVICE_CIPHERS),
        mac: Cow::Borrowed(DEVICE_MAC_ALGORITHMS),
        compression: Cow::Borrowed(DEVICE_COMPRESSION_ALGORITHMS),
    }
}
