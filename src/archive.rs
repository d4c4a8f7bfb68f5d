//! Password-sealed export archives.
//!
//! Layout: `CGA1 | salt[16] | nonce[12] | ciphertext | tag[16]`. The header is
//! bound as AAD.
//!
//! The key is stretched from the password by [`KEY_ROUNDS`] chained SHA-256
//! passes, each over the previous digest, the salt and the password. This slows
//! offline guessing but is not memory-hard, so a short export password is still
//! weak against dedicated hardware.

use anyhow::{anyhow, Result};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

pub const ARCHIVE_MAGIC: &[u8; 4] = b"CGA1";
const KEY_DOMAIN: &[u8] = b"console-gate:archive:v1";
pub const KEY_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = ARCHIVE_MAGIC.len() + SALT_LEN + NONCE_LEN;

pub fn is_sealed(bytes: &[u8]) -> bool {
    bytes.len() >= HEADER_LEN + TAG_LEN && bytes.starts_with(ARCHIVE_MAGIC)
}

pub fn seal_archive(clear: &[u8], password: &[u8]) -> Result<Vec<u8>> {
    if password.is_empty() {
        return Err(anyhow!("archive password cannot be empty"));
    }
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    rand::thread_rng().fill_bytes(&mut nonce);

    let mut out = Vec::with_capacity(HEADER_LEN + clear.len() + TAG_LEN);
    out.extend_from_slice(ARCHIVE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);

    let mut key = derive_key(&salt, password);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let mut buffer = clear.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), &out[..HEADER_LEN], &mut buffer)
        .map_err(|_| anyhow!("archive encryption failed"));
    key.zeroize();
    let tag = tag?;

    out.extend_from_slice(&buffer);
    out.extend_from_slice(&tag);
    Ok(out)
}

pub fn open_archive(sealed: &[u8], password: &[u8]) -> Result<Vec<u8>> {
    if !is_sealed(sealed) {
        return Err(anyhow!("not a sealed archive"));
    }
    let (header, body) = sealed.split_at(HEADER_LEN);
    let salt = &header[ARCHIVE_MAGIC.len()..ARCHIVE_MAGIC.len() + SALT_LEN];
    let nonce = &header[ARCHIVE_MAGIC.len() + SALT_LEN..];
    let (ciphertext, tag) = body.split_at(body.len() - TAG_LEN);

    let mut key = derive_key(salt, password);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
    let mut clear = ciphertext.to_vec();
    let opened = cipher.decrypt_in_place_detached(
        Nonce::from_slice(nonce),
        header,
        &mut clear,
        Tag::from_slice(tag),
    );
    key.zeroize();
    opened.map_err(|_| anyhow!("archive authentication failed (wrong password?)"))?;
    Ok(clear)
}

fn derive_key(salt: &[u8], password: &[u8]) -> [u8; 32] {
    stretch_key(salt, password, KEY_ROUNDS)
}

fn stretch_key(salt: &[u8], password: &[u8], rounds: u32) -> [u8; 32] {
    let mut key: [u8; 32] = Sha256::new()
        .chain_update(KEY_DOMAIN)
        .chain_update(salt)
        .chain_update(password)
        .finalize()
        .into();
    for _ in 1..rounds {
        let next: [u8; 32] = Sha256::new()
            .chain_update(key)
            .chain_update(salt)
            .chain_update(password)
            .finalize()
            .into();
        key.zeroize();
        key = next;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_archive_opens_with_same_password() {
        let sealed = seal_archive(br#"{"items":["p1"]}"#, b"hunter2").unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(&sealed[..4], b"CGA1");
        let clear = open_archive(&sealed, b"hunter2").unwrap();
        assert_eq!(clear, br#"{"items":["p1"]}"#);
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = seal_archive(b"payload", b"right").unwrap();
        assert!(open_archive(&sealed, b"wrong").is_err());
    }

    #[test]
    fn tampered_header_fails() {
        let mut sealed = seal_archive(b"payload", b"pw").unwrap();
        sealed[5] ^= 0x01;
        assert!(open_archive(&sealed, b"pw").is_err());
    }

    #[test]
    fn salts_differ_between_seals() {
        let a = seal_archive(b"same", b"pw").unwrap();
        let b = seal_archive(b"same", b"pw").unwrap();
        assert_ne!(a[4..20], b[4..20]);
    }

    #[test]
    fn key_depends_on_every_round_and_the_salt() {
        let salt = [7u8; SALT_LEN];
        let key = derive_key(&salt, b"pw");
        assert_eq!(key, stretch_key(&salt, b"pw", KEY_ROUNDS));
        assert_ne!(key, stretch_key(&salt, b"pw", 1));
        assert_ne!(key, stretch_key(&salt, b"pw", KEY_ROUNDS - 1));
        assert_ne!(key, derive_key(&[8u8; SALT_LEN], b"pw"));
    }

    #[test]
    fn empty_password_is_rejected() {
        assert!(seal_archive(b"x", b"").is_err());
        assert!(open_archive(b"CGA1", b"pw").is_err());
    }
}
