//! The per-packet crypto envelope.
//!
//! Every wire datagram is `nonce ‖ tag ‖ ciphertext`, exactly [`OVERHEAD_LEN`]
//! bytes larger than the plaintext IP packet it carries. The envelope operates
//! on the shared packet-buffer layout: plaintext lives at `ZERO_BYTES..`, wire
//! bytes at `PACKET_OFFSET..`, and the regions for nonce and tag fill the gap
//! in between.

use chacha20poly1305::aead::{AeadInPlace as _, OsRng};
use chacha20poly1305::{AeadCore as _, ChaCha20Poly1305, Key, KeyInit as _, Nonce, Tag};
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Fixed per-packet overhead of the envelope.
pub const OVERHEAD_LEN: usize = NONCE_LEN + TAG_LEN;

/// Length of the scratch prefix both packet buffers carry.
///
/// The first `ZERO_BYTES` of each buffer are zeroed once at allocation;
/// plaintext always starts at this offset.
pub const ZERO_BYTES: usize = 32;

/// Offset of the first wire byte within a packet buffer.
pub const PACKET_OFFSET: usize = ZERO_BYTES - OVERHEAD_LEN;

const _: () = assert!(OVERHEAD_LEN > 0);
const _: () = assert!(PACKET_OFFSET + NONCE_LEN + TAG_LEN == ZERO_BYTES);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The plaintext exceeds what a single datagram can carry.
    #[error("plaintext exceeds the sealable size")]
    Oversize,
    /// The datagram failed to authenticate: corrupted, truncated or sealed
    /// with a different password.
    #[error("failed to authenticate datagram")]
    Auth,
}

/// The symmetric cipher shared by both ends of the tunnel.
pub struct Envelope {
    cipher: ChaCha20Poly1305,
}

impl Envelope {
    /// Derives the AEAD key from the shared password.
    pub fn new(password: &SecretString) -> Self {
        let key = Sha256::digest(password.expose_secret().as_bytes());

        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Seals one packet: plaintext is read from
    /// `input[ZERO_BYTES..ZERO_BYTES + plaintext_len]`, the wire datagram is
    /// written to `out[PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + plaintext_len]`.
    ///
    /// Uses a fresh random nonce per packet.
    pub fn seal(
        &self,
        out: &mut [u8],
        input: &[u8],
        plaintext_len: usize,
    ) -> Result<(), CryptoError> {
        let n = plaintext_len;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);

        out[ZERO_BYTES..ZERO_BYTES + n].copy_from_slice(&input[ZERO_BYTES..ZERO_BYTES + n]);
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, &[], &mut out[ZERO_BYTES..ZERO_BYTES + n])
            .map_err(|_| CryptoError::Oversize)?;

        out[PACKET_OFFSET..PACKET_OFFSET + NONCE_LEN].copy_from_slice(&nonce);
        out[PACKET_OFFSET + NONCE_LEN..ZERO_BYTES].copy_from_slice(&tag);

        Ok(())
    }

    /// Opens one packet: the wire datagram is read from
    /// `input[PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + plaintext_len]`,
    /// plaintext is written to `out[ZERO_BYTES..ZERO_BYTES + plaintext_len]`.
    ///
    /// The only failure is [`CryptoError::Auth`]; `out` holds no plaintext in
    /// that case.
    pub fn open(
        &self,
        out: &mut [u8],
        input: &[u8],
        plaintext_len: usize,
    ) -> Result<(), CryptoError> {
        let n = plaintext_len;
        let nonce = Nonce::from_slice(&input[PACKET_OFFSET..PACKET_OFFSET + NONCE_LEN]);
        let tag = Tag::from_slice(&input[PACKET_OFFSET + NONCE_LEN..ZERO_BYTES]);

        out[ZERO_BYTES..ZERO_BYTES + n].copy_from_slice(&input[ZERO_BYTES..ZERO_BYTES + n]);
        self.cipher
            .decrypt_in_place_detached(nonce, &[], &mut out[ZERO_BYTES..ZERO_BYTES + n], tag)
            .map_err(|_| CryptoError::Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(password: &str) -> Envelope {
        Envelope::new(&SecretString::from(password.to_owned()))
    }

    fn buffer(mtu: usize) -> Vec<u8> {
        vec![0u8; mtu + ZERO_BYTES]
    }

    #[test]
    fn roundtrip_restores_the_plaintext() {
        let envelope = envelope("hunter2");
        let packet = b"\x45\x00\x00\x28some icmp echo request padding..";

        let mut tun_buf = buffer(1400);
        let mut udp_buf = buffer(1400);
        tun_buf[ZERO_BYTES..ZERO_BYTES + packet.len()].copy_from_slice(packet);

        envelope.seal(&mut udp_buf, &tun_buf, packet.len()).unwrap();

        let mut out = buffer(1400);
        envelope.open(&mut out, &udp_buf, packet.len()).unwrap();

        assert_eq!(&out[ZERO_BYTES..ZERO_BYTES + packet.len()], packet);
    }

    #[test]
    fn wire_datagram_is_exactly_overhead_len_larger() {
        let envelope = envelope("hunter2");

        let mut tun_buf = buffer(1400);
        let mut udp_buf = buffer(1400);
        tun_buf[ZERO_BYTES..ZERO_BYTES + 40].fill(0xAB);

        envelope.seal(&mut udp_buf, &tun_buf, 40).unwrap();

        let wire = &udp_buf[PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + 40];
        assert_eq!(wire.len(), 40 + OVERHEAD_LEN);
    }

    #[test]
    fn tampering_with_any_wire_byte_fails_authentication() {
        let envelope = envelope("hunter2");
        let packet = b"tamper with me";

        let mut tun_buf = buffer(64);
        let mut udp_buf = buffer(64);
        tun_buf[ZERO_BYTES..ZERO_BYTES + packet.len()].copy_from_slice(packet);
        envelope.seal(&mut udp_buf, &tun_buf, packet.len()).unwrap();

        for i in PACKET_OFFSET..PACKET_OFFSET + OVERHEAD_LEN + packet.len() {
            let mut tampered = udp_buf.clone();
            tampered[i] ^= 0x01;

            let mut out = buffer(64);
            assert_eq!(
                envelope.open(&mut out, &tampered, packet.len()),
                Err(CryptoError::Auth),
                "flipping wire byte {i} must not authenticate",
            );
        }
    }

    #[test]
    fn wrong_password_fails_authentication() {
        let alice = envelope("a");
        let bob = envelope("b");

        let mut tun_buf = buffer(64);
        let mut udp_buf = buffer(64);
        tun_buf[ZERO_BYTES..ZERO_BYTES + 10].fill(0x42);
        alice.seal(&mut udp_buf, &tun_buf, 10).unwrap();

        let mut out = buffer(64);
        assert_eq!(bob.open(&mut out, &udp_buf, 10), Err(CryptoError::Auth));
    }

    #[test]
    fn nonces_are_fresh_per_packet() {
        let envelope = envelope("hunter2");

        let mut tun_buf = buffer(64);
        tun_buf[ZERO_BYTES..ZERO_BYTES + 10].fill(0x42);

        let mut first = buffer(64);
        let mut second = buffer(64);
        envelope.seal(&mut first, &tun_buf, 10).unwrap();
        envelope.seal(&mut second, &tun_buf, 10).unwrap();

        assert_ne!(
            first[PACKET_OFFSET..PACKET_OFFSET + NONCE_LEN],
            second[PACKET_OFFSET..PACKET_OFFSET + NONCE_LEN],
        );
    }

    #[test]
    fn empty_packets_roundtrip() {
        let envelope = envelope("hunter2");

        let tun_buf = buffer(64);
        let mut udp_buf = buffer(64);
        envelope.seal(&mut udp_buf, &tun_buf, 0).unwrap();

        let mut out = buffer(64);
        envelope.open(&mut out, &udp_buf, 0).unwrap();
    }
}
