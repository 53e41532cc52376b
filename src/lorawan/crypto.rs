//! FRMPayload keystream cipher
//!
//! LoRaWAN encrypts FRMPayload with AES-128 in a counter-style mode: each
//! 16-byte block of payload is XORed with `AES(key, A_i)` where
//!
//!   A_i = 0x01 | 0x00 x4 | Dir | DevAddr(4,LE) | FCnt(4,LE) | 0x00 | i
//!
//! Applying the keystream twice yields the input, so the same function
//! both encrypts and decrypts.
//!
//! Only the 16-bit FCnt observed on the wire is used; the upper two bytes of
//! the counter field in A_i stay zero. Captures depend on this exact keying.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

/// Direction byte of the A_i block
const DIRECTION: u8 = 0x00;

/// XOR `payload` with the LoRaWAN keystream derived from `key`, `dev_addr`
/// and `fcnt`.
pub fn apply_keystream(key: &[u8; 16], dev_addr: u32, fcnt: u16, payload: &[u8]) -> Vec<u8> {
    if payload.is_empty() {
        return Vec::new();
    }

    let cipher = Aes128::new(key.into());
    let mut output = payload.to_vec();

    for (index, chunk) in output.chunks_mut(16).enumerate() {
        let mut block = a_block(dev_addr, fcnt, index + 1);
        cipher.encrypt_block(&mut block);
        for (byte, s) in chunk.iter_mut().zip(block.iter()) {
            *byte ^= s;
        }
    }

    output
}

/// Decrypt an FRMPayload; identical to [`apply_keystream`].
pub fn decrypt_frm_payload(key: &[u8; 16], dev_addr: u32, fcnt: u16, payload: &[u8]) -> Vec<u8> {
    apply_keystream(key, dev_addr, fcnt, payload)
}

/// Encrypt an FRMPayload; identical to [`apply_keystream`].
pub fn encrypt_frm_payload(key: &[u8; 16], dev_addr: u32, fcnt: u16, payload: &[u8]) -> Vec<u8> {
    apply_keystream(key, dev_addr, fcnt, payload)
}

fn a_block(dev_addr: u32, fcnt: u16, block_index: usize) -> Block {
    let mut a = Block::default();
    a[0] = 0x01;
    a[5] = DIRECTION;
    a[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    a[10..14].copy_from_slice(&u32::from(fcnt).to_le_bytes());
    a[15] = (block_index & 0xFF) as u8;
    a
}
