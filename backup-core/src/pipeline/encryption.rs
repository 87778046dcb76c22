//! AES-256-CBC file encryption.
//!
//! Output layout is `IV (16 bytes) || ciphertext`, with PKCS#7 padding on the
//! final block. Data is processed in `BUFFER_SIZE` chunks; the decryptor keeps
//! the last block back until EOF so the padding can be checked and stripped.

use super::BUFFER_SIZE;
use crate::utils::errors::{BackupError, Result};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

/// Encrypt `input` into `output` under a fresh random IV
pub async fn encrypt_file(key: &[u8; KEY_SIZE], input: &Path, output: &Path) -> Result<u64> {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    let mut cipher = Encryptor::new_from_slices(key, &iv)
        .map_err(|e| BackupError::Crypto(format!("cipher init: {}", e)))?;

    let mut reader = File::open(input).await?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(output).await?);
    writer.write_all(&iv).await?;

    let mut written = IV_SIZE as u64;
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(BUFFER_SIZE + BLOCK_SIZE);

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        let ready = pending.len() - pending.len() % BLOCK_SIZE;
        if ready > 0 {
            encrypt_blocks(&mut cipher, &mut pending[..ready]);
            writer.write_all(&pending[..ready]).await?;
            written += ready as u64;
            pending.drain(..ready);
        }
    }

    // PKCS#7: always pad, a full block when already aligned
    let pad = BLOCK_SIZE - pending.len();
    pending.resize(BLOCK_SIZE, pad as u8);
    encrypt_blocks(&mut cipher, &mut pending);
    writer.write_all(&pending).await?;
    written += BLOCK_SIZE as u64;

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

/// Reverse of [`encrypt_file`]
pub async fn decrypt_file(key: &[u8; KEY_SIZE], input: &Path, output: &Path) -> Result<u64> {
    let mut reader = File::open(input).await?;

    let mut iv = [0u8; IV_SIZE];
    reader.read_exact(&mut iv).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            BackupError::Crypto(format!("{}: missing IV", input.display()))
        } else {
            BackupError::Io(e)
        }
    })?;
    let mut cipher = Decryptor::new_from_slices(key, &iv)
        .map_err(|e| BackupError::Crypto(format!("cipher init: {}", e)))?;

    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(output).await?);
    let mut written = 0u64;
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(BUFFER_SIZE + BLOCK_SIZE);

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);

        // Hold back one full block (or the unaligned tail) for the EOF step
        let tail = match pending.len() % BLOCK_SIZE {
            0 => BLOCK_SIZE,
            r => r,
        };
        let ready = pending.len().saturating_sub(tail);
        if ready > 0 {
            decrypt_blocks(&mut cipher, &mut pending[..ready]);
            writer.write_all(&pending[..ready]).await?;
            written += ready as u64;
            pending.drain(..ready);
        }
    }

    if pending.len() != BLOCK_SIZE {
        return Err(BackupError::Crypto(format!(
            "{}: ciphertext is truncated or not block aligned",
            input.display()
        )));
    }
    decrypt_blocks(&mut cipher, &mut pending);
    let pad = pending[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE || pending[BLOCK_SIZE - pad..].iter().any(|b| *b as usize != pad) {
        return Err(BackupError::Crypto(format!(
            "{}: bad padding (wrong key or corrupted data)",
            input.display()
        )));
    }
    let keep = BLOCK_SIZE - pad;
    writer.write_all(&pending[..keep]).await?;
    written += keep as u64;

    writer.flush().await?;
    Ok(written)
}

fn encrypt_blocks(cipher: &mut Encryptor, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

fn decrypt_blocks(cipher: &mut Decryptor, data: &mut [u8]) {
    for block in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}
