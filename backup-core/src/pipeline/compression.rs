//! Gzip compression over files, streamed through fixed buffers.

use super::BUFFER_SIZE;
use crate::utils::errors::Result;
use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder};
use async_compression::Level;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

pub async fn compress_file(input: &Path, output: &Path, level: u32) -> Result<u64> {
    let reader = BufReader::with_capacity(BUFFER_SIZE, File::open(input).await?);
    let mut encoder = GzipEncoder::with_quality(reader, Level::Precise(level as i32));
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(output).await?);

    let written = tokio::io::copy(&mut encoder, &mut writer).await?;
    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

pub async fn decompress_file(input: &Path, output: &Path) -> Result<u64> {
    let reader = BufReader::with_capacity(BUFFER_SIZE, File::open(input).await?);
    let mut decoder = GzipDecoder::new(reader);
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, File::create(output).await?);

    let written = tokio::io::copy(&mut decoder, &mut writer).await?;
    writer.flush().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn roundtrip(data: &[u8]) -> (Vec<u8>, u64) {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("raw");
        let gz = dir.path().join("raw.gz");
        let back = dir.path().join("back");
        tokio::fs::write(&raw, data).await.unwrap();

        compress_file(&raw, &gz, 9).await.unwrap();
        let compressed_len = tokio::fs::metadata(&gz).await.unwrap().len();
        decompress_file(&gz, &back).await.unwrap();
        (tokio::fs::read(&back).await.unwrap(), compressed_len)
    }

    #[tokio::test]
    async fn test_empty_input() {
        let (back, _) = roundtrip(b"").await;
        assert!(back.is_empty());
    }

    #[tokio::test]
    async fn test_repetitive_data_shrinks() {
        let data = "Widget,49.99\n".repeat(20_000).into_bytes();
        let (back, compressed_len) = roundtrip(&data).await;
        assert_eq!(back, data);
        assert!(compressed_len < data.len() as u64 / 10);
    }

    #[tokio::test]
    async fn test_spans_many_buffers() {
        let data: Vec<u8> = (0..(BUFFER_SIZE * 3 + 17)).map(|i| (i * 31 % 251) as u8).collect();
        let (back, _) = roundtrip(&data).await;
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn test_garbage_input_fails() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("bad.gz");
        tokio::fs::write(&bad, b"definitely not gzip").await.unwrap();
        assert!(decompress_file(&bad, &dir.path().join("out")).await.is_err());
    }
}
