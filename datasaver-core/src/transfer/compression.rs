//! Streaming compression of dump files.

use crate::utils::errors::{Error, Result};
use async_compression::tokio::bufread::{GzipDecoder, ZstdDecoder};
use async_compression::tokio::write::{GzipEncoder, ZstdEncoder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

/// Compression algorithm applied to the canonical artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }

    /// Suffix appended to the artifact key, including the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Zstd => ".zst",
        }
    }

    /// Infer the compression of a stored artifact from its key.
    pub fn from_key(key: &str) -> Self {
        if key.ends_with(".gz") {
            Compression::Gzip
        } else if key.ends_with(".zst") {
            Compression::Zstd
        } else {
            Compression::None
        }
    }

    /// `key` with this compression's suffix removed.
    pub fn strip_extension<'a>(&self, key: &'a str) -> &'a str {
        key.strip_suffix(self.extension()).unwrap_or(key)
    }

    /// Wrap `reader` in the matching decoder.
    pub fn decoder<R>(&self, reader: R) -> Box<dyn AsyncRead + Send + Unpin>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let buffered = BufReader::new(reader);
        match self {
            Compression::None => Box::new(buffered),
            Compression::Gzip => Box::new(GzipDecoder::new(buffered)),
            Compression::Zstd => Box::new(ZstdDecoder::new(buffered)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(Error::Config(format!(
                "compression must be 'gzip', 'zstd', or 'none' (got '{other}')"
            ))),
        }
    }
}

/// Compress `src` into `dst`, returning the compressed size.
pub async fn compress_file(src: &Path, dst: &Path, compression: Compression) -> Result<u64> {
    let mut input = File::open(src).await?;
    let output = File::create(dst).await?;

    let map = |e: std::io::Error| Error::Compression(format!("{} failed: {e}", compression));

    match compression {
        Compression::None => {
            let mut output = output;
            tokio::io::copy(&mut input, &mut output).await?;
            output.sync_all().await?;
        }
        Compression::Gzip => {
            let mut encoder = GzipEncoder::new(output);
            tokio::io::copy(&mut input, &mut encoder).await.map_err(map)?;
            encoder.shutdown().await.map_err(map)?;
            encoder.into_inner().sync_all().await?;
        }
        Compression::Zstd => {
            let mut encoder = ZstdEncoder::new(output);
            tokio::io::copy(&mut input, &mut encoder).await.map_err(map)?;
            encoder.shutdown().await.map_err(map)?;
            encoder.into_inner().sync_all().await?;
        }
    }

    Ok(tokio::fs::metadata(dst).await?.len())
}

/// Decompress `src` into `dst`, returning the decompressed size.
pub async fn decompress_file(src: &Path, dst: &Path, compression: Compression) -> Result<u64> {
    let input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    let mut decoder = compression.decoder(input);

    let written = tokio::io::copy(&mut decoder, &mut output)
        .await
        .map_err(|e| Error::Compression(format!("{compression} decode failed: {e}")))?;
    output.flush().await?;
    Ok(written)
}
