//! SHA-256 content hashes, rendered `sha256:<hex>`.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const CHECKSUM_PREFIX: &str = "sha256:";

const BUFFER_SIZE: usize = 64 * 1024;

/// Hash everything `reader` yields.
pub async fn sha256_reader<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let count = reader.read(&mut buffer).await?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }

    Ok(format!("{CHECKSUM_PREFIX}{:x}", hasher.finalize()))
}

pub async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    sha256_reader(&mut file).await
}
