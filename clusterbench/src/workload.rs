//! Synthetic workload files fed to the client.
//!
//! Every file is generated from a seeded [`SmallRng`], so the same seed always yields the same
//! content. Files are written in fixed-size chunks to keep memory usage independent of the
//! configured file size.

use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::client::OperationKind;
use crate::error::{HarnessError, HarnessResult};

/// Characters used for [`ContentProfile::Text`]: ASCII letters, digits, space and newline.
pub const TEXT_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 \n";

const CHUNK_SIZE: usize = 64 * 1024;

/// Kind of content written into a workload file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentProfile {
    /// Uniformly distributed random bytes.
    Binary,
    /// Random characters from [`TEXT_ALPHABET`], always valid UTF-8.
    Text,
}

/// A generated file on disk.
#[derive(Debug)]
pub struct WorkloadFile {
    /// Full path of the file.
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Content the file was filled with.
    pub profile: ContentProfile,
}

impl WorkloadFile {
    /// The bare file name, which the client uses as the object key.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }
}

impl Drop for WorkloadFile {
    /// Deletes the file, so that a workload file never outlives its operation, even when the
    /// run is interrupted.
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = &err as &dyn std::error::Error,
                    "failed to remove workload file",
                );
            }
            _ => {}
        }
    }
}

/// Deterministic name of the workload file for the given phase iteration.
pub fn file_name(kind: OperationKind, index: usize) -> String {
    format!("test_file_{kind}_{index}.txt")
}

/// Creates or overwrites `path` with exactly `size` bytes of content drawn from `profile`.
///
/// The parent directory must already exist. The returned [`WorkloadFile`] deletes the file when
/// dropped; a partially written file is deleted before an error is returned.
pub async fn generate(
    path: &Path,
    size: u64,
    profile: ContentProfile,
    seed: u64,
) -> HarnessResult<WorkloadFile> {
    let file = WorkloadFile {
        path: path.to_owned(),
        size,
        profile,
    };

    match write_content(path, size, profile, seed).await {
        Ok(()) => Ok(file),
        Err(source) => Err(HarnessError::Generation {
            path: path.to_owned(),
            source,
        }),
    }
}

async fn write_content(path: &Path, size: u64, profile: ContentProfile, seed: u64) -> io::Result<()> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut writer = BufWriter::new(File::create(path).await?);
    let mut chunk = vec![0u8; CHUNK_SIZE];

    let mut remaining = size;
    while remaining > 0 {
        let len = remaining.min(CHUNK_SIZE as u64) as usize;
        let buf = &mut chunk[..len];
        match profile {
            ContentProfile::Binary => rng.fill_bytes(buf),
            ContentProfile::Text => {
                for byte in buf.iter_mut() {
                    *byte = TEXT_ALPHABET[rng.random_range(0..TEXT_ALPHABET.len())];
                }
            }
        }
        writer.write_all(buf).await?;
        remaining -= len as u64;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(())
}
