//! Concatenate completed part files into the final artifact
//!
//! Parts are appended strictly by index, whatever order they finished in.

use super::worker::Part;
use crate::error::{Error, Result};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Merge `parts` into `dest` in index order, returning the bytes written
pub(crate) async fn merge_parts(parts: &[Part], dest: &Path) -> Result<u64> {
    let mut ordered: Vec<&Part> = parts.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut output = tokio::fs::File::create(dest).await?;
    let mut total = 0u64;

    for part in ordered {
        let mut input = tokio::fs::File::open(&part.path).await?;
        let copied = tokio::io::copy(&mut input, &mut output).await?;
        if copied != part.len() {
            return Err(Error::PartFailed {
                index: part.index,
                reason: format!("part file holds {copied} bytes, expected {}", part.len()),
            });
        }
        total += copied;
    }

    output.flush().await?;
    output.sync_all().await?;

    tracing::debug!(dest = %dest.display(), bytes = total, parts = parts.len(), "Merged parts");
    Ok(total)
}
