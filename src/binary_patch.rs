use crate::binary_diff::DiffChunk;

/// Reconstruct the new file from the old file data and a sequence of diff chunks.
pub fn apply_diff(old: &[u8], chunks: &[DiffChunk]) -> Vec<u8> {
    let estimated_size: u64 = chunks
        .iter()
        .map(|c| match c {
            DiffChunk::Copy { length, .. } => *length,
            DiffChunk::Insert { data } => data.len() as u64,
        })
        .sum();

    let mut result = Vec::with_capacity(estimated_size as usize);

    for chunk in chunks {
        match chunk {
            DiffChunk::Copy { offset, length } => {
                let start = *offset as usize;
                let end = start + *length as usize;
                result.extend_from_slice(&old[start..end]);
            }
            DiffChunk::Insert { data } => {
                result.extend_from_slice(data);
            }
        }
    }

    result
}
