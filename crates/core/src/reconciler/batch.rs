//! Fixed-size batching of missing files (§4.4 step 4), bounding envelope
//! size so a single publish never exceeds the configured batch size.

use std::path::PathBuf;

/// Split `files` into chunks of at most `batch_size` (minimum 1, to avoid
/// an infinite loop on a misconfigured zero).
pub fn batch_files(files: Vec<PathBuf>, batch_size: usize) -> Vec<Vec<PathBuf>> {
    let batch_size = batch_size.max(1);
    files
        .chunks(batch_size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_into_bounded_chunks() {
        let files: Vec<PathBuf> = (0..12).map(|i| PathBuf::from(format!("/f{i}.mkv"))).collect();
        let batches = batch_files(files.clone(), 5);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(batches[2].len(), 2);

        let rejoined: Vec<PathBuf> = batches.into_iter().flatten().collect();
        assert_eq!(rejoined, files);
    }

    #[test]
    fn test_zero_batch_size_treated_as_one() {
        let files = vec![PathBuf::from("/a.mkv"), PathBuf::from("/b.mkv")];
        let batches = batch_files(files, 0);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_empty_input_yields_no_batches() {
        let batches = batch_files(vec![], 5);
        assert!(batches.is_empty());
    }
}
