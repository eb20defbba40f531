//! Choosing which chunks a retrieval downloads.

use tracing::warn;

use crate::error::{DirectIoError, Result};
use crate::metadata::{ByteRange, Chunk, FileMetadata};

/// Maps 1-based block numbers to chunks, in the order given. `None` or an empty list selects every chunk.
pub fn select_by_blocks(file: &FileMetadata, numbers: Option<&[usize]>) -> Result<Vec<Chunk>> {
    let numbers = match numbers {
        Some(numbers) if !numbers.is_empty() => numbers,
        _ => return Ok(file.chunks.clone()),
    };

    numbers
        .iter()
        .map(|&number| {
            number
                .checked_sub(1)
                .and_then(|i| file.chunks.get(i))
                .cloned()
                .ok_or_else(|| DirectIoError::BlockNumberOutOfRange {
                    file_id: file.file_id.clone(),
                    number,
                    num_chunks: file.num_chunks(),
                })
        })
        .collect()
}

/// Rejects a range that starts past the end of the file; an end at or past the file size is normalized
/// to read through EOF.
pub fn validate_range(file: &FileMetadata, range: &mut ByteRange) -> Result<()> {
    let size = file.size();

    if range.start > size {
        warn!(file_id = %file.file_id, start = range.start, size, "Byte range starts beyond end of file");
        return Err(DirectIoError::RangeStartBeyondEof {
            file_id: file.file_id.clone(),
            start: range.start,
            size,
        });
    }

    if let Some(end) = range.end
        && end >= size
    {
        range.to_eof();
    }

    Ok(())
}

/// Validates `range` and returns the contiguous run of chunks that overlap it.
///
/// The first chunk is the first whose exclusive end lies past `range.start`; unless the range reads
/// through EOF, the last is the first whose exclusive end lies past `range.end`.
pub fn select_by_range(file: &FileMetadata, range: &mut ByteRange) -> Result<Vec<Chunk>> {
    validate_range(file, range)?;

    let chunks = &file.chunks;
    let start_index = chunks
        .iter()
        .position(|c| range.start < c.end())
        .unwrap_or(chunks.len());

    let end_index = match range.bounded_end() {
        Some(end) => chunks
            .iter()
            .position(|c| end < c.end())
            .map_or(chunks.len(), |i| i + 1),
        None => chunks.len(),
    };

    Ok(chunks[start_index..end_index.max(start_index)].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::test_response;

    fn file(lengths: &[u64]) -> FileMetadata {
        FileMetadata::from_response("f", test_response(lengths)).unwrap()
    }

    fn indices(chunks: &[Chunk]) -> Vec<usize> {
        chunks.iter().map(|c| c.index).collect()
    }

    #[test]
    fn test_select_by_blocks() {
        let f = file(&[10, 20, 30]);

        assert_eq!(select_by_blocks(&f, None).unwrap(), f.chunks);
        assert_eq!(select_by_blocks(&f, Some(&[])).unwrap(), f.chunks);
        assert_eq!(select_by_blocks(&f, Some(&[2])).unwrap(), vec![f.chunks[1].clone()]);
        assert_eq!(indices(&select_by_blocks(&f, Some(&[3, 1])).unwrap()), vec![3, 1]);
    }

    #[test]
    fn test_select_by_blocks_out_of_range() {
        let f = file(&[10, 20, 30]);
        for bad in [0, 4, usize::MAX] {
            let res = select_by_blocks(&f, Some(&[1, bad]));
            assert!(matches!(
                res,
                Err(DirectIoError::BlockNumberOutOfRange { number, num_chunks: 3, .. }) if number == bad
            ));
        }
    }

    #[test]
    fn test_full_range_selects_everything() {
        let f = file(&[100, 100, 100]);
        let mut range = ByteRange::full();
        assert_eq!(select_by_range(&f, &mut range).unwrap(), f.chunks);
    }

    #[test]
    fn test_partial_range() {
        let f = file(&[100, 100, 100]);

        let mut range = ByteRange::new(50, Some(149)).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![1, 2]);
        assert!(!range.eof);

        let mut range = ByteRange::new(150, None).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![2, 3]);

        let mut range = ByteRange::new(0, Some(0)).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![1]);
    }

    #[test]
    fn test_boundaries() {
        let f = file(&[100, 100, 100]);

        // A start on a chunk boundary begins at that chunk; an end on the last byte of a chunk stops there.
        let mut range = ByteRange::new(100, Some(199)).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![2]);

        let mut range = ByteRange::new(99, Some(200)).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![1, 2, 3]);

        for chunk in &f.chunks {
            let mut range = ByteRange::new(chunk.offset, Some(chunk.offset)).unwrap();
            let selected = select_by_range(&f, &mut range).unwrap();
            assert_eq!(selected, vec![chunk.clone()]);
        }
    }

    #[test]
    fn test_end_past_file_is_clamped() {
        let f = file(&[100, 100, 100]);

        let mut range = ByteRange::new(0, Some(f.size() + 1000)).unwrap();
        validate_range(&f, &mut range).unwrap();
        assert!(range.eof);

        let mut range = ByteRange::new(10, Some(f.size())).unwrap();
        validate_range(&f, &mut range).unwrap();
        assert!(range.eof);

        // The last byte itself is still an explicit end.
        let mut range = ByteRange::new(10, Some(f.size() - 1)).unwrap();
        assert_eq!(indices(&select_by_range(&f, &mut range).unwrap()), vec![1, 2, 3]);
        assert!(!range.eof);

        let mut range = ByteRange::new(10, Some(f.size() - 2)).unwrap();
        validate_range(&f, &mut range).unwrap();
        assert!(!range.eof);
    }

    #[test]
    fn test_validate_is_idempotent() {
        let f = file(&[100, 100]);
        for (start, end) in [(0, Some(50)), (0, Some(199)), (0, Some(5000)), (150, None)] {
            let mut once = ByteRange::new(start, end).unwrap();
            validate_range(&f, &mut once).unwrap();
            let mut twice = once;
            validate_range(&f, &mut twice).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_start_beyond_eof() {
        let f = file(&[100, 100]);

        let mut range = ByteRange::new(201, None).unwrap();
        assert!(matches!(
            select_by_range(&f, &mut range),
            Err(DirectIoError::RangeStartBeyondEof { start: 201, size: 200, .. })
        ));

        // Starting exactly at the end selects nothing.
        let mut range = ByteRange::new(200, None).unwrap();
        assert!(select_by_range(&f, &mut range).unwrap().is_empty());
    }
}
