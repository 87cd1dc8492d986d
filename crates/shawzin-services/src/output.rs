//! Writing encoded chunks as text files

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use shawzin_core::{EncodedTrack, ShawzinError};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Nothing to write for '{0}'")]
    Empty(String),
    #[error("Encoding error: {0}")]
    Encoding(#[from] ShawzinError),
}

/// `<stem>.txt` for a single chunk, `<stem>_partN.txt` (1-based) otherwise
pub fn chunk_path(dir: &Path, stem: &str, index: usize, count: usize) -> PathBuf {
    if count <= 1 {
        dir.join(format!("{}.txt", stem))
    } else {
        dir.join(format!("{}_part{}.txt", stem, index + 1))
    }
}

/// Write one wire string per file and return the paths written. Every
/// chunk is encoded before the first file is touched.
pub fn write_chunks(chunks: &[EncodedTrack], dir: &Path, stem: &str) -> Result<Vec<PathBuf>, OutputError> {
    if chunks.is_empty() {
        return Err(OutputError::Empty(stem.to_string()));
    }
    let lines = chunks
        .iter()
        .map(EncodedTrack::to_shawzin_string)
        .collect::<Result<Vec<_>, _>>()?;
    std::fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(chunks.len());
    for (index, (chunk, line)) in chunks.iter().zip(&lines).enumerate() {
        let path = chunk_path(dir, stem, index, chunks.len());
        std::fs::write(&path, line)?;
        info!("Wrote {} ({})", path.display(), chunk);
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shawzin_core::EncodedNote;

    fn chunk(index: usize, symbols: &str) -> EncodedTrack {
        EncodedTrack {
            scale_id: 2,
            header: None,
            chunk_index: index,
            time_offset: 0,
            notes: symbols
                .chars()
                .enumerate()
                .map(|(i, symbol)| EncodedNote { symbol, time: i as u32 * 4 })
                .collect(),
        }
    }

    #[test]
    fn test_chunk_paths() {
        let dir = Path::new("out");
        assert_eq!(chunk_path(dir, "song", 0, 1), dir.join("song.txt"));
        assert_eq!(chunk_path(dir, "song", 1, 3), dir.join("song_part2.txt"));
    }

    #[test]
    fn test_single_chunk_written() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_chunks(&[chunk(0, "BCE")], dir.path(), "tune").unwrap();
        assert_eq!(paths, vec![dir.path().join("tune.txt")]);
        assert_eq!(std::fs::read_to_string(&paths[0]).unwrap(), "2BAACAEEAI");
    }

    #[test]
    fn test_multiple_chunks_get_part_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("shawzin");
        let paths = write_chunks(&[chunk(0, "B"), chunk(1, "C")], &nested, "tune").unwrap();
        assert_eq!(paths[0], nested.join("tune_part1.txt"));
        assert_eq!(std::fs::read_to_string(&paths[1]).unwrap(), "2CAA");
    }

    #[test]
    fn test_unencodable_chunk_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = chunk(1, "C");
        bad.notes[0].time = 5000;
        let result = write_chunks(&[chunk(0, "B"), bad], dir.path(), "tune");
        assert!(matches!(result, Err(OutputError::Encoding(_))));
        assert!(!dir.path().join("tune_part1.txt").exists());
    }

    #[test]
    fn test_empty_chunks_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(write_chunks(&[], dir.path(), "tune"), Err(OutputError::Empty(_))));
    }
}
