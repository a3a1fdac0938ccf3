//! Pure arithmetic mapping between linear row indices and physical
//! `(chunk, offset)` locations.

use super::row::ROW_SIZE;

/// Fixed byte capacity of one store chunk.
pub const CHUNK_SIZE: usize = 128 * 1024;

/// Whole rows per chunk; rows never span a chunk boundary.
pub const CHUNK_ROW_CAPACITY: u32 = (CHUNK_SIZE / ROW_SIZE) as u32;

/// Unused tail bytes left in each chunk so that rows stay whole.
pub const CHUNK_SKIP_BYTES: u32 = (CHUNK_SIZE - CHUNK_ROW_CAPACITY as usize * ROW_SIZE) as u32;

/// Physical address of one row inside the chunk list.
///
/// The index-based and byte-based representations always agree:
/// `Cursor::from_index(i).to_index() == i` for every index.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Cursor {
    /// Index of the chunk holding the row.
    pub chunk: u32,
    /// Byte offset of the row inside its chunk.
    pub offset_bytes: u32,
}

impl Cursor {
    /// Maps a linear row index to its physical location.
    pub fn from_index(index: u32) -> Self {
        Self {
            chunk: index / CHUNK_ROW_CAPACITY,
            offset_bytes: (index % CHUNK_ROW_CAPACITY) * ROW_SIZE as u32,
        }
    }

    /// Recovers the linear row index.
    pub fn to_index(self) -> u32 {
        self.chunk * CHUNK_ROW_CAPACITY + self.offset_bytes / ROW_SIZE as u32
    }

    /// Cumulative byte offset from the start of the store, counting the
    /// skip bytes at the tail of every preceding chunk.
    pub fn to_total_bytes(self) -> u64 {
        self.chunk as u64 * CHUNK_SIZE as u64 + self.offset_bytes as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(CHUNK_ROW_CAPACITY, 6553);
        assert_eq!(CHUNK_SKIP_BYTES, 12);
        assert_eq!(
            CHUNK_ROW_CAPACITY as usize * ROW_SIZE + CHUNK_SKIP_BYTES as usize,
            CHUNK_SIZE
        );
    }

    #[test]
    fn index_round_trip_across_chunk_boundary() {
        for index in [
            0,
            1,
            CHUNK_ROW_CAPACITY - 1,
            CHUNK_ROW_CAPACITY,
            CHUNK_ROW_CAPACITY + 1,
            3 * CHUNK_ROW_CAPACITY + 17,
        ] {
            let cursor = Cursor::from_index(index);
            assert_eq!(cursor.to_index(), index, "index {index}");
        }
    }

    #[test]
    fn total_bytes_counts_skip_bytes() {
        let first_of_second_chunk = Cursor::from_index(CHUNK_ROW_CAPACITY);
        assert_eq!(first_of_second_chunk.chunk, 1);
        assert_eq!(first_of_second_chunk.offset_bytes, 0);
        assert_eq!(first_of_second_chunk.to_total_bytes(), CHUNK_SIZE as u64);

        let last_of_first_chunk = Cursor::from_index(CHUNK_ROW_CAPACITY - 1);
        assert_eq!(
            last_of_first_chunk.to_total_bytes(),
            (CHUNK_SIZE - CHUNK_SKIP_BYTES as usize - ROW_SIZE) as u64
        );
    }
}
