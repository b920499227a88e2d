//! Line-range reads over partition files.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use broker_core::Offset;

/// Collects the lines whose 1-based numbers fall in `[from, to]`.
///
/// Lines before `from` are skipped; scanning stops as soon as a line past
/// `to` is reached, so callers pay only for the prefix they request.
pub fn read_range<R: BufRead>(reader: R, from: Offset, to: Offset) -> io::Result<Vec<String>> {
    let mut collected = Vec::new();
    let mut n: Offset = 0;

    for line in reader.lines() {
        let line = line?;
        n += 1;

        if n < from {
            continue;
        }
        if n > to {
            break;
        }

        collected.push(line);
    }

    Ok(collected)
}

/// Opens `path` read-only and scans it with [`read_range`].
pub fn read_range_at(path: &Path, from: Offset, to: Offset) -> io::Result<Vec<String>> {
    let file = File::open(path)?;
    read_range(BufReader::new(file), from, to)
}
