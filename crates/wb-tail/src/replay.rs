//! Bounded history window read from the end of a file (`tail -n`).

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::cursor::push_lines;

const BLOCK_BYTES: u64 = 8 * 1024;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Replay {
    pub lines: Vec<String>,
    /// Offset just past the last newline; tailing continues from here, so a
    /// trailing partial line is picked up whole once it is terminated.
    pub end: u64,
}

/// Read at most `max_lines` complete lines from the end of `file`, oldest
/// first.
///
/// The window is bounded by line count only. A final line without a
/// trailing newline is not replayed; `end` stays in front of it. The file is
/// scanned backwards in blocks and bytes outside the window are not kept.
pub fn last_lines(file: &mut File, max_lines: usize) -> io::Result<Replay> {
    let mut start = file.metadata()?.len();
    // Blocks covering [start, end) once the last newline has been seen,
    // newest first.
    let mut blocks: Vec<Vec<u8>> = Vec::new();
    let mut newlines = 0;
    let mut end: Option<u64> = None;

    while start > 0 {
        let block = BLOCK_BYTES.min(start);
        start -= block;
        file.seek(SeekFrom::Start(start))?;
        let mut chunk = vec![0u8; block as usize];
        file.read_exact(&mut chunk)?;

        if end.is_none() {
            let Some(last) = chunk.iter().rposition(|&b| b == b'\n') else {
                // Still inside the unterminated tail.
                continue;
            };
            end = Some(start + last as u64 + 1);
            chunk.truncate(last + 1);
        }
        newlines += chunk.iter().filter(|&&b| b == b'\n').count();
        blocks.push(chunk);

        // One newline more than the window means the first line in it is
        // complete too, or is a piece we will drop.
        if newlines > max_lines {
            break;
        }
    }

    let Some(end) = end else {
        return Ok(Replay::default());
    };

    let window: Vec<u8> = blocks.into_iter().rev().flatten().collect();
    let body = window.strip_suffix(b"\n").unwrap_or(&window);
    let mut lines = Vec::new();
    push_lines(body, &mut lines);
    // Unless we reached the start of the file, the first piece may begin
    // mid-line.
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    if lines.len() > max_lines {
        lines.drain(..lines.len() - max_lines);
    }

    Ok(Replay { lines, end })
}
