//! Fixed-size windows over characters, tokens or sentences.

use super::segment::{self, Span};
use crate::models::ChunkUnit;

/// Window `i` covers units `i·(size−overlap) .. i·(size−overlap)+size`,
/// clipped to `unit_count`. The last window ends exactly at `unit_count`.
pub fn unit_windows(unit_count: usize, size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let mut windows = Vec::new();
    if unit_count == 0 || size == 0 {
        return windows;
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut start = 0;

    loop {
        let end = (start + size).min(unit_count);
        windows.push((start, end));
        if end == unit_count {
            break;
        }
        start += step;
    }
    windows
}

/// Lexical chunk spans over `chars[from..]`, as absolute character offsets.
pub fn spans(chars: &[char], from: usize, unit: ChunkUnit, size: usize, overlap: usize) -> Vec<Span> {
    let rest = &chars[from..];

    let spans = match unit {
        ChunkUnit::Character => unit_windows(rest.len(), size, overlap)
            .into_iter()
            .map(|(s, e)| Span::new(s, e))
            .collect(),
        ChunkUnit::Token => windows_over(&segment::tokens(rest), size, overlap),
        ChunkUnit::Sentence => windows_over(&segment::sentences(rest), size, overlap),
    };

    spans
        .into_iter()
        .map(|s| Span::new(s.start + from, s.end + from))
        .collect()
}

fn windows_over(units: &[Span], size: usize, overlap: usize) -> Vec<Span> {
    unit_windows(units.len(), size, overlap)
        .into_iter()
        .map(|(first, last)| Span::new(units[first].start, units[last - 1].end))
        .collect()
}
