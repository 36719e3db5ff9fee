//! Unit segmentation. Every function here returns spans that tile the text.

/// Half-open character range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

fn is_cjk_terminator(ch: char) -> bool {
    matches!(ch, '。' | '！' | '？')
}

fn skip_whitespace(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Split into sentences.
///
/// A sentence ends after `.`, `!` or `?` followed by whitespace, after a
/// full-width terminator, or at a line break. The whitespace that follows
/// belongs to the sentence it ends; leading whitespace belongs to the first.
pub fn sentences(chars: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = skip_whitespace(chars, 0);

    while i < chars.len() {
        let ch = chars[i];
        let next_is_space = chars.get(i + 1).is_some_and(|c| c.is_whitespace());
        let ends_sentence = ch == '\n'
            || is_cjk_terminator(ch)
            || (is_terminator(ch) && next_is_space);

        if ends_sentence {
            let end = skip_whitespace(chars, i + 1);
            spans.push(Span::new(start, end));
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }
    if start < chars.len() {
        spans.push(Span::new(start, chars.len()));
    }
    spans
}

/// Split into whitespace-delimited tokens, each carrying its trailing whitespace.
/// Leading whitespace is part of the first token.
pub fn tokens(chars: &[char]) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut i = skip_whitespace(chars, 0);

    while i < chars.len() {
        while i < chars.len() && !chars[i].is_whitespace() {
            i += 1;
        }
        i = skip_whitespace(chars, i);
        spans.push(Span::new(start, i));
        start = i;
    }
    if start < chars.len() {
        spans.push(Span::new(start, chars.len()));
    }
    spans
}

/// Structural strength of the boundary at the end of `before`.
///
/// 1.0 after a blank line or before a Markdown heading, 0.5 after a single
/// line break, 0.0 inside running text.
pub fn structural_strength(chars: &[char], before: Span) -> f32 {
    let trailing_newlines = chars[before.start..before.end]
        .iter()
        .rev()
        .take_while(|c| c.is_whitespace())
        .filter(|c| **c == '\n')
        .count();
    let heading_next = chars.get(before.end) == Some(&'#');

    if trailing_newlines >= 2 || heading_next {
        1.0
    } else if trailing_newlines == 1 {
        0.5
    } else {
        0.0
    }
}
