//! Text processing utilities.

/// Split text into lowercase alphanumeric terms for lexical scoring.
///
/// Runs of letters/digits form a term; everything else separates terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            terms.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

/// Character-indexed view of a text: char to byte offset and char to line number.
#[derive(Debug)]
pub struct TextIndex<'a> {
    text: &'a str,
    chars: Vec<char>,
    byte_at: Vec<usize>,
    line_at: Vec<u32>,
}

impl<'a> TextIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut byte_at = Vec::with_capacity(text.len() + 1);
        let mut line_at = Vec::with_capacity(text.len());
        let mut line = 1u32;

        for (i, ch) in text.char_indices() {
            chars.push(ch);
            byte_at.push(i);
            line_at.push(line);
            if ch == '\n' {
                line += 1;
            }
        }
        byte_at.push(text.len());

        Self {
            text,
            chars,
            byte_at,
            line_at,
        }
    }

    pub fn char_len(&self) -> usize {
        self.chars.len()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Text of characters `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_at[start]..self.byte_at[end]]
    }

    /// 1-based line of the character at `pos`; a newline belongs to the line it ends.
    pub fn line_of(&self, pos: usize) -> u32 {
        self.line_at
            .get(pos)
            .or(self.line_at.last())
            .copied()
            .unwrap_or(1)
    }
}

/// Collapse whitespace and cap the result at `max_chars` characters.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut out: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

/// Check if content has any non-whitespace text.
pub fn has_meaningful_content(content: &str) -> bool {
    content.chars().any(|c| !c.is_whitespace())
}
