//! Program image format for Ocho programs.
//!
//! A program image is a simple text format:
//! - One instruction word per line, written in binary ('0'/'1' digits)
//! - The digits are parsed as a base-2 integer and truncated to 16 bits
//! - Lines starting with `;` are comments
//! - Blank lines are ignored
//! - Loading stops at end of input or at the 2048-word memory capacity,
//!   whichever comes first

use crate::cpu::memory::MEMORY_SIZE;
use std::path::Path;
use std::io::{BufRead, BufReader, Write};
use thiserror::Error;

/// A loaded program image.
#[derive(Debug, Clone)]
pub struct ImageFile {
    /// The program words.
    pub words: Vec<u16>,
    /// Original source lines (for debugging).
    pub source_lines: Vec<String>,
}

impl ImageFile {
    /// Create a new empty image.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            source_lines: Vec::new(),
        }
    }

    /// Add a word.
    pub fn push(&mut self, word: u16, source: &str) {
        self.words.push(word);
        self.source_lines.push(source.to_string());
    }

    /// Get the number of words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for ImageFile {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one image line into a 16-bit word.
///
/// Only the first whitespace-delimited token is considered, so trailing
/// annotations are tolerated. Digits beyond 16 are truncated from the
/// high end by the cast, matching the base-2-integer reading.
fn parse_line(line: &str) -> Result<u16, String> {
    let token = line.split_whitespace().next().unwrap_or("");

    if token.is_empty() || !token.chars().all(|c| c == '0' || c == '1') {
        return Err(format!("expected a string of 0/1 digits, found {:?}", token));
    }
    if token.len() > 64 {
        return Err(format!("binary literal too long ({} digits)", token.len()));
    }

    let value = u64::from_str_radix(token, 2)
        .map_err(|e| format!("{}", e))?;
    Ok(value as u16)
}

/// Load a program image from disk.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<ImageFile, ImageError> {
    let file = std::fs::File::open(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    let reader = BufReader::new(file);

    let mut image = ImageFile::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(|e| ImageError::IoError(e.to_string()))?;
        let trimmed = line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }

        // Words past the memory capacity are not loaded.
        if image.len() >= MEMORY_SIZE {
            break;
        }

        let word = parse_line(trimmed)
            .map_err(|message| ImageError::ParseError {
                line: line_num + 1,
                message,
            })?;

        image.push(word, trimmed);
    }

    Ok(image)
}

/// Save a program image to disk.
pub fn save_image<P: AsRef<Path>>(path: P, image: &ImageFile) -> Result<(), ImageError> {
    let mut file = std::fs::File::create(path.as_ref())
        .map_err(|e| ImageError::IoError(e.to_string()))?;

    writeln!(file, "; Ocho program image")
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    writeln!(file, "; {} words", image.len())
        .map_err(|e| ImageError::IoError(e.to_string()))?;
    writeln!(file).map_err(|e| ImageError::IoError(e.to_string()))?;

    for (i, word) in image.words.iter().enumerate() {
        writeln!(file, "{:016b} ; {:04}", word, i)
            .map_err(|e| ImageError::IoError(e.to_string()))?;
    }

    Ok(())
}

/// Save raw words directly to an image file.
pub fn save_words<P: AsRef<Path>>(path: P, words: &[u16]) -> Result<(), ImageError> {
    let image = ImageFile {
        words: words.to_vec(),
        source_lines: words.iter().map(|w| format!("{:016b}", w)).collect(),
    };
    save_image(path, &image)
}

/// Errors that can occur during image operations.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("parse error on line {line}: {message}")]
    ParseError { line: usize, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_width_line() {
        assert_eq!(parse_line("1000000100000101").unwrap(), 0x8105);
    }

    #[test]
    fn parse_short_line_zero_extends() {
        // "101" parses as the integer 5.
        assert_eq!(parse_line("101").unwrap(), 5);
    }

    #[test]
    fn parse_long_line_truncates_to_16_bits() {
        // 17 digits: the leading digit falls off the top.
        assert_eq!(parse_line("11000000000000001").unwrap(), 0x8001);
    }

    #[test]
    fn parse_tolerates_trailing_annotation() {
        assert_eq!(parse_line("0000000000000001 extra").unwrap(), 1);
    }

    #[test]
    fn parse_rejects_non_binary() {
        assert!(parse_line("10201").is_err());
        assert!(parse_line("").is_err());
    }

    #[test]
    fn image_push_tracks_sources() {
        let mut image = ImageFile::new();
        image.push(0x1000, "HLT");
        image.push(42, "DATA");
        assert_eq!(image.len(), 2);
        assert_eq!(image.words[0], 0x1000);
    }
}
