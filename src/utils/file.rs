//! File helpers for loading local documents.

use std::fs;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// SHA-256 of `content`, hex encoded.
pub fn calculate_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Check if a file is likely plain text: known extensions first, then a NUL sniff.
pub fn is_text_file(path: &Path) -> bool {
    if let Some(ext) = extension(path) {
        if is_binary_extension(&ext) {
            return false;
        }
        if mime_for_extension(&ext).is_some() {
            return true;
        }
    }

    let Ok(file) = fs::File::open(path) else {
        return false;
    };
    let mut buffer = [0u8; 512];
    match std::io::BufReader::new(file).read(&mut buffer) {
        Ok(n) => !buffer[..n].contains(&0),
        Err(_) => false,
    }
}

/// Read a UTF-8 file, refusing anything larger than `max_size` bytes.
pub fn read_file_content(path: &Path, max_size: u64) -> std::io::Result<String> {
    let len = fs::metadata(path)?.len();
    if len > max_size {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("file exceeds maximum size: {len} > {max_size}"),
        ));
    }
    fs::read_to_string(path)
}

/// Guess a mime type from the file extension; unknown text is `text/plain`.
pub fn guess_mime_type(path: &Path) -> &'static str {
    extension(path)
        .and_then(|ext| mime_for_extension(&ext))
        .unwrap_or("text/plain")
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "exe" | "dll" | "so" | "dylib" | "a" | "o" | "obj" | "class" | "jar" | "pyc"
            | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp"
            | "mp3" | "mp4" | "avi" | "mkv" | "mov" | "wav" | "flac"
            | "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar"
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            | "woff" | "woff2" | "ttf" | "otf" | "db" | "sqlite" | "bin"
    )
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    let mime = match ext {
        "md" | "markdown" => "text/markdown",
        "txt" | "text" | "log" | "rst" | "adoc" | "org" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "rs" | "py" | "js" | "ts" | "go" | "java" | "kt" | "c" | "h" | "cpp" | "hpp" | "rb"
        | "php" | "swift" | "scala" | "sh" | "sql" | "css" | "lua" => "text/x-source",
        _ => return None,
    };
    Some(mime)
}
