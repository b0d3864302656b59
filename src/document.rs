//! Text files as an ordered list of lines that round-trip to the exact bytes
//! they were read from.
//!
//! A [`Document`] remembers the file's encoding (UTF-8 with or without BOM,
//! BOM-marked UTF-16, or a caller-chosen legacy encoding such as GBK for files
//! that are not valid UTF-8) and each line's own terminator, so rewriting a
//! single line leaves every other byte of the file untouched.

use crate::error::PatchError;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// On-disk encoding of a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Utf8Bom,
    Utf16Le,
    Utf16Be,
    /// A non-Unicode encoding, used only when the bytes are not valid UTF-8
    /// and decode and re-encode to themselves exactly.
    Legacy(&'static Encoding),
}

impl TextEncoding {
    fn bom(self) -> &'static [u8] {
        match self {
            TextEncoding::Utf8 => b"",
            TextEncoding::Utf8Bom => UTF8_BOM,
            TextEncoding::Utf16Le => b"\xFF\xFE",
            TextEncoding::Utf16Be => b"\xFE\xFF",
            TextEncoding::Legacy(_) => b"",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf8Bom => "UTF-8 (BOM)",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Legacy(encoding) => encoding.name(),
        }
    }

    /// Whether `text` is representable in this encoding.
    pub fn can_encode(self, text: &str) -> bool {
        match self {
            TextEncoding::Legacy(encoding) => !encoding.encode(text).2,
            _ => true,
        }
    }

    fn encode_into(self, text: &str, out: &mut Vec<u8>) {
        match self {
            TextEncoding::Utf8 | TextEncoding::Utf8Bom => out.extend_from_slice(text.as_bytes()),
            TextEncoding::Utf16Le => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            TextEncoding::Utf16Be => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
            TextEncoding::Legacy(encoding) => {
                let (bytes, _, _) = encoding.encode(text);
                out.extend_from_slice(&bytes);
            }
        }
    }
}

/// Terminator that followed a line in the original file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Lf,
    CrLf,
    /// Final line of a file that does not end with a newline.
    None,
}

impl LineEnding {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEnding::Lf => "\n",
            LineEnding::CrLf => "\r\n",
            LineEnding::None => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub ending: LineEnding,
}

#[derive(Debug, Clone)]
pub struct Document {
    path: PathBuf,
    encoding: TextEncoding,
    lines: Vec<Line>,
    fingerprint: u64,
}

impl Document {
    /// Read and decode a regular file as UTF-8 or BOM-marked UTF-16.
    pub fn read(path: &Path) -> Result<Self, PatchError> {
        Self::read_with_fallback(path, None)
    }

    /// Like [`Document::read`], but content that is not valid UTF-8 is decoded
    /// with `fallback` when given.
    pub fn read_with_fallback(
        path: &Path,
        fallback: Option<&'static Encoding>,
    ) -> Result<Self, PatchError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(PatchError::FileNotFound(path.to_path_buf()))
            }
            Err(e) => return Err(PatchError::not_readable(path, e)),
        };
        if !metadata.is_file() {
            return Err(PatchError::not_readable(path, "not a regular file"));
        }

        let bytes = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => PatchError::FileNotFound(path.to_path_buf()),
            _ => PatchError::not_readable(path, e),
        })?;

        Self::from_bytes_with_fallback(path, &bytes, fallback)
    }

    /// Decode raw file content. `path` is only used for error reporting.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, PatchError> {
        Self::from_bytes_with_fallback(path, bytes, None)
    }

    pub fn from_bytes_with_fallback(
        path: impl Into<PathBuf>,
        bytes: &[u8],
        fallback: Option<&'static Encoding>,
    ) -> Result<Self, PatchError> {
        let path = path.into();
        let (encoding, text) = decode(&path, bytes, fallback)?;

        Ok(Self {
            path,
            encoding,
            lines: split_lines(&text),
            fingerprint: xxh3_64(bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Content of the 1-based line `number`, without its terminator.
    pub fn line(&self, number: usize) -> Option<&str> {
        number
            .checked_sub(1)
            .and_then(|idx| self.lines.get(idx))
            .map(|line| line.text.as_str())
    }

    /// Replace the content of the 1-based line `number`, keeping its terminator.
    ///
    /// Returns `false` if the line does not exist.
    pub fn set_line(&mut self, number: usize, text: impl Into<String>) -> bool {
        match number.checked_sub(1).and_then(|idx| self.lines.get_mut(idx)) {
            Some(line) => {
                line.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Decoded content with the original line terminators.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .flat_map(|line| [line.text.as_str(), line.ending.as_str()])
            .collect()
    }

    /// xxh3 hash of the bytes this document was decoded from.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Encode the current lines back to bytes in the original encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let capacity: usize = self
            .lines
            .iter()
            .map(|l| l.text.len() + l.ending.as_str().len())
            .sum();
        let mut out = Vec::with_capacity(capacity + 3);
        out.extend_from_slice(self.encoding.bom());
        for line in &self.lines {
            self.encoding.encode_into(&line.text, &mut out);
            self.encoding.encode_into(line.ending.as_str(), &mut out);
        }
        out
    }
}

fn decode(
    path: &Path,
    bytes: &[u8],
    fallback: Option<&'static Encoding>,
) -> Result<(TextEncoding, String), PatchError> {
    let sniffed = Encoding::for_bom(bytes);
    let (encoding, body) = match sniffed {
        Some((enc, bom_len)) if enc == UTF_8 => (TextEncoding::Utf8Bom, &bytes[bom_len..]),
        Some((enc, bom_len)) if enc == UTF_16LE => (TextEncoding::Utf16Le, &bytes[bom_len..]),
        Some((enc, bom_len)) if enc == UTF_16BE => (TextEncoding::Utf16Be, &bytes[bom_len..]),
        _ => (TextEncoding::Utf8, bytes),
    };

    let text = match encoding {
        TextEncoding::Utf8 => match (std::str::from_utf8(body), fallback) {
            (Ok(text), _) => text.to_owned(),
            (Err(_), Some(legacy)) => return decode_legacy(path, body, legacy),
            (Err(e), None) => {
                return Err(PatchError::not_readable(path, format!("invalid UTF-8: {e}")))
            }
        },
        TextEncoding::Utf8Bom => std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|e| PatchError::not_readable(path, format!("invalid UTF-8: {e}")))?,
        TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
            if body.len() % 2 != 0 {
                return Err(PatchError::not_readable(path, "truncated UTF-16 content"));
            }
            let codec = if encoding == TextEncoding::Utf16Le {
                UTF_16LE
            } else {
                UTF_16BE
            };
            codec
                .decode_without_bom_handling_and_without_replacement(body)
                .map(|text| text.into_owned())
                .ok_or_else(|| PatchError::not_readable(path, "invalid UTF-16 content"))?
        }
        TextEncoding::Legacy(legacy) => return decode_legacy(path, body, legacy),
    };

    Ok((encoding, text))
}

/// Decode with a legacy encoding, accepting the result only if encoding it
/// again reproduces `bytes` exactly.
fn decode_legacy(
    path: &Path,
    bytes: &[u8],
    encoding: &'static Encoding,
) -> Result<(TextEncoding, String), PatchError> {
    let text = encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .ok_or_else(|| {
            PatchError::not_readable(path, format!("neither UTF-8 nor {}", encoding.name()))
        })?;

    let (reencoded, used, had_errors) = encoding.encode(&text);
    if had_errors || used != encoding || reencoded.as_ref() != bytes {
        return Err(PatchError::not_readable(
            path,
            format!("{} content does not round-trip", encoding.name()),
        ));
    }

    Ok((TextEncoding::Legacy(encoding), text.into_owned()))
}

fn split_lines(text: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        match rest.find('\n') {
            Some(idx) => {
                let head = &rest[..idx];
                let line = match head.strip_suffix('\r') {
                    Some(stripped) => Line {
                        text: stripped.to_string(),
                        ending: LineEnding::CrLf,
                    },
                    None => Line {
                        text: head.to_string(),
                        ending: LineEnding::Lf,
                    },
                };
                lines.push(line);
                rest = &rest[idx + 1..];
            }
            None => {
                lines.push(Line {
                    text: rest.to_string(),
                    ending: LineEnding::None,
                });
                break;
            }
        }
    }

    lines
}
