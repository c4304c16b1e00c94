use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised by the startup loaders. Every variant is fatal to startup:
/// the supervisor refuses to spawn workers over a half-loaded corpus or a
/// dictionary it could not parse.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Corpus directory {0:?} does not exist or is not a directory")]
    CorpusDirMissing(PathBuf),

    #[error("Corpus I/O error for {path:?}: {msg}")]
    Io { path: PathBuf, msg: String },

    #[error("Dictionary parse error at {path:?}:{line}: {msg}")]
    DictionaryParse {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("Symbol filter file {0:?} contains no usable entries")]
    EmptySymbolFilter(PathBuf),
}

/// In-memory index of the on-disk seed corpus.
///
/// Seeds are raw byte files read from a flat directory; subdirectories and
/// hidden files are skipped. The index is built once at startup and shared
/// read-only with every worker, so no locking is required afterwards.
#[derive(Debug, Default)]
pub struct SeedCorpus {
    entries: Vec<(PathBuf, Vec<u8>)>,
}

impl SeedCorpus {
    /// Loads every regular file directly under `corpus_dir`.
    ///
    /// An empty directory yields a corpus with a single empty input so that
    /// mutation always has a starting point. A missing directory is an error.
    pub fn load(corpus_dir: &Path) -> Result<Self, LoaderError> {
        if !corpus_dir.is_dir() {
            return Err(LoaderError::CorpusDirMissing(corpus_dir.to_path_buf()));
        }

        let mut entries = Vec::new();
        let read_dir = fs::read_dir(corpus_dir).map_err(|e| LoaderError::Io {
            path: corpus_dir.to_path_buf(),
            msg: e.to_string(),
        })?;
        for entry_result in read_dir {
            let entry = entry_result.map_err(|e| LoaderError::Io {
                path: corpus_dir.to_path_buf(),
                msg: e.to_string(),
            })?;
            let file_path = entry.path();
            if !file_path.is_file() {
                continue;
            }
            if let Some(name) = file_path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    continue;
                }
            }
            let data = fs::read(&file_path).map_err(|e| LoaderError::Io {
                path: file_path.clone(),
                msg: e.to_string(),
            })?;
            entries.push((file_path, data));
        }

        if entries.is_empty() {
            entries.push((corpus_dir.join("__auto_seed__"), Vec::new()));
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&[u8]> {
        self.entries.get(id).map(|(_, data)| data.as_slice())
    }

    pub fn path_of(&self, id: usize) -> Option<&Path> {
        self.entries.get(id).map(|(path, _)| path.as_path())
    }
}

/// Mutation dictionary: a list of byte tokens spliced into inputs.
///
/// File format is one token per line. Lines starting with `#` and blank
/// lines are ignored. `\xNN` escapes embed arbitrary bytes; `\\` embeds a
/// literal backslash.
#[derive(Debug, Default, Clone)]
pub struct Dictionary {
    tokens: Vec<Vec<u8>>,
}

impl Dictionary {
    pub fn load(path: &Path) -> Result<Self, LoaderError> {
        let content = fs::read_to_string(path).map_err(|e| LoaderError::Io {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;

        let mut tokens = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let token = unescape_token(line).map_err(|msg| LoaderError::DictionaryParse {
                path: path.to_path_buf(),
                line: line_no + 1,
                msg,
            })?;
            if !token.is_empty() {
                tokens.push(token);
            }
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&[u8]> {
        self.tokens.get(id).map(|t| t.as_slice())
    }
}

fn unescape_token(line: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(line.len());
    let mut bytes = line.bytes();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'\\') => out.push(b'\\'),
            Some(b'x') => {
                let hi = bytes.next().ok_or("truncated \\x escape")?;
                let lo = bytes.next().ok_or("truncated \\x escape")?;
                let hex = [hi, lo];
                let hex_str = std::str::from_utf8(&hex).map_err(|_| "non-ASCII hex digits")?;
                let value = u8::from_str_radix(hex_str, 16)
                    .map_err(|_| format!("invalid hex escape '\\x{hex_str}'"))?;
                out.push(value);
            }
            Some(other) => return Err(format!("unknown escape '\\{}'", other as char)),
            None => return Err("trailing backslash".to_string()),
        }
    }
    Ok(out)
}

/// Loads a symbol filter list (one glob per line, `#` comments).
///
/// An existing file that parses to zero entries is an error: a filter that
/// matches nothing is a misconfiguration, not a no-op.
pub fn load_symbol_filter(path: &Path) -> Result<Vec<String>, LoaderError> {
    let content = fs::read_to_string(path).map_err(|e| LoaderError::Io {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })?;
    let symbols: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect();
    if symbols.is_empty() {
        return Err(LoaderError::EmptySymbolFilter(path.to_path_buf()));
    }
    Ok(symbols)
}
