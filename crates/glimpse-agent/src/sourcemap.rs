//! Source map ingestion and position translation.
//!
//! Emitted `.map` files are loaded once at startup. Each map contributes a
//! consumer (its decoded mapping list) plus an output-file association for
//! every source it lists, letting the agent translate a breakpoint location
//! in a transpiled input file to the position the runtime actually executes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceMapError {
    #[error("failed to read source map {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse source map {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid VLQ mappings in {path}")]
    Mappings { path: PathBuf },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSourceMap {
    version: u32,
    file: Option<String>,
    source_root: Option<String>,
    sources: Vec<String>,
    mappings: String,
}

/// One decoded mapping: generated position → original position. All fields
/// 0-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct MappingEntry {
    generated_line: u32,
    generated_column: u32,
    source: u32,
    original_line: u32,
    original_column: u32,
}

struct MapConsumer {
    /// The `.map` file this consumer was loaded from.
    map_file: String,
    /// The runtime file this map describes.
    output_file: String,
    /// Entries in decode order (generated position order).
    entries: Vec<MappingEntry>,
}

/// A translated position in the output file, 0-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

#[derive(Default)]
pub struct SourceMapper {
    consumers: Vec<MapConsumer>,
    /// Normalized input path → (consumer index, source index within the map).
    by_input: HashMap<String, (usize, u32)>,
}

impl SourceMapper {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every `.map` file. Maps with an empty source list are skipped;
    /// unreadable or undecodable maps fail the load.
    pub fn from_map_files(map_paths: &[PathBuf]) -> Result<Self, SourceMapError> {
        let mut mapper = Self::default();
        for path in map_paths {
            mapper.load_map(path)?;
        }
        Ok(mapper)
    }

    fn load_map(&mut self, path: &Path) -> Result<(), SourceMapError> {
        let text = std::fs::read_to_string(path).map_err(|source| SourceMapError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawSourceMap =
            serde_json::from_str(&text).map_err(|source| SourceMapError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if raw.version != 3 {
            tracing::warn!(map = %path.display(), version = raw.version, "unexpected source map version");
        }
        if raw.sources.is_empty() {
            tracing::warn!(map = %path.display(), "source map lists no sources; skipping");
            return Ok(());
        }

        let map_file = normalize(&path.to_string_lossy());
        let map_dir = parent_of(&map_file);
        let output_file = match &raw.file {
            Some(file) if !file.is_empty() => join(map_dir, &normalize(file)),
            _ => {
                // `out.js.map` describes `out.js`.
                let base = basename(&map_file);
                let output = base.strip_suffix(".map").unwrap_or(base);
                join(map_dir, output)
            }
        };

        let entries =
            decode_mappings(&raw.mappings).ok_or_else(|| SourceMapError::Mappings {
                path: path.to_path_buf(),
            })?;

        let consumer_index = self.consumers.len();
        self.consumers.push(MapConsumer {
            map_file: map_file.clone(),
            output_file,
            entries,
        });

        let source_root = raw.source_root.as_deref().unwrap_or("");
        for (source_index, source) in raw.sources.iter().enumerate() {
            let mut input = normalize(source);
            if !source_root.is_empty() {
                input = join(&normalize(source_root), &input);
            }
            if !input.starts_with('/') {
                input = join(map_dir, &input);
            }
            self.by_input
                .entry(input)
                .or_insert((consumer_index, source_index as u32));
        }
        Ok(())
    }

    pub fn has_mapping_info(&self, input_path: &str) -> bool {
        self.lookup(input_path).is_some()
    }

    /// The `.map` file that covers `input_path`, for diagnostics.
    pub fn map_file_for(&self, input_path: &str) -> Option<&str> {
        self.lookup(input_path)
            .map(|(consumer, _)| self.consumers[consumer].map_file.as_str())
    }

    /// Translate an input-file position (0-based) to the output file.
    ///
    /// All generated positions for the input line are considered and the one
    /// with the smallest generated line wins (ties broken by consumer
    /// order); when the line has no exact mapping, the nearest mapping at or
    /// after the requested position is used, then the nearest before it.
    pub fn mapping_info(
        &self,
        input_path: &str,
        line: u32,
        column: u32,
    ) -> Option<MappedPosition> {
        let (consumer_index, source) = self.lookup(input_path)?;
        let consumer = &self.consumers[consumer_index];
        let for_source: Vec<MappingEntry> = consumer
            .entries
            .iter()
            .filter(|e| e.source == source)
            .copied()
            .collect();

        let line_matches: Vec<MappingEntry> = for_source
            .iter()
            .filter(|e| e.original_line == line)
            .copied()
            .collect();
        if !line_matches.is_empty() {
            let mut candidates: Vec<MappingEntry> = line_matches
                .iter()
                .filter(|e| e.original_column >= column)
                .copied()
                .collect();
            if candidates.is_empty() {
                candidates = line_matches;
            }
            let best = candidates
                .iter()
                .min_by_key(|e| e.generated_line)
                .expect("non-empty candidates");
            return Some(MappedPosition {
                file: consumer.output_file.clone(),
                line: best.generated_line,
                column: best.generated_column,
            });
        }

        // No mapping on that exact line: least upper bound on the original
        // position, then greatest lower bound.
        let upper = for_source
            .iter()
            .filter(|e| (e.original_line, e.original_column) >= (line, column))
            .min_by_key(|e| (e.original_line, e.original_column));
        let entry = upper.or_else(|| {
            for_source
                .iter()
                .filter(|e| (e.original_line, e.original_column) < (line, column))
                .max_by_key(|e| (e.original_line, e.original_column))
        })?;
        Some(MappedPosition {
            file: consumer.output_file.clone(),
            line: entry.generated_line,
            column: entry.generated_column,
        })
    }

    fn lookup(&self, input_path: &str) -> Option<(usize, u32)> {
        let input = normalize(input_path);
        if let Some(found) = self.by_input.get(&input) {
            return Some(*found);
        }
        // Unique path-suffix match, so relative hints still resolve.
        let mut found = None;
        for (key, value) in &self.by_input {
            if key.ends_with(&input)
                && (key.len() == input.len()
                    || key.as_bytes()[key.len() - input.len() - 1] == b'/')
            {
                if found.is_some() {
                    return None;
                }
                found = Some(*value);
            }
        }
        found
    }
}

fn normalize(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.strip_prefix("./").map(str::to_string).unwrap_or(path)
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn join(dir: &str, rest: &str) -> String {
    if dir.is_empty() || rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("{dir}/{rest}")
    }
}

const BASE64_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn base64_value(byte: u8) -> Option<i64> {
    BASE64_CHARS.iter().position(|b| *b == byte).map(|v| v as i64)
}

/// Decode one VLQ segment into its values.
fn decode_segment(segment: &str) -> Option<Vec<i64>> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0u32;
    for byte in segment.bytes() {
        let digit = base64_value(byte)?;
        value |= (digit & 31) << shift;
        if digit & 32 != 0 {
            shift += 5;
            if shift > 62 {
                return None;
            }
        } else {
            let negative = value & 1 == 1;
            value >>= 1;
            values.push(if negative { -value } else { value });
            value = 0;
            shift = 0;
        }
    }
    if shift != 0 {
        return None;
    }
    Some(values)
}

/// Decode a `mappings` string. Generated columns reset per generated line;
/// source index and original line/column deltas accumulate across the whole
/// map.
fn decode_mappings(mappings: &str) -> Option<Vec<MappingEntry>> {
    let mut entries = Vec::new();
    let mut source = 0i64;
    let mut original_line = 0i64;
    let mut original_column = 0i64;

    for (generated_line, line) in mappings.split(';').enumerate() {
        let mut generated_column = 0i64;
        for segment in line.split(',') {
            if segment.is_empty() {
                continue;
            }
            let fields = decode_segment(segment)?;
            if fields.is_empty() {
                return None;
            }
            generated_column += fields[0];
            if fields.len() >= 4 {
                source += fields[1];
                original_line += fields[2];
                original_column += fields[3];
                if generated_column < 0 || source < 0 || original_line < 0 || original_column < 0
                {
                    return None;
                }
                entries.push(MappingEntry {
                    generated_line: generated_line as u32,
                    generated_column: generated_column as u32,
                    source: source as u32,
                    original_line: original_line as u32,
                    original_column: original_column as u32,
                });
            }
        }
    }
    Some(entries)
}
