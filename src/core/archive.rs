//! Archive Assembler
//!
//! Rewrites a captured playlist so every segment reference points at a bare
//! local filename, then packs the fetched segments and the rewritten playlist
//! into one compressed container. Segments are written as they arrive so the
//! orchestrator can hand each batch off instead of buffering the whole stream.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::sync::Arc;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::models::{AppError, AppResult, Manifest};
use crate::parsers::m3u8_parser::{extract_filename, is_segment_line};
use crate::utils::file_utils::{file_stem, get_file_extension, sanitize_filename};

/// What to do when two segment URLs extract to the same local filename
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Later duplicates get a `-<n>` suffix before the extension
    #[default]
    Disambiguate,
    /// Later duplicates share the first name; only the first is archived
    FirstWrite,
}

/// Compression primitive: named byte buffers in, one container out
pub trait ArchiveWriter: Send {
    fn add_entry(&mut self, name: &str, data: &[u8], compress: bool) -> AppResult<()>;

    fn finish(self: Box<Self>) -> AppResult<Vec<u8>>;
}

/// Factory for archive writers of one container format
pub trait ArchiveBackend: Send + Sync {
    fn extension(&self) -> &str;

    fn create_writer(&self) -> AppResult<Box<dyn ArchiveWriter>>;
}

/// Zip container held in memory
#[derive(Debug, Clone)]
pub struct ZipBackend {
    extension: String,
    compression_level: Option<i32>,
}

impl ZipBackend {
    pub fn new(extension: impl Into<String>, compression_level: Option<i32>) -> Self {
        Self {
            extension: extension.into(),
            compression_level,
        }
    }
}

impl Default for ZipBackend {
    fn default() -> Self {
        Self::new("zip", None)
    }
}

impl ArchiveBackend for ZipBackend {
    fn extension(&self) -> &str {
        &self.extension
    }

    fn create_writer(&self) -> AppResult<Box<dyn ArchiveWriter>> {
        Ok(Box::new(ZipArchiveWriter {
            zip: ZipWriter::new(Cursor::new(Vec::new())),
            compression_level: self.compression_level,
        }))
    }
}

struct ZipArchiveWriter {
    zip: ZipWriter<Cursor<Vec<u8>>>,
    compression_level: Option<i32>,
}

fn zip_error(error: impl std::fmt::Display) -> AppError {
    AppError::AssemblyFailed(error.to_string())
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_entry(&mut self, name: &str, data: &[u8], compress: bool) -> AppResult<()> {
        let options = if compress {
            FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(self.compression_level)
        } else {
            FileOptions::default().compression_method(CompressionMethod::Stored)
        };
        let options = options.large_file(data.len() as u64 >= u32::MAX as u64);

        self.zip.start_file(name, options).map_err(zip_error)?;
        self.zip.write_all(data).map_err(zip_error)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> AppResult<Vec<u8>> {
        let cursor = self.zip.finish().map_err(zip_error)?;
        Ok(cursor.into_inner())
    }
}

/// Local archive names for each segment, in playback order.
///
/// `reserved` names (the playlist's own entry) are never handed out to
/// segments under [`CollisionPolicy::Disambiguate`].
pub fn local_segment_names(
    segments: &[String],
    policy: CollisionPolicy,
    reserved: &[&str],
) -> Vec<String> {
    let mut used: HashSet<String> = reserved.iter().map(|name| name.to_string()).collect();

    segments
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let mut name = sanitize_filename(&extract_filename(url));
            if name.is_empty() {
                name = format!("segment_{:06}.ts", index);
            }

            if policy == CollisionPolicy::FirstWrite || used.insert(name.clone()) {
                return name;
            }

            let stem = file_stem(&name).to_string();
            let extension = get_file_extension(&name)
                .filter(|_| stem != name)
                .map(|ext| format!(".{}", ext))
                .unwrap_or_default();
            let mut suffix = 1usize;
            loop {
                let candidate = format!("{}-{}{}", stem, suffix, extension);
                if used.insert(candidate.clone()) {
                    return candidate;
                }
                suffix += 1;
            }
        })
        .collect()
}

/// Replace every segment line with its local name, leaving tags, comments,
/// blank lines and line endings exactly as captured.
///
/// The k-th segment line takes `local_names[k]`; lines past the end of the
/// list fall back to their own extracted filename.
pub fn rewrite_playlist(raw: &str, local_names: &[String]) -> String {
    let mut rewritten = String::with_capacity(raw.len());
    let mut segment_index = 0usize;

    for piece in raw.split_inclusive('\n') {
        let (line, ending) = split_line_ending(piece);

        if is_segment_line(line) {
            let name = local_names
                .get(segment_index)
                .cloned()
                .unwrap_or_else(|| extract_filename(line.trim()));
            rewritten.push_str(&name);
            segment_index += 1;
        } else {
            rewritten.push_str(line);
        }
        rewritten.push_str(ending);
    }

    rewritten
}

fn split_line_ending(piece: &str) -> (&str, &str) {
    if let Some(line) = piece.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = piece.strip_suffix('\n') {
        (line, "\n")
    } else {
        (piece, "")
    }
}

/// Builds the archive for one manifest, playlist entry added last
pub struct ArchiveAssembler {
    backend: Arc<dyn ArchiveBackend>,
    policy: CollisionPolicy,
    compress_segments: bool,
}

impl ArchiveAssembler {
    pub fn new(
        backend: Arc<dyn ArchiveBackend>,
        policy: CollisionPolicy,
        compress_segments: bool,
    ) -> Self {
        Self {
            backend,
            policy,
            compress_segments,
        }
    }

    pub fn extension(&self) -> &str {
        self.backend.extension()
    }

    pub fn begin(&self, manifest: &Manifest) -> AppResult<ArchiveSession> {
        let playlist_name = playlist_entry_name(manifest);
        let local_names =
            local_segment_names(&manifest.segments, self.policy, &[playlist_name.as_str()]);
        let rewritten_playlist = rewrite_playlist(&manifest.raw_content, &local_names);

        let mut written = HashSet::new();
        written.insert(playlist_name.clone());

        Ok(ArchiveSession {
            writer: self.backend.create_writer()?,
            playlist_name,
            rewritten_playlist,
            local_names,
            written,
            compress_segments: self.compress_segments,
            segments_written: 0,
        })
    }

    /// One-shot assembly; `fetched[i]` is `None` for segments that never arrived
    pub fn assemble(&self, manifest: &Manifest, fetched: &[Option<Bytes>]) -> AppResult<Vec<u8>> {
        let mut session = self.begin(manifest)?;
        for (index, data) in fetched.iter().enumerate() {
            if let Some(data) = data {
                session.add_segment(index, data)?;
            }
        }
        session.finish()
    }
}

fn playlist_entry_name(manifest: &Manifest) -> String {
    let name = sanitize_filename(&manifest.file_name);
    if name.is_empty() {
        "playlist.m3u8".to_string()
    } else {
        name
    }
}

/// Archive under construction for one download run
pub struct ArchiveSession {
    writer: Box<dyn ArchiveWriter>,
    playlist_name: String,
    rewritten_playlist: String,
    local_names: Vec<String>,
    written: HashSet<String>,
    compress_segments: bool,
    segments_written: usize,
}

impl ArchiveSession {
    pub fn local_name(&self, index: usize) -> Option<&str> {
        self.local_names.get(index).map(String::as_str)
    }

    pub fn rewritten_playlist(&self) -> &str {
        &self.rewritten_playlist
    }

    pub fn segments_written(&self) -> usize {
        self.segments_written
    }

    /// Add segment `index`; returns false when its name was already taken
    pub fn add_segment(&mut self, index: usize, data: &[u8]) -> AppResult<bool> {
        let name = self
            .local_names
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::AssemblyFailed(format!("No segment at index {}", index)))?;

        if !self.written.insert(name.clone()) {
            tracing::debug!("Skipping duplicate archive entry {} for segment {}", name, index);
            return Ok(false);
        }

        self.writer.add_entry(&name, data, self.compress_segments)?;
        self.segments_written += 1;
        Ok(true)
    }

    pub fn finish(mut self) -> AppResult<Vec<u8>> {
        self.writer
            .add_entry(&self.playlist_name, self.rewritten_playlist.as_bytes(), true)?;
        self.writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::m3u8_parser::parse_playlist;
    use chrono::Utc;
    use std::io::Read;

    fn manifest(raw: &str, base: &str) -> Manifest {
        let parsed = parse_playlist(raw, base);
        Manifest {
            id: "m".to_string(),
            source_url: base.to_string(),
            raw_content: raw.to_string(),
            file_name: extract_filename(base),
            segments: parsed.segments,
            title: None,
            resolution: None,
            duration: parsed.duration,
            captured_at: Utc::now(),
            window_id: 1,
            tab_id: None,
        }
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let reader = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
        let mut names: Vec<String> = reader.file_names().map(str::to_string).collect();
        names.sort();
        names
    }

    fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
        let mut reader = zip::ZipArchive::new(Cursor::new(archive.to_vec())).unwrap();
        let mut file = reader.by_name(name).unwrap();
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_rewrite_preserves_tags_and_order() {
        let raw = "#EXTM3U\r\n#EXT-X-KEY:METHOD=NONE\r\n#EXTINF:10.0,\r\nhttps://cdn.ex.com/a/seg1.ts?sig=9\r\n\r\n#EXTINF:5.5,\r\n/b/seg2.ts\r\n#EXT-X-ENDLIST";
        let m = manifest(raw, "https://ex.com/v/p.m3u8");
        let names = local_segment_names(&m.segments, CollisionPolicy::Disambiguate, &[]);
        let rewritten = rewrite_playlist(raw, &names);

        assert_eq!(
            rewritten,
            "#EXTM3U\r\n#EXT-X-KEY:METHOD=NONE\r\n#EXTINF:10.0,\r\nseg1.ts\r\n\r\n#EXTINF:5.5,\r\nseg2.ts\r\n#EXT-X-ENDLIST"
        );
    }

    #[test]
    fn test_rewrite_round_trip_keeps_count_and_order() {
        let raw = "#EXTM3U\n#EXTINF:4,\nhttps://x.com/p/1.ts\n#EXTINF:4,\nrel/2.ts?x=1\n#EXTINF:4,\n/abs/3.ts\n";
        let m = manifest(raw, "https://x.com/p/list.m3u8");
        let names = local_segment_names(&m.segments, CollisionPolicy::Disambiguate, &[]);
        let rewritten = rewrite_playlist(raw, &names);

        let reparsed = parse_playlist(&rewritten, "https://local.invalid/archive/list.m3u8");
        assert_eq!(reparsed.segments.len(), m.segments.len());
        let reparsed_names: Vec<String> =
            reparsed.segments.iter().map(|s| extract_filename(s)).collect();
        assert_eq!(reparsed_names, vec!["1.ts", "2.ts", "3.ts"]);
        assert_eq!(reparsed.duration, m.duration);
    }

    #[test]
    fn test_collision_disambiguation() {
        let segments = vec![
            "https://a.com/x/seg.ts".to_string(),
            "https://b.com/y/seg.ts".to_string(),
            "https://c.com/z/seg.ts?q=1".to_string(),
            "https://c.com/z/index.m3u8".to_string(),
            "https://c.com/z/".to_string(),
        ];
        let names = local_segment_names(&segments, CollisionPolicy::Disambiguate, &["index.m3u8"]);
        assert_eq!(
            names,
            vec!["seg.ts", "seg-1.ts", "seg-2.ts", "index-1.m3u8", "z"]
        );

        let first_write = local_segment_names(&segments, CollisionPolicy::FirstWrite, &[]);
        assert_eq!(first_write[0], "seg.ts");
        assert_eq!(first_write[1], "seg.ts");
    }

    #[test]
    fn test_assemble_contains_playlist_and_fetched_segments_only() {
        let raw = "#EXTM3U\n#EXTINF:1,\ns1.ts\n#EXTINF:1,\ns2.ts\n#EXTINF:1,\ns3.ts\n";
        let m = manifest(raw, "https://ex.com/v/video.m3u8");
        let assembler = ArchiveAssembler::new(
            Arc::new(ZipBackend::default()),
            CollisionPolicy::Disambiguate,
            false,
        );

        let fetched = vec![
            Some(Bytes::from_static(b"one")),
            None,
            Some(Bytes::from_static(b"three")),
        ];
        let archive = assembler.assemble(&m, &fetched).unwrap();

        assert_eq!(entry_names(&archive), vec!["s1.ts", "s3.ts", "video.m3u8"]);
        assert_eq!(read_entry(&archive, "s3.ts"), b"three");
        let playlist = String::from_utf8(read_entry(&archive, "video.m3u8")).unwrap();
        assert_eq!(playlist, raw);
    }

    #[test]
    fn test_first_write_keeps_first_duplicate() {
        let raw = "#EXTM3U\nhttps://a.com/x/seg.ts\nhttps://b.com/y/seg.ts\n";
        let m = manifest(raw, "https://ex.com/v/p.m3u8");
        let assembler = ArchiveAssembler::new(
            Arc::new(ZipBackend::default()),
            CollisionPolicy::FirstWrite,
            true,
        );

        let mut session = assembler.begin(&m).unwrap();
        assert!(session.add_segment(0, b"first").unwrap());
        assert!(!session.add_segment(1, b"second").unwrap());
        assert_eq!(session.segments_written(), 1);
        assert_eq!(session.rewritten_playlist(), "#EXTM3U\nseg.ts\nseg.ts\n");

        let archive = session.finish().unwrap();
        assert_eq!(read_entry(&archive, "seg.ts"), b"first");
    }

    #[test]
    fn test_unknown_segment_index_fails_assembly() {
        let m = manifest("#EXTM3U\na.ts\n", "https://ex.com/p.m3u8");
        let assembler = ArchiveAssembler::new(
            Arc::new(ZipBackend::default()),
            CollisionPolicy::Disambiguate,
            false,
        );
        let mut session = assembler.begin(&m).unwrap();
        assert!(matches!(
            session.add_segment(5, b"x"),
            Err(AppError::AssemblyFailed(_))
        ));
        assert_eq!(session.local_name(0), Some("a.ts"));
    }
}
