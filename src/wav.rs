//! RIFF/WAVE codec for time announcements.
//!
//! Announcements are stitched together from several short fragments
//! (prefix, date, time). Rather than decoding and re-encoding audio, the PCM
//! payloads are concatenated byte-for-byte under the first file's format.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// File name prefix of every merged announcement written to the temp dir.
pub const MERGED_PREFIX: &str = "signalcue_time_";

const HEADER_LEN: usize = 44;

/// Contents of a `fmt ` chunk (PCM subset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl Default for WavFormat {
    /// 16-bit stereo at 44.1 kHz, used only when no input carried a format.
    fn default() -> Self {
        WavFormat {
            audio_format: 1,
            channels: 2,
            sample_rate: 44_100,
            byte_rate: 176_400,
            block_align: 4,
            bits_per_sample: 16,
        }
    }
}

/// Result of parsing a container: either chunk may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedWav {
    pub format: Option<WavFormat>,
    pub pcm: Option<Vec<u8>>,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Parse a RIFF/WAVE buffer into its format and PCM payload.
///
/// Unknown chunks are skipped. A `data` chunk whose declared size runs past
/// the end of the buffer is clamped to what is actually there; a chunk
/// *header* that does not fit is an error.
pub fn parse(bytes: &[u8]) -> Result<ParsedWav> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" {
        return Err(Error::MalformedContainer("missing RIFF magic".into()));
    }
    if &bytes[8..12] != b"WAVE" {
        return Err(Error::MalformedContainer("RIFF form is not WAVE".into()));
    }

    let mut parsed = ParsedWav::default();
    let mut pos = 12usize;
    while pos < bytes.len() {
        if pos + 8 > bytes.len() {
            return Err(Error::MalformedContainer(format!(
                "chunk header at offset {} overruns {} byte buffer",
                pos,
                bytes.len()
            )));
        }
        let id = &bytes[pos..pos + 4];
        let size = read_u32(bytes, pos + 4) as usize;
        let body = pos + 8;
        let available = bytes.len() - body;

        match id {
            // A truncated fmt chunk leaves the format unknown; the data
            // chunk is still collected.
            b"fmt " if parsed.format.is_none() && size >= 16 && available >= 16 => {
                parsed.format = Some(WavFormat {
                    audio_format: read_u16(bytes, body),
                    channels: read_u16(bytes, body + 2),
                    sample_rate: read_u32(bytes, body + 4),
                    byte_rate: read_u32(bytes, body + 8),
                    block_align: read_u16(bytes, body + 12),
                    bits_per_sample: read_u16(bytes, body + 14),
                });
            }
            b"data" => {
                let len = size.min(available);
                parsed
                    .pcm
                    .get_or_insert_with(Vec::new)
                    .extend_from_slice(&bytes[body..body + len]);
            }
            _ => {}
        }

        // Chunks are word aligned; odd sizes carry one pad byte.
        let padded = size.saturating_add(size & 1);
        pos = body.saturating_add(padded).min(bytes.len());
    }

    Ok(parsed)
}

/// Build a canonical 44-byte-header container around `pcm`.
pub fn encode(format: &WavFormat, pcm: &[u8]) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(HEADER_LEN + pcm.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.audio_format.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate.to_le_bytes());
    out.extend_from_slice(&format.block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Name of the merged file stamped with `stamp_ms` (milliseconds since epoch).
pub fn merged_file_name(stamp_ms: i64) -> String {
    format!("{}{}.wav", MERGED_PREFIX, stamp_ms)
}

/// Recover the creation stamp embedded in a merged file's name.
///
/// Returns `None` for anything that is not one of our merge outputs, so
/// source fragments passed through unchanged are never mistaken for temp files.
pub fn merged_stamp(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".wav")?;
    stem.strip_prefix(MERGED_PREFIX)?.parse().ok()
}

/// Concatenate the PCM of `paths` into one new file in `out_dir`.
///
/// A single input is returned as-is. Inputs that cannot be read or parsed,
/// or that carry no data chunk, are skipped. Reports [`Error::Empty`] when
/// nothing usable remains, in which case no file is written.
pub fn merge(paths: &[PathBuf], out_dir: &Path, stamp_ms: i64) -> Result<PathBuf> {
    match paths {
        [] => return Err(Error::Empty("no fragments to merge".into())),
        [only] => return Ok(only.clone()),
        _ => {}
    }

    let mut format: Option<WavFormat> = None;
    let mut pcm = Vec::new();
    for path in paths {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable fragment");
                continue;
            }
        };
        let parsed = match parse(&bytes) {
            Ok(p) => p,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed fragment");
                continue;
            }
        };
        let Some(data) = parsed.pcm else {
            warn!(file = %path.display(), "skipping fragment without data chunk");
            continue;
        };
        if format.is_none() {
            format = parsed.format;
        }
        pcm.extend_from_slice(&data);
    }

    if pcm.is_empty() {
        return Err(Error::Empty("merged fragments contain no PCM data".into()));
    }

    let out_path = out_dir.join(merged_file_name(stamp_ms));
    fs::write(&out_path, encode(&format.unwrap_or_default(), &pcm))?;
    debug!(file = %out_path.display(), bytes = pcm.len(), "wrote merged announcement");
    Ok(out_path)
}

/// Delete merged announcement files in `dir`.
///
/// With `older_than = None` every merge output goes; otherwise only those
/// stamped strictly before it. Returns how many files were removed.
pub fn sweep_merged(dir: &Path, older_than: Option<i64>) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stamp) = merged_stamp(&path) else {
            continue;
        };
        if older_than.is_some_and(|cutoff| stamp >= cutoff) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %path.display(), error = %e, "could not remove temp clip"),
        }
    }
    removed
}

/// Playing time of an audio file.
///
/// WAV files are measured from their data chunk and byte rate; everything
/// else goes through lofty's properties. `None` when the file is unreadable.
pub fn clip_duration(path: &Path) -> Option<Duration> {
    let is_wav = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if is_wav {
        let bytes = fs::read(path).ok()?;
        let parsed = parse(&bytes).ok()?;
        let format = parsed.format?;
        if format.byte_rate == 0 {
            return None;
        }
        let len = parsed.pcm.map_or(0, |p| p.len());
        return Some(Duration::from_secs_f64(len as f64 / format.byte_rate as f64));
    }

    use lofty::file::AudioFile;
    let tagged = lofty::read_from_path(path).ok()?;
    Some(tagged.properties().duration())
}
