//! Streaming ZIP archives of a shared subtree
//!
//! Writes a stored (uncompressed) ZIP incrementally: local header, file
//! bytes, then a data descriptor per entry, with the central directory at the
//! end. Data descriptors (general-purpose bit 3) mean no buffering and no
//! seeking, so the archive can flow straight into DATA frames while CRCs are
//! computed on the fly. ZIP64 is not produced; files that don't fit the
//! classic format are skipped.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::origin::listing::is_excluded;
use crate::origin::serve::ChunkWriter;
use crate::protocol::MAX_CHUNK_SIZE;

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

/// Version needed to extract: 2.0 (data descriptors)
const ZIP_VERSION: u16 = 20;
/// General-purpose flags: bit 3 (data descriptor) + bit 11 (UTF-8 names)
const ZIP_FLAGS: u16 = 0x0808;
/// Fixed timestamp: 1980-01-01 00:00 in DOS date format
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = 0x0021;

struct CentralRecord {
    name: String,
    crc: u32,
    size: u32,
    offset: u32,
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Walk the subtree and return `(absolute_path, archive_name)` pairs,
/// directories-first depth order with name-sorted siblings. Symlinks are
/// skipped so an archive cannot reach outside the resolved subtree.
async fn collect_files(
    dir: &Path,
    exclude: &[String],
) -> std::io::Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    let mut stack = vec![(dir.to_path_buf(), String::new())];

    while let Some((current, prefix)) = stack.pop() {
        let mut reader = tokio::fs::read_dir(&current).await?;
        let mut subdirs = Vec::new();
        let mut plain = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_excluded(&name, exclude) {
                continue;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_symlink() {
                continue;
            }
            let archive_name = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            if file_type.is_dir() {
                subdirs.push((entry.path(), archive_name));
            } else {
                plain.push((entry.path(), archive_name));
            }
        }

        plain.sort_by(|a, b| a.1.cmp(&b.1));
        files.extend(plain);

        subdirs.sort_by(|a, b| b.1.cmp(&a.1));
        stack.extend(subdirs);
    }

    Ok(files)
}

/// Stream a stored ZIP of `dir` into the chunk writer
///
/// `total_budget` is the share's remaining byte allowance; files that no
/// longer fit the budget are left out of the archive.
///
/// # Errors
///
/// Returns a session error if the duplex channel closes, or a connection
/// error if the subtree cannot be read at all. Individual unreadable or
/// oversized files are skipped.
pub(crate) async fn write_zip(
    writer: &mut ChunkWriter,
    dir: &Path,
    exclude: &[String],
    max_file_size: Option<u64>,
    total_budget: Option<u64>,
) -> Result<()> {
    let files = collect_files(dir, exclude).await?;
    let mut central: Vec<CentralRecord> = Vec::new();

    for (path, name) in files {
        let Ok(metadata) = tokio::fs::metadata(&path).await else {
            continue;
        };
        let size = metadata.len();
        if size > u64::from(u32::MAX) {
            tracing::warn!(file = %path.display(), "file too large for archive; skipped");
            continue;
        }
        if let Some(limit) = max_file_size {
            if size > limit {
                tracing::debug!(file = %path.display(), "file over size limit; skipped");
                continue;
            }
        }
        if let Some(budget) = total_budget {
            if writer.written.saturating_add(size) > budget {
                tracing::debug!(file = %path.display(), "file over transfer budget; skipped");
                continue;
            }
        }
        let Ok(mut file) = File::open(&path).await else {
            tracing::warn!(file = %path.display(), "unreadable file skipped from archive");
            continue;
        };

        let offset = u32::try_from(writer.written).unwrap_or(u32::MAX);

        // Local header with zeroed CRC/sizes; the descriptor carries them
        let name_bytes = name.as_bytes();
        let mut header = Vec::with_capacity(30 + name_bytes.len());
        put_u32(&mut header, LOCAL_HEADER_SIG);
        put_u16(&mut header, ZIP_VERSION);
        put_u16(&mut header, ZIP_FLAGS);
        put_u16(&mut header, 0); // method: stored
        put_u16(&mut header, DOS_TIME);
        put_u16(&mut header, DOS_DATE);
        put_u32(&mut header, 0); // crc
        put_u32(&mut header, 0); // compressed size
        put_u32(&mut header, 0); // uncompressed size
        put_u16(&mut header, name_bytes.len() as u16);
        put_u16(&mut header, 0); // extra length
        header.extend_from_slice(name_bytes);
        writer.write(&header).await?;

        let mut hasher = crc32fast::Hasher::new();
        let mut streamed: u64 = 0;
        let mut buf = vec![0u8; MAX_CHUNK_SIZE];
        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                    streamed += n as u64;
                    writer.write(&buf[..n]).await?;
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "read failed; entry truncated");
                    break;
                }
            }
        }
        let crc = hasher.finalize();
        let streamed = u32::try_from(streamed).unwrap_or(u32::MAX);

        let mut descriptor = Vec::with_capacity(16);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIG);
        put_u32(&mut descriptor, crc);
        put_u32(&mut descriptor, streamed); // compressed == stored
        put_u32(&mut descriptor, streamed);
        writer.write(&descriptor).await?;

        central.push(CentralRecord {
            name,
            crc,
            size: streamed,
            offset,
        });
    }

    let central_offset = u32::try_from(writer.written).unwrap_or(u32::MAX);
    for record in &central {
        let name_bytes = record.name.as_bytes();
        let mut entry = Vec::with_capacity(46 + name_bytes.len());
        put_u32(&mut entry, CENTRAL_HEADER_SIG);
        put_u16(&mut entry, ZIP_VERSION); // version made by
        put_u16(&mut entry, ZIP_VERSION); // version needed
        put_u16(&mut entry, ZIP_FLAGS);
        put_u16(&mut entry, 0); // method: stored
        put_u16(&mut entry, DOS_TIME);
        put_u16(&mut entry, DOS_DATE);
        put_u32(&mut entry, record.crc);
        put_u32(&mut entry, record.size);
        put_u32(&mut entry, record.size);
        put_u16(&mut entry, name_bytes.len() as u16);
        put_u16(&mut entry, 0); // extra length
        put_u16(&mut entry, 0); // comment length
        put_u16(&mut entry, 0); // disk number
        put_u16(&mut entry, 0); // internal attributes
        put_u32(&mut entry, 0); // external attributes
        put_u32(&mut entry, record.offset);
        entry.extend_from_slice(name_bytes);
        writer.write(&entry).await?;
    }

    let central_size =
        u32::try_from(writer.written).unwrap_or(u32::MAX) - central_offset;
    let entries = u16::try_from(central.len()).unwrap_or(u16::MAX);
    let mut eocd = Vec::with_capacity(22);
    put_u32(&mut eocd, EOCD_SIG);
    put_u16(&mut eocd, 0); // this disk
    put_u16(&mut eocd, 0); // central directory disk
    put_u16(&mut eocd, entries);
    put_u16(&mut eocd, entries);
    put_u32(&mut eocd, central_size);
    put_u32(&mut eocd, central_offset);
    put_u16(&mut eocd, 0); // comment length
    writer.write(&eocd).await?;

    Ok(())
}
