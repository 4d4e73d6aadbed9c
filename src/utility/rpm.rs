// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
    str,
};

use anyhow::{anyhow, bail, Context, Result};
use byteorder::{BigEndian, ReadBytesExt};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use liblzma::read::XzDecoder;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressCounter;

const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
const LEAD_SIZE: usize = 96;
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];

const TAG_PAYLOAD_FORMAT: u32 = 1124;
const TAG_PAYLOAD_COMPRESSOR: u32 = 1125;
const TYPE_STRING: u32 = 6;

// Sanity bounds against corrupt headers.
const MAX_INDEX_ENTRIES: u32 = 0x10000;
const MAX_STORE_SIZE: u32 = 0x1000_0000;

/// Extract the first regular `vmlinux` member of an RPM payload into
/// `vmlinux_path`. The lead and headers are parsed just enough to learn the
/// payload format (must be cpio) and compression; the payload is then
/// streamed through the matching decoder.
pub fn extract_vmlinux(
    shutdown: &CancellationToken,
    rpm_path: &Path,
    vmlinux_path: &Path,
) -> Result<()> {
    let file = File::open(rpm_path)?;
    let mut reader = BufReader::new(file);

    let mut lead = [0u8; LEAD_SIZE];
    reader.read_exact(&mut lead).context("rpm lead read")?;
    if lead[..4] != LEAD_MAGIC {
        bail!("not an rpm file: {}", rpm_path.display());
    }

    // Signature header, padded to 8 bytes; its content does not matter here.
    let _ = read_header(&mut reader, true).context("rpm signature header")?;
    let header = read_header(&mut reader, false).context("rpm header")?;

    let format = header
        .string_tag(TAG_PAYLOAD_FORMAT)
        .unwrap_or_else(|| "cpio".to_string());
    if format != "cpio" {
        bail!("unsupported payload format: {}", format);
    }

    let compressor = header
        .string_tag(TAG_PAYLOAD_COMPRESSOR)
        .unwrap_or_else(|| "gzip".to_string());

    let payload: Box<dyn Read> = match compressor.as_str() {
        "xz" => Box::new(XzDecoder::new_multi_decoder(reader)),
        "zstd" => Box::new(zstd::stream::read::Decoder::new(reader).context("zstd reader")?),
        "gzip" => Box::new(GzDecoder::new(reader)),
        "bzip2" => Box::new(BzDecoder::new(reader)),
        other => bail!("unsupported compression: {}", other),
    };

    copy_vmlinux_from_cpio(shutdown, payload, vmlinux_path)
}

fn copy_vmlinux_from_cpio(
    shutdown: &CancellationToken,
    mut reader: impl Read,
    vmlinux_path: &Path,
) -> Result<()> {
    loop {
        if shutdown.is_cancelled() {
            bail!("rpm extraction canceled");
        }

        let entry = match CpioEntry::read(&mut reader).context("cpio next")? {
            Some(entry) => entry,
            None => break,
        };

        if !entry.is_regular() || !entry.name.contains("vmlinux") {
            entry.skip_data(&mut reader)?;
            continue;
        }

        let out = File::create(vmlinux_path)?;
        let mut counter = ProgressCounter::new(
            Some(shutdown.clone()),
            "Extract",
            &entry.name,
            entry.file_size,
            out,
        );
        let copied = io::copy(&mut (&mut reader).take(entry.file_size), &mut counter);
        match copied {
            Ok(n) if n == entry.file_size => return Ok(()),
            Ok(n) => {
                drop(counter);
                let _ = std::fs::remove_file(vmlinux_path);
                bail!("cpio file copy: short read of {} ({}/{} bytes)", entry.name, n, entry.file_size);
            }
            Err(err) => {
                drop(counter);
                let _ = std::fs::remove_file(vmlinux_path);
                return Err(anyhow!(err).context("cpio file copy"));
            }
        }
    }
    bail!("vmlinux file not found in rpm")
}

// One RPM header section: the index entries plus the store they point into.
struct HeaderSection {
    entries: Vec<IndexEntry>,
    store: Vec<u8>,
}

struct IndexEntry {
    tag: u32,
    typ: u32,
    offset: u32,
}

impl HeaderSection {
    fn string_tag(&self, tag: u32) -> Option<String> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.tag == tag && e.typ == TYPE_STRING)?;
        let start = entry.offset as usize;
        if start >= self.store.len() {
            return None;
        }
        let rest = &self.store[start..];
        let end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        str::from_utf8(&rest[..end]).ok().map(|s| s.to_string())
    }
}

fn read_header(reader: &mut impl Read, pad: bool) -> Result<HeaderSection> {
    let mut magic = [0u8; 3];
    reader.read_exact(&mut magic)?;
    if magic != HEADER_MAGIC {
        bail!("bad header magic");
    }
    let _version = reader.read_u8()?;
    let mut reserved = [0u8; 4];
    reader.read_exact(&mut reserved)?;

    let nindex = reader.read_u32::<BigEndian>()?;
    let hsize = reader.read_u32::<BigEndian>()?;
    if nindex > MAX_INDEX_ENTRIES || hsize > MAX_STORE_SIZE {
        bail!("oversized header (entries={}, store={})", nindex, hsize);
    }

    let mut entries = Vec::with_capacity(nindex as usize);
    for _ in 0..nindex {
        let tag = reader.read_u32::<BigEndian>()?;
        let typ = reader.read_u32::<BigEndian>()?;
        let offset = reader.read_u32::<BigEndian>()?;
        let _count = reader.read_u32::<BigEndian>()?;
        entries.push(IndexEntry { tag, typ, offset });
    }

    let mut store = vec![0u8; hsize as usize];
    reader.read_exact(&mut store)?;

    if pad {
        // The signature header is aligned to 8 bytes.
        let padding = (8 - (hsize as usize % 8)) % 8;
        io::copy(&mut reader.take(padding as u64), &mut io::sink())?;
    }

    Ok(HeaderSection { entries, store })
}

// A cpio "newc" entry header: fixed magic and thirteen 8-digit hex fields.
struct CpioEntry {
    name: String,
    mode: u64,
    file_size: u64,
}

impl CpioEntry {
    // Returns None at the TRAILER!!! entry.
    fn read(reader: &mut impl Read) -> Result<Option<CpioEntry>> {
        let mut magic = [0u8; 6];
        reader.read_exact(&mut magic)?;
        if &magic != b"070701" && &magic != b"070702" {
            bail!("bad cpio magic");
        }

        let mut fields = [0u64; 13];
        for field in fields.iter_mut() {
            let mut hex = [0u8; 8];
            reader.read_exact(&mut hex)?;
            let text = str::from_utf8(&hex).context("cpio header field")?;
            *field = u64::from_str_radix(text, 16).context("cpio header field")?;
        }
        let mode = fields[1];
        let file_size = fields[6];
        let name_size = fields[11] as usize;

        let mut name_buf = vec![0u8; name_size];
        reader.read_exact(&mut name_buf)?;
        // The header (110 bytes) plus the NUL-terminated name is padded to 4.
        let padding = pad4(110 + name_size);
        io::copy(&mut reader.take(padding as u64), &mut io::sink())?;

        let name = str::from_utf8(&name_buf)
            .context("cpio entry name")?
            .trim_end_matches('\0')
            .to_string();
        if name == "TRAILER!!!" {
            return Ok(None);
        }

        Ok(Some(CpioEntry {
            name,
            mode,
            file_size,
        }))
    }

    fn is_regular(&self) -> bool {
        self.mode & 0o170000 == 0o100000
    }

    fn skip_data(&self, reader: &mut impl Read) -> Result<()> {
        let skip = self.file_size + pad4(self.file_size as usize) as u64;
        io::copy(&mut reader.take(skip), &mut io::sink())?;
        Ok(())
    }
}

fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;

    fn cpio_entry(name: &str, mode: u64, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"070701");
        let name_size = (name.len() + 1) as u64;
        let fields = [
            1u64,              // ino
            mode,              // mode
            0,                 // uid
            0,                 // gid
            1,                 // nlink
            0,                 // mtime
            data.len() as u64, // filesize
            0,                 // devmajor
            0,                 // devminor
            0,                 // rdevmajor
            0,                 // rdevminor
            name_size,         // namesize
            0,                 // check
        ];
        for field in &fields {
            out.extend_from_slice(format!("{:08X}", field).as_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    fn header_section(tags: &[(u32, &str)]) -> Vec<u8> {
        let mut store = Vec::new();
        let mut index = Vec::new();
        for (tag, value) in tags {
            index.extend_from_slice(&tag.to_be_bytes());
            index.extend_from_slice(&TYPE_STRING.to_be_bytes());
            index.extend_from_slice(&(store.len() as u32).to_be_bytes());
            index.extend_from_slice(&1u32.to_be_bytes());
            store.extend_from_slice(value.as_bytes());
            store.push(0);
        }

        let mut out = Vec::new();
        out.extend_from_slice(&HEADER_MAGIC);
        out.push(1); // version
        out.extend_from_slice(&[0u8; 4]);
        out.extend_from_slice(&(tags.len() as u32).to_be_bytes());
        out.extend_from_slice(&(store.len() as u32).to_be_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&store);
        out
    }

    fn synthetic_rpm(vmlinux: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut lead = [0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(&LEAD_MAGIC);
        out.extend_from_slice(&lead);

        // empty signature header (store size 0 needs no alignment pad)
        out.extend_from_slice(&header_section(&[]));
        out.extend_from_slice(&header_section(&[
            (TAG_PAYLOAD_FORMAT, "cpio"),
            (TAG_PAYLOAD_COMPRESSOR, "gzip"),
        ]));

        let mut cpio = Vec::new();
        cpio.extend_from_slice(&cpio_entry("./usr", 0o040755, b""));
        cpio.extend_from_slice(&cpio_entry("./usr/lib/debug/config-5.0", 0o100644, b"CONFIG"));
        cpio.extend_from_slice(&cpio_entry(
            "./usr/lib/debug/lib/modules/5.0/vmlinux",
            0o100644,
            vmlinux,
        ));
        cpio.extend_from_slice(&cpio_entry("TRAILER!!!", 0, b""));

        let mut encoder = GzEncoder::new(&mut out, Compression::default());
        encoder.write_all(&cpio).unwrap();
        encoder.finish().unwrap();
        out
    }

    #[test]
    fn extracts_the_vmlinux_member() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("kernel-debuginfo.rpm");
        let vmlinux_path = dir.path().join("vmlinux-5.0");
        std::fs::write(&rpm_path, synthetic_rpm(b"FAKE VMLINUX BYTES")).unwrap();

        let shutdown = CancellationToken::new();
        extract_vmlinux(&shutdown, &rpm_path, &vmlinux_path).unwrap();
        assert_eq!(std::fs::read(&vmlinux_path).unwrap(), b"FAKE VMLINUX BYTES");
    }

    #[test]
    fn fails_when_no_vmlinux_member_exists() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("kernel-debuginfo.rpm");

        let mut bytes = Vec::new();
        let mut lead = [0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(&LEAD_MAGIC);
        bytes.extend_from_slice(&lead);
        bytes.extend_from_slice(&header_section(&[]));
        bytes.extend_from_slice(&header_section(&[
            (TAG_PAYLOAD_FORMAT, "cpio"),
            (TAG_PAYLOAD_COMPRESSOR, "gzip"),
        ]));
        let mut cpio = Vec::new();
        cpio.extend_from_slice(&cpio_entry("./usr", 0o040755, b""));
        cpio.extend_from_slice(&cpio_entry("TRAILER!!!", 0, b""));
        let mut encoder = GzEncoder::new(&mut bytes, Compression::default());
        encoder.write_all(&cpio).unwrap();
        encoder.finish().unwrap();
        std::fs::write(&rpm_path, bytes).unwrap();

        let shutdown = CancellationToken::new();
        let err = extract_vmlinux(&shutdown, &rpm_path, &dir.path().join("vmlinux"))
            .unwrap_err();
        assert!(err.to_string().contains("vmlinux file not found"));
    }

    #[test]
    fn rejects_non_cpio_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("weird.rpm");

        let mut bytes = Vec::new();
        let mut lead = [0u8; LEAD_SIZE];
        lead[..4].copy_from_slice(&LEAD_MAGIC);
        bytes.extend_from_slice(&lead);
        bytes.extend_from_slice(&header_section(&[]));
        bytes.extend_from_slice(&header_section(&[(TAG_PAYLOAD_FORMAT, "drpm")]));
        std::fs::write(&rpm_path, bytes).unwrap();

        let shutdown = CancellationToken::new();
        let err = extract_vmlinux(&shutdown, &rpm_path, &dir.path().join("vmlinux"))
            .unwrap_err();
        assert!(err.to_string().contains("unsupported payload format"));
    }

    #[test]
    fn rejects_a_bad_lead_magic() {
        let dir = tempfile::tempdir().unwrap();
        let rpm_path = dir.path().join("not.rpm");
        std::fs::write(&rpm_path, vec![0u8; 200]).unwrap();

        let shutdown = CancellationToken::new();
        assert!(extract_vmlinux(&shutdown, &rpm_path, &dir.path().join("vmlinux")).is_err());
    }
}
