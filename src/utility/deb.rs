// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
    str,
};

use anyhow::{anyhow, bail, Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use liblzma::read::XzDecoder;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressCounter;

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_HEADER_SIZE: usize = 60;

/// Extract `./usr/lib/debug/boot/vmlinux-<stem>` from a Debian `.deb`/`.ddeb`
/// package (an ar archive holding a `data.tar.*` member) into `vmlinux_path`.
pub fn extract_vmlinux(
    shutdown: &CancellationToken,
    deb_path: &Path,
    stem: &str,
    vmlinux_path: &Path,
) -> Result<()> {
    let member_path = format!("./usr/lib/debug/boot/vmlinux-{}", stem);

    let file = File::open(deb_path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).context("ar magic read")?;
    if &magic != AR_MAGIC {
        bail!("not an ar archive: {}", deb_path.display());
    }

    loop {
        if reader.fill_buf()?.is_empty() {
            break;
        }

        let mut header = [0u8; AR_HEADER_SIZE];
        reader.read_exact(&mut header).context("ar header read")?;
        let name = str::from_utf8(&header[0..16])
            .context("ar member name")?
            .trim_end()
            .trim_end_matches('/')
            .to_string();
        let size: u64 = str::from_utf8(&header[48..58])
            .context("ar member size")?
            .trim()
            .parse()
            .context("ar member size")?;

        if name.starts_with("data.tar") {
            let member = (&mut reader).take(size);
            let data: Box<dyn Read + '_> = if name.ends_with(".xz") {
                Box::new(XzDecoder::new_multi_decoder(member))
            } else if name.ends_with(".gz") {
                Box::new(GzDecoder::new(member))
            } else if name.ends_with(".bz2") {
                Box::new(BzDecoder::new(member))
            } else if name.ends_with(".zst") {
                Box::new(zstd::stream::read::Decoder::new(member).context("zstd reader")?)
            } else {
                Box::new(member)
            };
            return copy_vmlinux_from_tar(shutdown, data, &member_path, vmlinux_path);
        }

        // ar member data is padded to an even offset
        let skip = size + size % 2;
        io::copy(&mut (&mut reader).take(skip), &mut io::sink())?;
    }

    bail!("data.tar member not found in {}", deb_path.display())
}

fn copy_vmlinux_from_tar(
    shutdown: &CancellationToken,
    reader: impl Read,
    member_path: &str,
    vmlinux_path: &Path,
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries().context("deb data.tar entries")? {
        if shutdown.is_cancelled() {
            bail!("deb extraction canceled");
        }

        let mut entry = entry.context("deb reader next")?;
        if entry.path_bytes().as_ref() != member_path.as_bytes() {
            continue;
        }

        let size = entry.header().size()?;
        let out = File::create(vmlinux_path).context("create vmlinux file")?;
        let mut counter =
            ProgressCounter::new(Some(shutdown.clone()), "Extract", member_path, size, out);
        if let Err(err) = io::copy(&mut entry, &mut counter) {
            drop(counter);
            let _ = std::fs::remove_file(vmlinux_path);
            return Err(anyhow!(err).context("copy file"));
        }
        return Ok(());
    }

    bail!("{} file not found in ddeb", member_path)
}
