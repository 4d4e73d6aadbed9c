// Copyright (c) The btfhub authors
// SPDX-License-Identifier: MIT

use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::command::{run_cmd, CommandError};

/// Compress a BTF file into `out` as a `.tar.xz`. Member metadata is pinned
/// (name order, root ownership, mode 0444, epoch mtime) so that archiving the
/// same bytes twice produces identical output, whatever the source file's
/// mode or timestamps were. Delegated to the system tar so the bytes are
/// stable across hosts.
pub async fn tarball_btf(
    shutdown: &CancellationToken,
    btf: &Path,
    out: &Path,
) -> Result<(), CommandError> {
    let cwd = btf.parent();
    let input = btf
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let out = out.to_string_lossy().into_owned();

    run_cmd(
        shutdown,
        cwd,
        "tar",
        &[
            "-cvJ",
            "--sort=name",
            "--owner=root:0",
            "--group=root:0",
            "--mode=a=r",
            "--mtime=@0",
            "-f",
            &out,
            &input,
        ],
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use liblzma::read::XzDecoder;
    use std::{
        fs,
        os::unix::fs::PermissionsExt,
        path::PathBuf,
    };

    const FILENAME: &str = "test.btf";

    async fn write_tarball(out: &Path, mode: u32) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let btf = dir.path().join(FILENAME);
        fs::write(&btf, &[1u8]).unwrap();
        fs::set_permissions(&btf, fs::Permissions::from_mode(mode)).unwrap();

        let shutdown = CancellationToken::new();
        tarball_btf(&shutdown, &btf, out).await.unwrap();
        out.to_path_buf()
    }

    // Requires a GNU tar on PATH, as the production pipeline does.
    #[tokio::test]
    async fn identical_input_produces_identical_archives() {
        let outdir = tempfile::tempdir().unwrap();
        let out1 = outdir.path().join("test1.btf.tar.xz");
        let out2 = outdir.path().join("test2.btf.tar.xz");

        write_tarball(&out1, 0o666).await;
        write_tarball(&out2, 0o444).await;

        let stat1 = fs::metadata(&out1).unwrap();
        let stat2 = fs::metadata(&out2).unwrap();
        assert_eq!(stat1.len(), stat2.len(), "archive sizes differ");

        let data1 = fs::read(&out1).unwrap();
        let data2 = fs::read(&out2).unwrap();
        assert_eq!(data1, data2, "archive bytes differ");
    }

    #[tokio::test]
    async fn archived_entries_carry_pinned_metadata() {
        let outdir = tempfile::tempdir().unwrap();
        let out = outdir.path().join("test.btf.tar.xz");
        write_tarball(&out, 0o666).await;

        let file = fs::File::open(&out).unwrap();
        let mut archive = tar::Archive::new(XzDecoder::new(file));
        let mut seen = 0;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.mtime().unwrap(), 0, "mtime is not the epoch");
            assert_eq!(header.mode().unwrap() & 0o777, 0o444, "mode is not 0444");
            assert_eq!(header.uid().unwrap(), 0, "owner is not uid 0");
            assert_eq!(header.gid().unwrap(), 0, "group is not gid 0");
            seen += 1;
        }
        assert_eq!(seen, 1);
    }
}
