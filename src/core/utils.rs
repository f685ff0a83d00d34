use flate2::read::GzDecoder;
use regex::Regex;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;
use tar::Archive;
use tracing::error;

/// Compile `pattern` once into `cell`
///
/// A pattern that fails to compile is logged and yields `None` from then on.
pub fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("Invalid pattern {:?}: {}", pattern, e);
            None
        }
    })
    .as_ref()
}

/// Unpack a gzip-compressed tarball into `dest`, returning the number of
/// entries written.
pub fn extract_tar_gz<R: Read>(data: R, dest: &Path) -> anyhow::Result<usize> {
    std::fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(data));
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;

        // Tar slip protection: unpack_in refuses entries that would land
        // outside of dest and reports them as skipped
        if entry.unpack_in(dest)? {
            written += 1;
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn build_archive(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_extract_tar_gz() {
        let data = build_archive(&[
            ("python/bin/python3", b"#!/bin/sh\n"),
            ("python/lib/README", b"runtime"),
        ]);
        let dest = tempfile::tempdir().unwrap();

        let written = extract_tar_gz(data.as_slice(), dest.path()).unwrap();

        assert_eq!(written, 2);
        assert!(dest.path().join("python/bin/python3").exists());
        assert_eq!(
            std::fs::read_to_string(dest.path().join("python/lib/README")).unwrap(),
            "runtime"
        );
    }
}
