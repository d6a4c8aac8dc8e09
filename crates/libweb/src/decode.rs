//! Content-sniffing decompression of response bodies

use crate::error::{Result, WebError};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

/// Container type detected from leading magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Zip,
    Gzip,
    Plain,
}

impl ContentKind {
    /// Sniff the buffer; declared `Content-Type` headers are not consulted
    pub fn sniff(content: &[u8]) -> Self {
        if infer::archive::is_zip(content) {
            ContentKind::Zip
        } else if infer::archive::is_gz(content) {
            ContentKind::Gzip
        } else {
            ContentKind::Plain
        }
    }
}

/// Decompress `content` according to its sniffed type
///
/// Zip archives yield their first member in archive order, gzip streams are
/// inflated whole, and anything else is returned unchanged.
pub fn decode(content: &[u8]) -> Result<Vec<u8>> {
    let kind = ContentKind::sniff(content);
    debug!(?kind, bytes = content.len(), "decoding response body");

    match kind {
        ContentKind::Zip => {
            let mut archive = ZipArchive::new(Cursor::new(content))?;
            if archive.is_empty() {
                return Err(WebError::Decompression("zip archive has no members".into()));
            }
            let mut member = archive.by_index(0)?;
            let mut out = Vec::new();
            member
                .read_to_end(&mut out)
                .map_err(|e| WebError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ContentKind::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(content)
                .read_to_end(&mut out)
                .map_err(|e| WebError::Decompression(e.to_string()))?;
            Ok(out)
        }
        ContentKind::Plain => Ok(content.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    const PLAINTEXT: &[u8] = b"{\"positives\": 3}\n";

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn zip_members(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_gzip_roundtrip() {
        let packed = gzip(PLAINTEXT);
        assert_eq!(ContentKind::sniff(&packed), ContentKind::Gzip);
        assert_eq!(decode(&packed).unwrap(), PLAINTEXT);
    }

    #[test]
    fn test_zip_first_member() {
        let packed = zip_members(&[("a.json", PLAINTEXT), ("b.json", b"ignored")]);
        assert_eq!(ContentKind::sniff(&packed), ContentKind::Zip);
        assert_eq!(decode(&packed).unwrap(), PLAINTEXT);
    }

    #[test]
    fn test_plain_passthrough() {
        assert_eq!(ContentKind::sniff(PLAINTEXT), ContentKind::Plain);
        assert_eq!(decode(PLAINTEXT).unwrap(), PLAINTEXT);
        assert!(decode(b"").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_containers() {
        let mut truncated = gzip(PLAINTEXT);
        truncated.truncate(12);
        assert!(matches!(decode(&truncated), Err(WebError::Decompression(_))));

        let bogus_zip = b"PK\x03\x04garbage that is not an archive";
        assert!(matches!(decode(bogus_zip), Err(WebError::Decompression(_))));
    }
}
