//! Archive format detection and handling

use crate::{
    entry::EntryStream,
    error::ExtractionError,
    progress::{ProgressReader, ProgressReporter},
};
use std::ffi::OsStr;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Size of a tar header block. It is also the most the sniffer reads from a file.
pub const HEADER_LEN: usize = 512;

#[cfg(feature = "sevenz")]
const SEVENZ_MAGIC: &[u8] = &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
const ZIP_MAGICS: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Plain tar archive
    Tar,
    /// Gzip-compressed tar archive (.tar.gz, .tgz)
    TarGz,
    /// Bzip2-compressed tar archive (.tar.bz2, .tbz, .tbz2)
    TarBz2,
    /// XZ-compressed tar archive (.tar.xz, .txz)
    TarXz,
    /// Zstd-compressed tar archive (.tar.zst)
    TarZst,
    /// ZIP archive
    Zip,
    /// 7-Zip archive
    #[cfg(feature = "sevenz")]
    SevenZip,
}

impl ArchiveFormat {
    /// Identify the format of the file at `path` whose first bytes are `header`.
    ///
    /// Signatures win over the file name. Compressed streams are only accepted when they
    /// decompress to something that looks like a tar archive; a stream that cannot be
    /// decompressed at all is still reported so the extraction fails on it instead. When no
    /// signature matches, the extension decides. `Ok(None)` means no supported format
    /// recognizes the input.
    pub fn identify(path: &Path, header: &[u8]) -> io::Result<Option<Self>> {
        if let Some(format) = Self::detect_container(header) {
            return Ok(Some(format));
        }

        if let Some(format) = Self::detect_compression(header) {
            let file = fs_err::File::open(path)?;
            let Ok(reader) = format.decompress(BufReader::new(file)) else {
                return Ok(Some(format));
            };
            return Ok(match peek_tar_block(reader) {
                Ok(Some(block)) if looks_like_tar(&block) => Some(format),
                // Otherwise the name decides, e.g. for a stream shorter than one block
                Ok(_) if Self::detect_from_path(path) == Some(format) => Some(format),
                Ok(_) => None,
                Err(_) => Some(format),
            });
        }

        if looks_like_tar(header) {
            return Ok(Some(Self::Tar));
        }

        Ok(Self::detect_from_path(path))
    }

    /// Detect formats with their own container signature
    fn detect_container(header: &[u8]) -> Option<Self> {
        #[cfg(feature = "sevenz")]
        if header.starts_with(SEVENZ_MAGIC) {
            return Some(Self::SevenZip);
        }
        if ZIP_MAGICS.iter().any(|magic| header.starts_with(magic)) {
            return Some(Self::Zip);
        }
        None
    }

    /// Detect a compressed stream, assuming it wraps a tar archive
    fn detect_compression(header: &[u8]) -> Option<Self> {
        if header.starts_with(GZIP_MAGIC) {
            Some(Self::TarGz)
        } else if header.starts_with(BZIP2_MAGIC) {
            Some(Self::TarBz2)
        } else if header.starts_with(XZ_MAGIC) {
            Some(Self::TarXz)
        } else if header.starts_with(ZSTD_MAGIC) {
            Some(Self::TarZst)
        } else {
            None
        }
    }

    /// Detect archive format from filename
    pub fn detect_from_filename(filename: &str) -> Option<Self> {
        let filename = filename.to_lowercase();

        // Check for tar-based formats first (most specific to least specific)
        if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") || filename.ends_with(".taz")
        {
            return Some(Self::TarGz);
        }
        if filename.ends_with(".tar.bz2")
            || filename.ends_with(".tbz")
            || filename.ends_with(".tbz2")
            || filename.ends_with(".tz2")
        {
            return Some(Self::TarBz2);
        }
        if filename.ends_with(".tar.xz") || filename.ends_with(".txz") {
            return Some(Self::TarXz);
        }
        if filename.ends_with(".tar.zst") || filename.ends_with(".tzst") {
            return Some(Self::TarZst);
        }
        if filename.ends_with(".tar") {
            return Some(Self::Tar);
        }

        if filename.ends_with(".zip") {
            return Some(Self::Zip);
        }
        #[cfg(feature = "sevenz")]
        if filename.ends_with(".7z") {
            return Some(Self::SevenZip);
        }

        None
    }

    /// Detect archive format from file path
    pub fn detect_from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        path.as_ref()
            .file_name()
            .and_then(OsStr::to_str)
            .and_then(Self::detect_from_filename)
    }

    /// Open the archive at `path` as a stream of entries in container order.
    ///
    /// Source bytes consumed by tar-based formats are reported to `reporter`.
    pub fn open<'r, R>(
        self,
        path: &Path,
        reporter: &'r R,
    ) -> Result<EntryStream<'r>, ExtractionError>
    where
        R: ProgressReporter + ?Sized,
    {
        match self {
            Self::Zip => {
                let file = BufReader::new(fs_err::File::open(path)?);
                Ok(EntryStream::Zip(zip::ZipArchive::new(file)?))
            }
            #[cfg(feature = "sevenz")]
            Self::SevenZip => {
                sevenz_rust2::SevenZReader::open(path, sevenz_rust2::Password::empty())
                    .map(EntryStream::SevenZip)
                    .map_err(|e| ExtractionError::sevenz(e.to_string()))
            }
            _ => {
                let file = fs_err::File::open(path)?;
                let reader = ProgressReader::new(BufReader::new(file), reporter);
                Ok(EntryStream::Tar(tar::Archive::new(self.decompress(reader)?)))
            }
        }
    }

    /// Wrap `reader` in the decoder of a tar-based format
    fn decompress<'r, R: Read + 'r>(self, reader: R) -> io::Result<Box<dyn Read + 'r>> {
        Ok(match self {
            Self::TarGz => Box::new(flate2::read::GzDecoder::new(reader)),
            Self::TarBz2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Self::TarXz => Box::new(xz2::read::XzDecoder::new(reader)),
            Self::TarZst => Box::new(zstd::stream::read::Decoder::new(reader)?),
            _ => Box::new(reader),
        })
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tar => "TAR",
            Self::TarGz => "TAR.GZ",
            Self::TarBz2 => "TAR.BZ2",
            Self::TarXz => "TAR.XZ",
            Self::TarZst => "TAR.ZST",
            Self::Zip => "ZIP",
            #[cfg(feature = "sevenz")]
            Self::SevenZip => "7Z",
        }
    }

    /// Check if this is a tar-based format
    pub fn is_tar_based(&self) -> bool {
        matches!(self, Self::Tar | Self::TarGz | Self::TarBz2 | Self::TarXz | Self::TarZst)
    }
}

/// Read up to [`HEADER_LEN`] bytes from the start of `reader`.
pub fn read_header(reader: impl Read) -> io::Result<Vec<u8>> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    reader.take(HEADER_LEN as u64).read_to_end(&mut header)?;
    Ok(header)
}

/// Read the first tar block, `None` if the stream ends before a full block.
fn peek_tar_block(reader: impl Read) -> io::Result<Option<Vec<u8>>> {
    let block = read_header(reader)?;
    Ok((block.len() == HEADER_LEN).then_some(block))
}

/// A tar header, or the zero block that ends (and may entirely make up) a tar archive.
fn looks_like_tar(block: &[u8]) -> bool {
    is_tar_header(block) || (block.len() == HEADER_LEN && block.iter().all(|b| *b == 0))
}

/// Whether `block` is a tar header: ustar magic, or a checksum that adds up.
fn is_tar_header(block: &[u8]) -> bool {
    if block.len() < HEADER_LEN {
        return false;
    }
    if &block[257..262] == b"ustar" {
        return true;
    }

    let Some(expected) = parse_octal(&block[148..156]) else {
        return false;
    };
    let actual: u64 = block[..HEADER_LEN]
        .iter()
        .enumerate()
        .map(|(i, b)| if (148..156).contains(&i) { 0x20 } else { u64::from(*b) })
        .sum();
    expected == actual
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let digits = field
        .iter()
        .copied()
        .skip_while(|b| *b == b' ')
        .take_while(|b| (b'0'..=b'7').contains(b));
    let mut value = None;
    for digit in digits {
        value = Some(value.unwrap_or(0u64) * 8 + u64::from(digit - b'0'));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("small.txt").unwrap();
        header.set_size(5);
        header.set_cksum();
        builder.append(&header, "hello".as_bytes()).unwrap();
        builder.into_inner().unwrap()
    }

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs_err::write(&path, contents).unwrap();
        path
    }

    fn identify_file(path: &Path) -> Option<ArchiveFormat> {
        let header = read_header(fs_err::File::open(path).unwrap()).unwrap();
        ArchiveFormat::identify(path, &header).unwrap()
    }

    #[test]
    fn test_detect_tar_formats() {
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.tar"),
            Some(ArchiveFormat::Tar)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.tgz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.tar.bz2"),
            Some(ArchiveFormat::TarBz2)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.txz"),
            Some(ArchiveFormat::TarXz)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("file.tar.zst"),
            Some(ArchiveFormat::TarZst)
        );
    }

    #[test]
    fn test_detect_unknown_format() {
        assert_eq!(ArchiveFormat::detect_from_filename("file.txt"), None);
        assert_eq!(ArchiveFormat::detect_from_filename("file.unknown"), None);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(
            ArchiveFormat::detect_from_filename("FILE.TAR.GZ"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::detect_from_filename("File.Zip"),
            Some(ArchiveFormat::Zip)
        );
    }

    #[test]
    fn test_is_tar_based() {
        assert!(ArchiveFormat::Tar.is_tar_based());
        assert!(ArchiveFormat::TarGz.is_tar_based());
        assert!(!ArchiveFormat::Zip.is_tar_based());
    }

    #[test]
    fn test_tar_header_checksum() {
        let tar = tar_bytes();
        assert!(is_tar_header(&tar[..HEADER_LEN]));

        let mut old_style = tar.clone();
        old_style[257..265].fill(0);
        let mut header = tar::Header::new_old();
        header.as_mut_bytes().copy_from_slice(&old_style[..HEADER_LEN]);
        header.set_cksum();
        assert!(is_tar_header(header.as_bytes()));

        assert!(!is_tar_header(&[b'a'; HEADER_LEN]));
        assert!(!is_tar_header(&[0; HEADER_LEN]));
        assert!(!is_tar_header(&tar[..100]));
    }

    #[test]
    fn test_identify_ignores_misleading_names() {
        let dir = tempfile::tempdir().unwrap();

        let tar = write_file(dir.path(), "archive.bin", &tar_bytes());
        assert_eq!(identify_file(&tar), Some(ArchiveFormat::Tar));

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes()).unwrap();
        let gz = write_file(dir.path(), "archive.zip", &encoder.finish().unwrap());
        assert_eq!(identify_file(&gz), Some(ArchiveFormat::TarGz));

        let mut zip = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
        zip.start_file("small.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"hello").unwrap();
        let zip = write_file(dir.path(), "archive.tar", &zip.finish().unwrap().into_inner());
        assert_eq!(identify_file(&zip), Some(ArchiveFormat::Zip));
    }

    #[test]
    fn test_identify_rejects_compressed_non_tar() {
        let dir = tempfile::tempdir().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"I am a small file.\n").unwrap();
        let path = write_file(dir.path(), "notes.gz", &encoder.finish().unwrap());
        assert_eq!(identify_file(&path), None);
    }

    #[test]
    fn test_identify_empty_tarballs() {
        let dir = tempfile::tempdir().unwrap();
        let empty_tar = tar::Builder::new(Vec::new()).into_inner().unwrap();
        assert!(looks_like_tar(&empty_tar[..HEADER_LEN]));

        let raw = write_file(dir.path(), "empty.bin", &empty_tar);
        assert_eq!(identify_file(&raw), Some(ArchiveFormat::Tar));

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&empty_tar).unwrap();
        let gz = encoder.finish().unwrap();
        let nameless = write_file(dir.path(), "empty.bin.gz", &gz);
        assert_eq!(identify_file(&nameless), Some(ArchiveFormat::TarGz));

        // Nothing at all inside the stream, only the name says tar
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(b"").unwrap();
        let blank = encoder.finish().unwrap();
        let named = write_file(dir.path(), "blank.tgz", &blank);
        assert_eq!(identify_file(&named), Some(ArchiveFormat::TarGz));
        let unnamed = write_file(dir.path(), "blank.gz", &blank);
        assert_eq!(identify_file(&unnamed), None);
    }

    #[test]
    fn test_identify_undecodable_stream_keeps_format() {
        let dir = tempfile::tempdir().unwrap();
        // gzip magic followed by an unknown compression method
        let broken = [0x1F, 0x8B, 0x00, 0x00, 0, 0, 0, 0, 0, 0x03, 0xAA, 0xBB, 0xCC, 0xDD];
        let path = write_file(dir.path(), "broken", &broken);
        assert_eq!(identify_file(&path), Some(ArchiveFormat::TarGz));
    }

    #[test]
    fn test_identify_falls_back_to_extension() {
        let dir = tempfile::tempdir().unwrap();

        let corrupt = write_file(dir.path(), "corrupt.zip", b"this is not a zip file");
        assert_eq!(identify_file(&corrupt), Some(ArchiveFormat::Zip));

        let text = write_file(dir.path(), "small.txt", b"I am a small file.\n");
        assert_eq!(identify_file(&text), None);

        let empty = write_file(dir.path(), "empty", b"");
        assert_eq!(identify_file(&empty), None);
    }
}
