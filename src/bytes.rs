//! Payload providers and consumers for the commands layer.
//!
//! The transfer core only ever sees an opaque byte stream; folders become a
//! zip archive on the way in and are unpacked on the way out.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Cursor};
use std::path::Path;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Compress a folder into an in-memory zip archive, preserving the
/// directory structure relative to `path`.
pub fn compress_folder(path: &Path) -> io::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    add_dir_entries(&mut writer, path, path, &options)?;

    let cursor = writer
        .finish()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(cursor.into_inner())
}

fn add_dir_entries(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    base: &Path,
    dir: &Path,
    options: &FileOptions,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = path
            .strip_prefix(base)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .to_string_lossy()
            .into_owned();

        if entry.file_type()?.is_dir() {
            zip.add_directory(name, options.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            add_dir_entries(zip, base, &path, options)?;
        } else {
            zip.start_file(name, options.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }
    Ok(())
}

/// Unpack a received zip archive into `dest`.
pub fn decompress_folder(data: &[u8], dest: &Path) -> io::Result<()> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    archive
        .extract(dest)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// Buffered writer for the received file, truncating any previous run.
pub fn create_file_bufwriter(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::new(file))
}
