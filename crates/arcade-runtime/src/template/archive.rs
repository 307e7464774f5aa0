use std::path::{Component, Path};

use tracing::trace;

use super::TemplateLoadCause;

/// Extract every entry of the zip at `zip_path` into `out_dir`.
///
/// Entries with absolute paths or `..` components are rejected before
/// anything is written for them. Returns the number of files written.
pub(super) fn extract(zip_path: &Path, out_dir: &Path) -> Result<usize, TemplateLoadCause> {
    let buf = std::fs::read(zip_path)?;
    let archive = rawzip::ZipArchive::from_slice(&buf)
        .map_err(|e| TemplateLoadCause::Archive(format!("{e:?}")))?;

    let mut files = 0;
    for entry in archive.entries() {
        let entry = entry.map_err(|e| TemplateLoadCause::Archive(format!("{e:?}")))?;
        let filename = entry
            .file_path()
            .try_normalize()
            .map_err(|e| TemplateLoadCause::UnsafeEntry(format!("{e:?}")))?
            .as_ref()
            .to_string();

        let path = Path::new(&filename);
        if path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(TemplateLoadCause::UnsafeEntry(filename));
        }
        if filename.is_empty() {
            continue;
        }

        let out_path = out_dir.join(path);
        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let wayfinder = entry.wayfinder();
        let slice_entry = archive
            .get_entry(wayfinder)
            .map_err(|e| TemplateLoadCause::Archive(format!("{e:?}")))?;
        let data = slice_entry.data();
        let mut out = std::fs::File::create(&out_path)?;
        let written = match entry.compression_method() {
            rawzip::CompressionMethod::Store => std::io::copy(&mut &*data, &mut out)?,
            rawzip::CompressionMethod::Deflate => {
                let mut decoder = flate2::read::DeflateDecoder::new(data);
                std::io::copy(&mut decoder, &mut out)?
            }
            method => {
                drop(out);
                let _ = std::fs::remove_file(&out_path);
                return Err(TemplateLoadCause::UnsupportedCompression {
                    entry: filename,
                    method: format!("{method:?}"),
                });
            }
        };
        trace!(entry = %filename, bytes = written, "extracted");
        files += 1;
    }
    Ok(files)
}
