//! Zip container helpers shared by the DOCX and XLSX renderers.
//!
//! Templates are never modified in place: parts are read out of the source archive and a
//! new archive is written with replaced parts substituted and every other entry copied
//! through unchanged.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::RenderError;

pub(crate) type Archive<'a> = ZipArchive<Cursor<&'a [u8]>>;

pub(crate) fn open(bytes: &[u8]) -> Result<Archive<'_>, RenderError> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| RenderError::invalid(format!("template is not a valid zip package: {e}")))
}

pub(crate) fn part_names<R: Read + Seek>(archive: &ZipArchive<R>) -> Vec<String> {
    archive.file_names().map(str::to_owned).collect()
}

/// Reads a part as UTF-8 text, `None` when the archive has no such entry.
pub(crate) fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, RenderError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(RenderError::invalid(format!("cannot open part {name}: {e}"))),
    };

    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| RenderError::invalid(format!("cannot read part {name}: {e}")))?;
    Ok(Some(xml))
}

/// Writes a copy of `archive` with the given parts replaced, preserving entry order.
pub(crate) fn write_with_replacements<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    replacements: &HashMap<String, String>,
) -> Result<Vec<u8>, RenderError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for index in 0..archive.len() {
        let file = archive
            .by_index(index)
            .map_err(|e| RenderError::invalid(format!("cannot read zip entry {index}: {e}")))?;

        match replacements.get(file.name()) {
            Some(xml) => {
                let name = file.name().to_owned();
                drop(file);
                writer
                    .start_file(name.as_str(), options)
                    .map_err(|e| RenderError::invalid(format!("cannot write part {name}: {e}")))?;
                writer
                    .write_all(xml.as_bytes())
                    .map_err(|e| RenderError::invalid(format!("cannot write part {name}: {e}")))?;
            }
            None => {
                let name = file.name().to_owned();
                writer
                    .raw_copy_file(file)
                    .map_err(|e| RenderError::invalid(format!("cannot copy part {name}: {e}")))?;
            }
        }
    }

    let cursor = writer
        .finish()
        .map_err(|e| RenderError::invalid(format!("cannot finalize package: {e}")))?;
    Ok(cursor.into_inner())
}
