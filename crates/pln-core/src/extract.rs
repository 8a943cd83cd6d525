//! Write the files embedded in an OJS export to disk.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::xml::{EmbeddedPayload, XmlParser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Name recorded in the export.
    pub source_name: String,
    pub path: PathBuf,
    pub bytes: u64,
}

/// Extract every `<embed>` of `file` into `destination`. Files get generated
/// names keeping the source extension, unless `source_names` is set, in which
/// case the base name from the export is used.
pub fn extract_embeds(
    file: &Path,
    destination: &Path,
    source_names: bool,
) -> Result<Vec<ExtractedFile>> {
    fs::create_dir_all(destination)?;

    let mut parser = XmlParser::new();
    let document = parser.load(file)?;
    for notice in parser.notices() {
        tracing::warn!(file = %file.display(), "{notice}");
    }

    let mut embeds = document.embeds()?;
    let mut extracted = Vec::new();
    while let Some(payload) = embeds.next_embed()? {
        if payload.filename.is_empty() {
            tracing::warn!("embedded element has no file name, skipping");
            continue;
        }
        let Some((mut out, path)) = open_target(&payload, destination, source_names)? else {
            tracing::warn!(name = %payload.filename, "unusable embedded file name, skipping");
            continue;
        };

        tracing::info!(name = %payload.filename, path = %path.display(), "extracting embedded file");
        let mut bytes = 0u64;
        for chunk in payload.chunks() {
            let chunk = chunk?;
            bytes += chunk.len() as u64;
            out.write_all(&chunk)?;
        }
        out.flush()?;

        extracted.push(ExtractedFile {
            source_name: payload.filename.clone(),
            path,
            bytes,
        });
    }

    Ok(extracted)
}

fn open_target(
    payload: &EmbeddedPayload,
    destination: &Path,
    source_names: bool,
) -> Result<Option<(File, PathBuf)>> {
    let source = Path::new(&payload.filename);

    if source_names {
        // Only the final component; never write outside the destination.
        let Some(name) = source.file_name() else {
            return Ok(None);
        };
        let path = destination.join(name);
        return Ok(Some((File::create(&path)?, path)));
    }

    let suffix = source
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let temp = tempfile::Builder::new()
        .prefix("pn-")
        .suffix(&suffix)
        .tempfile_in(destination)?;
    let (file, path) = temp.keep().map_err(std::io::Error::from)?;
    Ok(Some((file, path)))
}
