//! Zip packaging for multi-file downloads.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use bytes::Bytes;
use pngsqueeze_core::{CompressionFailure, CompressionResult};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

/// Pack `entries` into a deflated zip archive on a blocking worker.
pub(crate) async fn build_archive(entries: Vec<(String, Bytes)>) -> CompressionResult<Bytes> {
    tokio::task::spawn_blocking(move || write_archive(&entries))
        .await
        .map_err(|err| CompressionFailure::resource("build_archive", None, err))?
}

fn write_archive(entries: &[(String, Bytes)]) -> CompressionResult<Bytes> {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut taken = HashSet::new();
    for (name, bytes) in entries {
        let name = unique_name(&mut taken, name);
        writer
            .start_file(name, options)
            .map_err(|err| CompressionFailure::resource("build_archive", None, err))?;
        writer
            .write_all(bytes)
            .map_err(|err| CompressionFailure::resource("build_archive", None, err))?;
    }
    let cursor = writer
        .finish()
        .map_err(|err| CompressionFailure::resource("build_archive", None, err))?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Suffix repeated names as `name-2.png`, `name-3.png`, ... so every entry survives.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, extension) = name
        .rfind('.')
        .map_or((name, ""), |index| name.split_at(index));
    let mut counter = 2_usize;
    loop {
        let candidate = format!("{stem}-{counter}{extension}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
