//! Master archive assembly

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::download::PackageError;

/// Zip the given files into `dest`, one entry per file, named by file name.
pub(crate) fn zip_files(files: &[PathBuf], dest: &Path) -> Result<(), PackageError> {
    let zip_err = |message: String| PackageError::Zip {
        path: dest.display().to_string(),
        message,
    };

    let out = File::create(dest).map_err(|err| zip_err(err.to_string()))?;
    let mut writer = ZipWriter::new(BufWriter::new(out));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for file in files {
        let entry_name = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| zip_err(format!("unusable file name: {}", file.display())))?;
        writer
            .start_file(entry_name, options)
            .map_err(|err| zip_err(err.to_string()))?;
        let mut input = File::open(file).map_err(|err| zip_err(err.to_string()))?;
        io::copy(&mut input, &mut writer).map_err(|err| zip_err(err.to_string()))?;
    }

    writer.finish().map_err(|err| zip_err(err.to_string()))?;
    Ok(())
}
