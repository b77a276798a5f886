//! Laptop file formats: JSON for humans, rkyv for compact binary.

use std::fs;
use std::io;
use std::path::Path;

use rkyv::Deserialize;

use crate::model::Laptop;

pub fn laptop_to_json(laptop: &Laptop) -> io::Result<String> {
    serde_json::to_string_pretty(laptop).map_err(io::Error::from)
}

pub fn write_json_file(laptop: &Laptop, path: &Path) -> io::Result<()> {
    fs::write(path, laptop_to_json(laptop)?)
}

pub fn read_json_file(path: &Path) -> io::Result<Laptop> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(io::Error::from)
}

pub fn write_binary_file(laptop: &Laptop, path: &Path) -> io::Result<()> {
    let bytes = rkyv::to_bytes::<_, 1024>(laptop)
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    fs::write(path, &bytes)
}

/// Validates the archive before deserializing, so a corrupt file is an
/// `InvalidData` error rather than undefined behaviour.
pub fn read_binary_file(path: &Path) -> io::Result<Laptop> {
    let data = fs::read(path)?;
    let mut aligned = rkyv::AlignedVec::with_capacity(data.len());
    aligned.extend_from_slice(&data);

    let archived = rkyv::check_archived_root::<Laptop>(&aligned)
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let laptop: Laptop = archived
    .deserialize(&mut rkyv::Infallible)
    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "cannot deserialize laptop"))?;
    Ok(laptop)
}

/// Picks the format from the extension: `.json` is JSON, anything else binary.
pub fn write_file(laptop: &Laptop, path: &Path) -> io::Result<()> {
    if is_json(path) {
        write_json_file(laptop, path)
    } else {
        write_binary_file(laptop, path)
    }
}

pub fn read_file(path: &Path) -> io::Result<Laptop> {
    if is_json(path) {
        read_json_file(path)
    } else {
        read_binary_file(path)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
    .map(|ext| ext.eq_ignore_ascii_case("json"))
    .unwrap_or(false)
}
