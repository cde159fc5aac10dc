//! Ordered corpus enumeration.
//!
//! Documents are plain-text files under a root directory. Enumeration order
//! is stable (sorted by path) so that each file's position can serve as its
//! resume index across runs.

use std::path::{Path, PathBuf};

use qaforge_shared::{QaForgeError, Result};

/// One enumerated corpus document, content not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    /// Position in the sorted enumeration; stable across runs while the
    /// corpus directory is unchanged.
    pub index: u64,
    /// File name (without directories).
    pub name: String,
    /// Full path for reading.
    pub path: PathBuf,
}

impl DocumentEntry {
    /// Read and decode the document. Invalid UTF-8 sequences are replaced
    /// rather than failing the run; OCR output is rarely clean.
    pub fn read_text(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|e| QaForgeError::io(&self.path, e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Enumerate all `*.txt` files under `root`, recursively, sorted by path.
pub fn walk_documents(root: &Path) -> Result<Vec<DocumentEntry>> {
    if !root.is_dir() {
        return Err(QaForgeError::Corpus(format!(
            "corpus root is not a directory: {}",
            root.display()
        )));
    }

    let mut paths = Vec::new();
    collect_txt_files(root, &mut paths)?;
    paths.sort();

    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| DocumentEntry {
            index: i as u64,
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
        })
        .collect())
}

fn collect_txt_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| QaForgeError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| QaForgeError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            collect_txt_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "txt") {
            out.push(path);
        }
    }
    Ok(())
}

/// The file stem used in prompt context headers ("Decisao_N_06..." rather
/// than "Decisao_N_06....txt").
pub fn document_stem(name: &str) -> &str {
    name.strip_suffix(".txt").unwrap_or(name)
}
