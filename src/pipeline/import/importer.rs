use std::path::{Path, PathBuf};

use super::format::classify;
use super::{DocumentSection, ImportError, SourceFile};

/// Load files and folders from disk into [`SourceFile`]s for one section.
///
/// Folders are walked recursively; each file keeps its path relative to the folder's
/// parent, so `client/Unit 2/lease.pdf` stays `client/Unit 2/lease.pdf`. Ignored and
/// unsupported files are dropped here, the same filter the upload widget applies.
pub fn collect_inputs(
    inputs: &[PathBuf],
    section: DocumentSection,
) -> Result<Vec<SourceFile>, ImportError> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.exists() {
            return Err(ImportError::NotFound(input.display().to_string()));
        }

        if input.is_dir() {
            let base = input.parent().unwrap_or_else(|| Path::new(""));
            let mut paths = Vec::new();
            walk_files(input, &mut paths);
            paths.sort();
            for path in paths {
                let relative = relative_string(&path, base);
                if let Some(file) = load_file(&path, Some(relative))? {
                    files.push(file.in_section(section));
                }
            }
        } else if let Some(file) = load_file(input, None)? {
            files.push(file.in_section(section));
        }
    }

    tracing::info!(
        section = ?section,
        count = files.len(),
        "Collected input documents"
    );

    Ok(files)
}

fn load_file(path: &Path, relative: Option<String>) -> Result<Option<SourceFile>, ImportError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let label = relative.as_deref().unwrap_or(&name);
    if classify(label).is_skip() {
        tracing::debug!(file = %label, "Skipping unsupported or ignored input");
        return Ok(None);
    }

    let bytes = std::fs::read(path)?;
    let file = SourceFile::new(name, bytes);
    Ok(Some(match relative {
        Some(rel) => file.with_relative_path(rel),
        None => file,
    }))
}

fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                walk_files(&p, out);
            } else {
                out.push(p);
            }
        }
    }
}

fn relative_string(path: &Path, base: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_walk_keeps_relative_paths_and_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("client");
        std::fs::create_dir_all(root.join("Unit 2")).unwrap();
        std::fs::write(root.join("lease.pdf"), b"%PDF").unwrap();
        std::fs::write(root.join("Unit 2").join("plumber.txt"), b"invoice").unwrap();
        std::fs::write(root.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(root.join("song.mp3"), b"junk").unwrap();

        let files = collect_inputs(&[root], DocumentSection::Current).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path()).collect();
        assert_eq!(paths, vec!["client/Unit 2/plumber.txt", "client/lease.pdf"]);
    }

    #[test]
    fn single_file_uses_its_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("2023 return.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let files = collect_inputs(&[path], DocumentSection::PriorYear).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "2023 return.pdf");
        assert_eq!(files[0].path(), "PRIOR/2023 return.pdf");
        assert_eq!(files[0].bytes, b"%PDF");
    }

    #[test]
    fn missing_input_is_an_error() {
        let result = collect_inputs(
            &[PathBuf::from("/definitely/not/here.pdf")],
            DocumentSection::Current,
        );
        assert!(matches!(result, Err(ImportError::NotFound(_))));
    }
}
