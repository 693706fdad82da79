use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::executor::quote_arg;

/// Upper bound for one batch's joined path list. Keeps a single archiver
/// invocation well under the Windows command-line limit.
pub const DEFAULT_MAX_BATCH_CHARS: usize = 7000;

/// Object files handed to a single archiver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBatch {
    pub index: usize,
    pub paths: Vec<PathBuf>,
}

impl ObjectBatch {
    /// Space-separated paths as they appear on the command line.
    pub fn joined(&self) -> String {
        self.paths
            .iter()
            .map(|p| quote_arg(&p.to_string_lossy()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn char_len(&self) -> usize {
        self.joined().chars().count()
    }
}

/// Finds files by extension under a set of folders and packs them into
/// [`ObjectBatch`]es.
///
/// Nothing is cached: every call to [`FileCollector::files`] or
/// [`FileCollector::batches`] walks the filesystem again.
#[derive(Debug, Clone)]
pub struct FileCollector {
    folders: Vec<PathBuf>,
    extensions: Vec<String>,
    excluded: Vec<PathBuf>,
    max_depth: Option<usize>,
    max_batch_chars: usize,
}

impl FileCollector {
    pub fn new<I, P>(folders: I, extensions: &[String]) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            folders: folders.into_iter().map(Into::into).collect(),
            extensions: extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
            excluded: Vec::new(),
            max_depth: None,
            max_batch_chars: DEFAULT_MAX_BATCH_CHARS,
        }
    }

    /// Subtrees that are never entered.
    pub fn excluding<I, P>(mut self, subfolders: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.excluded.extend(subfolders.into_iter().map(Into::into));
        self
    }

    /// `0` lists only the files directly inside each folder.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn max_batch_chars(mut self, limit: usize) -> Self {
        self.max_batch_chars = limit;
        self
    }

    /// Matching files in discovery order: folders in the order given, entries
    /// within a folder sorted by file name.
    pub fn files(&self) -> impl Iterator<Item = Result<PathBuf>> + '_ {
        self.folders.iter().flat_map(move |folder| self.walk(folder))
    }

    pub fn batches(&self) -> Batches<impl Iterator<Item = Result<PathBuf>> + '_> {
        Batches {
            files: self.files(),
            limit: self.max_batch_chars,
            current: Vec::new(),
            current_len: 0,
            next_index: 0,
            pending_err: None,
            done: false,
        }
    }

    fn walk<'a>(&'a self, folder: &'a Path) -> Box<dyn Iterator<Item = Result<PathBuf>> + 'a> {
        if !folder.is_dir() {
            tracing::debug!(folder = %folder.display(), "scan folder missing; skipping");
            return Box::new(std::iter::empty());
        }
        let mut walker = WalkDir::new(folder).sort_by_file_name();
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth + 1);
        }
        Box::new(
            walker
                .into_iter()
                .filter_entry(move |e| !self.is_excluded(e.path()))
                .filter_map(move |entry| match entry {
                    Err(e) => Some(Err(Error::from(e))),
                    Ok(e) if e.file_type().is_file() && self.matches(e.path()) => {
                        Some(Ok(e.into_path()))
                    }
                    Ok(_) => None,
                }),
        )
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|ex| path.starts_with(ex))
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions.iter().any(|want| want.eq_ignore_ascii_case(ext))
    }
}

/// Greedy packing of a file stream into batches. Ends after the first
/// error item.
pub struct Batches<I> {
    files: I,
    limit: usize,
    current: Vec<PathBuf>,
    current_len: usize,
    next_index: usize,
    pending_err: Option<Error>,
    done: bool,
}

impl<I> Batches<I> {
    fn take_current(&mut self) -> Option<ObjectBatch> {
        if self.current.is_empty() {
            return None;
        }
        let batch = ObjectBatch {
            index: self.next_index,
            paths: std::mem::take(&mut self.current),
        };
        self.current_len = 0;
        self.next_index += 1;
        Some(batch)
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = Result<PathBuf>>,
{
    type Item = Result<ObjectBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_err.take() {
            self.done = true;
            return Some(Err(err));
        }
        if self.done {
            return None;
        }

        loop {
            let path = match self.files.next() {
                None => {
                    self.done = true;
                    return self.take_current().map(Ok);
                }
                Some(Err(e)) => {
                    // Flush what was already packed, then report.
                    return match self.take_current() {
                        Some(batch) => {
                            self.pending_err = Some(e);
                            Some(Ok(batch))
                        }
                        None => {
                            self.done = true;
                            Some(Err(e))
                        }
                    };
                }
                Some(Ok(p)) => p,
            };

            let len = quote_arg(&path.to_string_lossy()).chars().count();
            if len > self.limit {
                let err = Error::msg(format!(
                    "path {} is {len} characters long, over the batch limit of {}",
                    path.display(),
                    self.limit
                ));
                return match self.take_current() {
                    Some(batch) => {
                        self.pending_err = Some(err);
                        Some(Ok(batch))
                    }
                    None => {
                        self.done = true;
                        Some(Err(err))
                    }
                };
            }

            if self.current.is_empty() {
                self.current.push(path);
                self.current_len = len;
                continue;
            }
            if self.current_len + 1 + len > self.limit {
                let batch = self.take_current();
                self.current.push(path);
                self.current_len = len;
                return batch.map(Ok);
            }
            self.current.push(path);
            self.current_len += 1 + len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, b"").expect("write");
    }

    fn exts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn batches_respect_limit_and_keep_every_file_once() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let obj = tmp.path().join("obj");
        for i in 0..40 {
            touch(&obj.join(format!("mod{}", i % 4)).join(format!("file_{i:02}.obj")));
        }
        touch(&obj.join("readme.txt"));

        let collector = FileCollector::new([&obj], &exts(&["obj"])).max_batch_chars(400);
        let files: Vec<PathBuf> = collector
            .files()
            .collect::<Result<_>>()
            .expect("files");
        assert_eq!(files.len(), 40);

        let batches: Vec<ObjectBatch> = collector
            .batches()
            .collect::<Result<_>>()
            .expect("batches");
        assert!(batches.len() > 1, "expected the limit to split the files");

        for (i, b) in batches.iter().enumerate() {
            assert_eq!(b.index, i);
            assert!(!b.paths.is_empty());
            assert!(b.char_len() <= 400, "batch {i} is {} chars", b.char_len());
        }

        let flattened: Vec<PathBuf> = batches.into_iter().flat_map(|b| b.paths).collect();
        assert_eq!(flattened, files);
        let unique: HashSet<_> = flattened.iter().collect();
        assert_eq!(unique.len(), flattened.len());
    }

    #[test]
    fn restarting_walks_again() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("a.o"));
        let collector = FileCollector::new([tmp.path()], &exts(&["o"]));
        assert_eq!(collector.batches().count(), 1);

        touch(&tmp.path().join("b.o"));
        let again: Vec<ObjectBatch> = collector
            .batches()
            .collect::<Result<_>>()
            .expect("batches");
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].paths.len(), 2);
    }

    #[test]
    fn exclusions_depth_and_case() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        touch(&root.join("top.OBJ"));
        touch(&root.join("nested/inner.obj"));
        touch(&root.join("third_party/skip.obj"));
        touch(&root.join("lib.a"));

        let collector = FileCollector::new([root], &exts(&[".obj"]))
            .excluding([root.join("third_party")]);
        let names: Vec<String> = collector
            .files()
            .map(|p| {
                p.expect("file")
                    .strip_prefix(root)
                    .expect("relative")
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["nested/inner.obj", "top.OBJ"]);

        let shallow = FileCollector::new([root], &exts(&["obj"])).max_depth(0);
        let shallow: Vec<PathBuf> = shallow.files().collect::<Result<_>>().expect("files");
        assert_eq!(shallow, vec![root.join("top.OBJ")]);
    }

    #[test]
    fn missing_folders_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("present/a.obj"));
        let collector = FileCollector::new(
            [tmp.path().join("absent"), tmp.path().join("present")],
            &exts(&["obj"]),
        );
        assert_eq!(collector.files().count(), 1);
    }

    #[test]
    fn oversized_path_is_an_error_after_packed_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        touch(&tmp.path().join("a.obj"));
        touch(&tmp.path().join(format!("{}.obj", "x".repeat(120))));

        let limit = tmp.path().join("a.obj").to_string_lossy().len() + 10;
        let collector = FileCollector::new([tmp.path()], &exts(&["obj"])).max_batch_chars(limit);
        let items: Vec<Result<ObjectBatch>> = collector.batches().collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
