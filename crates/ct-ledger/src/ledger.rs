//! JSON-lines ledger file
//!
//! Each row is one JSON object terminated by `\n`. Appends take an
//! exclusive advisory lock and go out as a single `write_all` on an
//! `O_APPEND` handle, so concurrent writers (threads or processes) never
//! interleave partial rows. Readers skip a trailing row without its newline
//! (a writer may be mid-append) and any row that fails to parse.

use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ct_core::config::LedgerConfig;
use ct_core::{JobId, LedgerError, RunId};

use crate::entry::LedgerEntry;

/// Handle on a ledger file; cheap to create, opens the file per operation
///
/// All methods do blocking file I/O and may wait on another writer's lock.
/// Async callers run them on the blocking pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.path.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one row
    pub fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let write_failed = |source: io::Error| LedgerError::WriteFailed {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(write_failed)?;

        file.lock_exclusive().map_err(write_failed)?;
        let written = write_row(&mut file, &mut line);
        if let Err(e) = FileExt::unlock(&file) {
            tracing::debug!("Failed to unlock ledger {:?}: {}", self.path, e);
        }
        written.map_err(write_failed)?;

        tracing::debug!(job_id = %entry.job_id, run_id = %entry.run_id.as_str(), "Ledger row appended");
        Ok(())
    }

    /// Append a row stamped with the current time and return it
    pub fn record(
        &self,
        job_id: JobId,
        run_id: RunId,
        project: impl Into<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry::new(job_id, run_id, project);
        self.append(&entry)?;
        Ok(entry)
    }

    /// The authoritative row for `job_id`, or `None` if the job is unknown
    ///
    /// The greatest `created_at_ms` wins; rows with equal timestamps resolve
    /// to the one later in the file.
    pub fn latest(&self, job_id: &JobId) -> Result<Option<LedgerEntry>, LedgerError> {
        let mut best: Option<LedgerEntry> = None;
        for entry in self.read_all()? {
            if entry.job_id != *job_id {
                continue;
            }
            if best.as_ref().map_or(true, |b| entry.supersedes(b)) {
                best = Some(entry);
            }
        }
        Ok(best)
    }

    /// Every row for `project`, in file order, read lazily
    ///
    /// Each call starts a fresh scan from the top of the file.
    pub fn all_for_project(&self, project: &str) -> Entries {
        Entries::new(self.path.clone(), Some(project.to_string()))
    }

    /// Every row, in file order, read lazily
    pub fn entries(&self) -> Entries {
        Entries::new(self.path.clone(), None)
    }

    /// One row per job in `project`, using the same latest-wins rule as [`Self::latest`]
    ///
    /// Ordered by creation time, oldest first.
    pub fn latest_per_job(&self, project: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut by_job: BTreeMap<JobId, LedgerEntry> = BTreeMap::new();
        for entry in self.read_all()? {
            if entry.project != project {
                continue;
            }
            let replace = by_job
                .get(&entry.job_id)
                .map_or(true, |current| entry.supersedes(current));
            if replace {
                by_job.insert(entry.job_id.clone(), entry);
            }
        }

        let mut rows: Vec<_> = by_job.into_values().collect();
        rows.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(rows)
    }

    /// Full scan under a shared lock, so no append lands mid-read
    fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let read_failed = |source: io::Error| LedgerError::ReadFailed {
            path: self.path.clone(),
            source,
        };

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_failed(e)),
        };

        file.lock_shared().map_err(read_failed)?;
        let mut bytes = Vec::new();
        let read = file.read_to_end(&mut bytes);
        if let Err(e) = FileExt::unlock(&file) {
            tracing::debug!("Failed to unlock ledger {:?}: {}", self.path, e);
        }
        read.map_err(read_failed)?;

        let mut rows = Vec::new();
        let mut lines = bytes.split_inclusive(|b| *b == b'\n').enumerate().peekable();
        while let Some((idx, line)) = lines.next() {
            if lines.peek().is_none() && line.last() != Some(&b'\n') {
                tracing::debug!("Skipping incomplete final row of {:?}", self.path);
                break;
            }
            if let Some(entry) = parse_row(line, &self.path, idx + 1) {
                rows.push(entry);
            }
        }
        Ok(rows)
    }
}

/// Write `line` at the end of `file`, first terminating a torn final row
fn write_row(file: &mut File, line: &mut Vec<u8>) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            line.insert(0, b'\n');
        }
    }
    file.write_all(line)?;
    file.sync_data()
}

fn parse_row(line: &[u8], path: &Path, line_no: usize) -> Option<LedgerEntry> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!("Skipping unreadable ledger row {:?}:{}: {}", path, line_no, e);
            None
        }
    }
}

/// Lazy scan over ledger rows, optionally filtered to one project
///
/// The file is opened on the first call to `next`; a missing file yields
/// nothing.
#[derive(Debug)]
pub struct Entries {
    path: PathBuf,
    project: Option<String>,
    reader: Option<BufReader<File>>,
    line_no: usize,
    done: bool,
}

impl Entries {
    fn new(path: PathBuf, project: Option<String>) -> Self {
        Self {
            path,
            project,
            reader: None,
            line_no: 0,
            done: false,
        }
    }

    fn fail(&mut self, source: io::Error) -> Option<Result<LedgerEntry, LedgerError>> {
        self.done = true;
        Some(Err(LedgerError::ReadFailed {
            path: self.path.clone(),
            source,
        }))
    }
}

impl Iterator for Entries {
    type Item = Result<LedgerEntry, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.reader.is_none() {
            match File::open(&self.path) {
                Ok(file) => self.reader = Some(BufReader::new(file)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.done = true;
                    return None;
                }
                Err(e) => return self.fail(e),
            }
        }

        loop {
            let mut line = Vec::new();
            let read = match self.reader.as_mut() {
                Some(reader) => reader.read_until(b'\n', &mut line),
                None => return None,
            };
            match read {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(_) => {}
                Err(e) => return self.fail(e),
            }
            self.line_no += 1;

            // A row without its newline is still being written
            if line.last() != Some(&b'\n') {
                self.done = true;
                return None;
            }

            let Some(entry) = parse_row(&line, &self.path, self.line_no) else {
                continue;
            };
            if self.project.as_deref().map_or(true, |p| p == entry.project) {
                return Some(Ok(entry));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(job: &str, run: &str, project: &str, at: u64) -> LedgerEntry {
        LedgerEntry {
            job_id: JobId::new(job),
            run_id: RunId::new(run),
            project: project.to_string(),
            created_at_ms: at,
            remote_dir: None,
        }
    }

    fn ledger(dir: &TempDir) -> Ledger {
        Ledger::new(dir.path().join(".chtc").join("ledger.jsonl"))
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        assert!(ledger.latest(&JobId::new("1")).unwrap().is_none());
        assert_eq!(ledger.entries().count(), 0);
        assert!(ledger.latest_per_job("p").unwrap().is_empty());
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("1", "", "p", 10)).unwrap();
        let text = fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_append_to_directory_fails() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::new(dir.path());

        match ledger.append(&entry("1", "", "p", 1)) {
            Err(LedgerError::WriteFailed { path, .. }) => assert_eq!(path, dir.path()),
            other => panic!("expected WriteFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_latest_prefers_newest_row() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("J100", "", "proj", 100)).unwrap();
        ledger.append(&entry("J100", "R200", "proj", 200)).unwrap();

        let latest = ledger.latest(&JobId::new("J100")).unwrap().unwrap();
        assert_eq!(latest.run_id, RunId::new("R200"));
        assert!(ledger.latest(&JobId::new("J999")).unwrap().is_none());
    }

    #[test]
    fn test_latest_ignores_file_order_when_timestamps_differ() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("J1", "newer", "p", 300)).unwrap();
        ledger.append(&entry("J1", "older", "p", 100)).unwrap();

        let latest = ledger.latest(&JobId::new("J1")).unwrap().unwrap();
        assert_eq!(latest.run_id.as_str(), "newer");
    }

    #[test]
    fn test_latest_tie_goes_to_later_row() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("J1", "first", "p", 100)).unwrap();
        ledger.append(&entry("J1", "second", "p", 100)).unwrap();

        let latest = ledger.latest(&JobId::new("J1")).unwrap().unwrap();
        assert_eq!(latest.run_id.as_str(), "second");
    }

    #[test]
    fn test_all_for_project_is_restartable() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("1", "", "a", 1)).unwrap();
        ledger.append(&entry("2", "", "b", 2)).unwrap();
        ledger.append(&entry("3", "", "a", 3)).unwrap();

        let mut first = ledger.all_for_project("a");
        assert_eq!(first.next().unwrap().unwrap().job_id, JobId::new("1"));

        // A second enumeration starts from the top, independent of the first
        let all: Vec<_> = ledger
            .all_for_project("a")
            .map(|r| r.unwrap().job_id)
            .collect();
        assert_eq!(all, vec![JobId::new("1"), JobId::new("3")]);

        assert_eq!(first.next().unwrap().unwrap().job_id, JobId::new("3"));
        assert!(first.next().is_none());
    }

    #[test]
    fn test_all_for_project_is_lazy() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);

        // Created before the file exists; rows appended afterwards are seen
        let entries = ledger.all_for_project("p");
        ledger.append(&entry("1", "", "p", 1)).unwrap();
        assert_eq!(entries.count(), 1);
    }

    #[test]
    fn test_torn_tail_is_skipped_and_repaired() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("1", "", "p", 1)).unwrap();

        let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        file.write_all(br#"{"job_id":"2","run_"#).unwrap();
        drop(file);

        assert_eq!(ledger.entries().count(), 1);
        assert!(ledger.latest(&JobId::new("2")).unwrap().is_none());

        // The next append terminates the torn row instead of merging with it
        ledger.append(&entry("3", "", "p", 3)).unwrap();
        let jobs: Vec<_> = ledger.entries().map(|r| r.unwrap().job_id).collect();
        assert_eq!(jobs, vec![JobId::new("1"), JobId::new("3")]);
    }

    #[test]
    fn test_garbage_rows_are_skipped() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(
            ledger.path(),
            "not json\n\n{\"job_id\":\"5\",\"run_id\":\"r\",\"project\":\"p\",\"created_at_ms\":5}\n",
        )
        .unwrap();

        let rows: Vec<_> = ledger.entries().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_id, JobId::new("5"));
    }

    #[test]
    fn test_latest_per_job() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        ledger.append(&entry("20", "", "p", 10)).unwrap();
        ledger.append(&entry("10", "", "p", 20)).unwrap();
        ledger.append(&entry("20", "run-20", "p", 30)).unwrap();
        ledger.append(&entry("30", "", "other", 40)).unwrap();

        let rows = ledger.latest_per_job("p").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].job_id, JobId::new("10"));
        assert_eq!(rows[1].job_id, JobId::new("20"));
        assert_eq!(rows[1].run_id.as_str(), "run-20");
    }

    #[test]
    fn test_record_stamps_time() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir);
        let row = ledger
            .record(JobId::new("1"), RunId::new("r"), "p")
            .unwrap();
        assert!(row.created_at_ms > 0);
        assert_eq!(ledger.latest(&JobId::new("1")).unwrap(), Some(row));
    }
}
