//! Consumer-side sinks: NDJSON file writer and pipe drain helper

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::pipe::Pipe;
use crate::record::Record;

/// Write buffer for NDJSON output (256KB)
const WRITE_BUF_SIZE: usize = 256 * 1024;

/// Buffered NDJSON writer with atomic tmp→rename
pub struct NdjsonSink {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl NdjsonSink {
    /// Create a sink writing `{name}.ndjson` in `output_dir` via a tmp file
    pub fn new(name: &str, output_dir: &Path) -> io::Result<Self> {
        let filename = format!("{name}.ndjson");
        let final_path = output_dir.join(&filename);
        let tmp_path = output_dir.join(format!("{filename}.tmp"));

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: BufWriter::with_capacity(WRITE_BUF_SIZE, file),
            tmp_path,
            final_path,
            row_count: 0,
        })
    }

    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record).map_err(io::Error::other)?;
        self.writer.write_all(b"\n")?;
        self.row_count += 1;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Flush and atomically rename tmp → final, returning rows written
    pub fn finalize(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        log::debug!(
            "wrote {} rows to {}",
            self.row_count,
            self.final_path.display()
        );
        Ok(self.row_count)
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }
}

/// Count non-empty lines of a finished NDJSON file
pub fn count_ndjson_rows(path: &Path) -> io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = 0;
    for line in reader.lines() {
        if !line?.trim().is_empty() {
            rows += 1;
        }
    }
    Ok(rows)
}

/// Remove stale .tmp files in the output directory
pub fn cleanup_tmp_files(output_dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(output_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "tmp") {
            log::warn!("Removing stale tmp file: {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Build a loop consumer that drains `pipe` and hands each record to `handle`.
///
/// Returns the number of records processed per call, as
/// [`PipeLoop::run`](crate::PipeLoop::run) expects.
pub fn drain_into<'a, P, H>(
    pipe: &'a P,
    handle: H,
) -> impl FnMut() -> anyhow::Result<usize> + 'a
where
    P: Pipe + ?Sized,
    H: FnMut(Record) -> anyhow::Result<()> + 'a,
{
    drain_at_most(pipe, None, handle)
}

/// Like [`drain_into`], but hands at most `limit` records to `handle` over
/// the consumer's lifetime. Records drained past the quota are dropped and
/// not counted, so the loop's consumed total never exceeds `limit`.
pub fn drain_at_most<'a, P, H>(
    pipe: &'a P,
    limit: Option<usize>,
    mut handle: H,
) -> impl FnMut() -> anyhow::Result<usize> + 'a
where
    P: Pipe + ?Sized,
    H: FnMut(Record) -> anyhow::Result<()> + 'a,
{
    let mut handled = 0usize;
    move || {
        let records = pipe.consume_available_records();
        let drained = records.len();
        let quota = limit.map_or(usize::MAX, |l| l.saturating_sub(handled));
        let mut n = 0;
        for record in records.into_iter().take(quota) {
            handle(record)?;
            n += 1;
        }
        if drained > n {
            log::debug!("dropped {} records past the limit", drained - n);
        }
        handled += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::RecordPipe;
    use tempfile::TempDir;

    #[test]
    fn ndjson_sink_writes_and_renames() {
        let dir = TempDir::new().unwrap();
        let mut sink = NdjsonSink::new("rows", dir.path()).unwrap();
        let first = Record::new().with("id", 1).with("name", "a");
        sink.write_record(&first).unwrap();
        sink.write_record(&Record::new().with("id", 2)).unwrap();
        assert!(dir.path().join("rows.ndjson.tmp").exists());

        let rows = sink.finalize().unwrap();
        assert_eq!(rows, 2);
        let path = dir.path().join("rows.ndjson");
        assert!(!dir.path().join("rows.ndjson.tmp").exists());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"id\":1,\"name\":\"a\"}\n{\"id\":2}\n");
        assert_eq!(count_ndjson_rows(&path).unwrap(), 2);
    }

    #[test]
    fn ndjson_sink_replaces_stale_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("rows.ndjson.tmp"), b"garbage\n").unwrap();
        let sink = NdjsonSink::new("rows", dir.path()).unwrap();
        assert_eq!(sink.finalize().unwrap(), 0);
        assert_eq!(count_ndjson_rows(&dir.path().join("rows.ndjson")).unwrap(), 0);
    }

    #[test]
    fn cleanup_tmp_files_removes_only_tmp() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.tmp"), b"stale").unwrap();
        std::fs::write(dir.path().join("b.ndjson"), b"keep").unwrap();
        std::fs::write(dir.path().join("c.tmp"), b"stale2").unwrap();

        cleanup_tmp_files(dir.path()).unwrap();

        assert!(!dir.path().join("a.tmp").exists());
        assert!(dir.path().join("b.ndjson").exists());
        assert!(!dir.path().join("c.tmp").exists());
    }

    #[test]
    fn drain_into_counts_and_forwards() {
        let pipe = RecordPipe::default();
        let records = (0..3i64).map(|i| Record::new().with("id", i)).collect();
        pipe.add_records(records).unwrap();
        let mut seen = Vec::new();
        let mut consume = drain_into(&pipe, |r| {
            seen.push(r);
            Ok(())
        });
        assert_eq!(consume().unwrap(), 3);
        assert_eq!(consume().unwrap(), 0);
        drop(consume);
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn drain_at_most_stops_at_quota() {
        let pipe = RecordPipe::default();
        let mut seen = Vec::new();
        let mut consume = drain_at_most(&pipe, Some(5), |r| {
            seen.push(r);
            Ok(())
        });
        let ids = |range: std::ops::Range<i64>| -> Vec<Record> {
            range.map(|i| Record::new().with("id", i)).collect()
        };
        pipe.add_records(ids(0..3)).unwrap();
        assert_eq!(consume().unwrap(), 3);
        pipe.add_records(ids(3..10)).unwrap();
        assert_eq!(consume().unwrap(), 2);
        assert_eq!(pipe.count_available_records(), 0);
        drop(consume);
        assert_eq!(seen.len(), 5);
    }

    #[test]
    fn drain_into_propagates_handler_error() {
        let pipe = RecordPipe::default();
        pipe.add_record(Record::new()).unwrap();
        let mut consume = drain_into(&pipe, |_| anyhow::bail!("rejected"));
        assert!(consume().is_err());
    }
}
