//! FASTX input for queries and references.
//!
//! Wraps `paraseq` for batched reading. Queries arrive as batches of
//! `SequenceQuery` with 1-based ids assigned in input order; the three
//! pairing modes decide how records are grouped into queries. Reference
//! files are read sequentially at build time and re-opened record-wise for
//! the optional alignment display.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use paraseq::Record;
use paraseq::fastx;

use crate::classify::{PairingMode, SequenceQuery};

type BoxedRead = Box<dyn std::io::Read + Send>;
type FastxReader = fastx::Reader<BoxedRead>;

fn open_reader(path: &Path) -> Result<FastxReader> {
    fastx::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

/// One open file with its record set.
struct OpenFile {
    reader: FastxReader,
    record_set: fastx::RecordSet,
}

impl OpenFile {
    fn open(path: &Path) -> Result<Self> {
        let reader = open_reader(path)?;
        let record_set = reader.new_record_set();
        Ok(Self { reader, record_set })
    }

    /// Refill the record set; `Ok(false)` at EOF.
    fn fill(&mut self) -> Result<bool> {
        Ok(self.record_set.fill(&mut self.reader)?)
    }
}

fn owned_query(id: u64, header: &[u8], seq1: Vec<u8>, seq2: Vec<u8>) -> SequenceQuery {
    SequenceQuery {
        id,
        header: String::from_utf8_lossy(header).into_owned(),
        seq1,
        seq2,
    }
}

/// Batched source of queries over one or more input files.
pub struct QuerySource {
    pairing: PairingMode,
    files1: VecDeque<PathBuf>,
    files2: VecDeque<PathBuf>,
    current1: Option<OpenFile>,
    current2: Option<OpenFile>,
    /// Queries decoded but not yet handed out; record sets may hold more
    /// records than one batch.
    ready: VecDeque<SequenceQuery>,
    /// Half-pair carried across record sets in `Sequences` mode.
    pending: Option<SequenceQuery>,
    next_id: u64,
    batch_size: usize,
}

impl QuerySource {
    /// Open the input file set.
    ///
    /// In `Files` mode consecutive file pairs hold mates (file 0 with
    /// file 1, file 2 with file 3, ...).
    pub fn open(infiles: &[PathBuf], pairing: PairingMode, batch_size: usize) -> Result<Self> {
        if infiles.is_empty() {
            bail!("no input files specified");
        }
        let (files1, files2) = match pairing {
            PairingMode::Files => {
                if infiles.len() % 2 != 0 {
                    bail!("file pairing requires an even number of input files");
                }
                (
                    infiles.iter().step_by(2).cloned().collect(),
                    infiles.iter().skip(1).step_by(2).cloned().collect(),
                )
            }
            _ => (infiles.iter().cloned().collect(), VecDeque::new()),
        };
        Ok(Self {
            pairing,
            files1,
            files2,
            current1: None,
            current2: None,
            ready: VecDeque::new(),
            pending: None,
            next_id: 1,
            batch_size: batch_size.max(1),
        })
    }

    /// Advance to the next file (pair); `Ok(false)` when inputs are
    /// exhausted.
    fn advance_files(&mut self) -> Result<bool> {
        self.current1 = match self.files1.pop_front() {
            Some(p) => Some(OpenFile::open(&p)?),
            None => return Ok(false),
        };
        self.current2 = match self.files2.pop_front() {
            Some(p) => Some(OpenFile::open(&p)?),
            None => None,
        };
        Ok(true)
    }

    /// Read the next batch of queries, at most `batch_size` of them.
    ///
    /// Returns `Ok(false)` when all inputs are exhausted and no queries
    /// were produced. Per-file parse failures are reported through
    /// `errors` and skip to the next file instead of ending the run.
    pub fn next_batch(
        &mut self,
        batch: &mut Vec<SequenceQuery>,
        errors: &mut Vec<String>,
    ) -> Result<bool> {
        batch.clear();
        while batch.len() < self.batch_size {
            if let Some(q) = self.ready.pop_front() {
                batch.push(q);
                continue;
            }
            if !self.refill(errors)? {
                break;
            }
        }
        Ok(!batch.is_empty())
    }

    /// Decode more queries into the ready buffer; `Ok(false)` once inputs
    /// are exhausted.
    fn refill(&mut self, errors: &mut Vec<String>) -> Result<bool> {
        loop {
            if self.current1.is_none() && !self.advance_files()? {
                // leftover unpaired read in `Sequences` mode
                return Ok(match self.pending.take() {
                    Some(q) => {
                        self.ready.push_back(q);
                        true
                    }
                    None => false,
                });
            }

            let step = match self.pairing {
                PairingMode::Files => self.fill_paired(),
                _ => self.fill_single(),
            };
            match step {
                Ok(true) => {}
                Ok(false) => {
                    // file (pair) finished
                    if let Some(q) = self.pending.take() {
                        self.ready.push_back(q);
                    }
                    self.current1 = None;
                    self.current2 = None;
                }
                Err(e) => {
                    errors.push(format!("skipping rest of input file: {e}"));
                    self.pending = None;
                    self.current1 = None;
                    self.current2 = None;
                }
            }
            if !self.ready.is_empty() {
                return Ok(true);
            }
        }
    }

    fn fill_single(&mut self) -> Result<bool> {
        let pair_sequences = self.pairing == PairingMode::Sequences;
        let file = self.current1.as_mut().unwrap();
        if !file.fill()? {
            return Ok(false);
        }

        for rec in file.record_set.iter() {
            let rec = rec?;
            if pair_sequences {
                if let Some(mut first) = self.pending.take() {
                    first.seq2 = rec.seq().into_owned();
                    self.ready.push_back(first);
                } else {
                    self.pending = Some(owned_query(
                        self.next_id,
                        rec.id(),
                        rec.seq().into_owned(),
                        Vec::new(),
                    ));
                    self.next_id += 1;
                }
            } else {
                self.ready.push_back(owned_query(
                    self.next_id,
                    rec.id(),
                    rec.seq().into_owned(),
                    Vec::new(),
                ));
                self.next_id += 1;
            }
        }
        Ok(true)
    }

    fn fill_paired(&mut self) -> Result<bool> {
        let [Some(file1), Some(file2)] = [self.current1.as_mut(), self.current2.as_mut()]
        else {
            bail!("paired mode requires two open files");
        };
        let has1 = file1.fill()?;
        let has2 = file2.fill()?;
        if !has1 || !has2 {
            return Ok(false);
        }

        let mut iter1 = file1.record_set.iter();
        let mut iter2 = file2.record_set.iter();
        loop {
            match (iter1.next(), iter2.next()) {
                (Some(r1), Some(r2)) => {
                    let r1 = r1?;
                    let r2 = r2?;
                    self.ready.push_back(owned_query(
                        self.next_id,
                        r1.id(),
                        r1.seq().into_owned(),
                        r2.seq().into_owned(),
                    ));
                    self.next_id += 1;
                }
                (None, None) => break,
                _ => bail!("paired input files have unequal record counts"),
            }
        }
        Ok(true)
    }
}

/// Read all records of one reference file in order, calling
/// `f(record_index, header, sequence)` with 1-based indices.
pub fn for_each_reference_record<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(u32, &str, &[u8]) -> Result<()>,
{
    let mut file = OpenFile::open(path)?;
    let mut index: u32 = 0;
    while file.fill()? {
        for rec in file.record_set.iter() {
            let rec = rec?;
            index += 1;
            let header = String::from_utf8_lossy(rec.id()).into_owned();
            f(index, &header, &rec.seq())?;
        }
    }
    Ok(())
}

/// Load the `index`-th (1-based) record of a reference file.
///
/// Used by the alignment display to recover the subject sequence of a top
/// candidate.
pub fn load_reference_record(path: &Path, index: u32) -> Result<Vec<u8>> {
    let mut file = OpenFile::open(path)?;
    let mut current: u32 = 0;
    while file.fill()? {
        for rec in file.record_set.iter() {
            let rec = rec?;
            current += 1;
            if current == index {
                return Ok(rec.seq().into_owned());
            }
        }
    }
    bail!("record #{index} not found in {}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_fastq(dir: &Path, name: &str, records: &[(&str, &str)]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        for (id, seq) in records {
            writeln!(f, "@{id}\n{seq}\n+\n{}", "I".repeat(seq.len())).unwrap();
        }
        path
    }

    #[test]
    fn test_single_end_batches_preserve_order_and_bound() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_fastq(
            dir.path(),
            "r.fq",
            &[("r1", "ACGT"), ("r2", "GGGG"), ("r3", "TTTT")],
        );
        let mut src = QuerySource::open(&[p], PairingMode::None, 2).unwrap();
        let mut batch = Vec::new();
        let mut errors = Vec::new();

        let mut all = Vec::new();
        while src.next_batch(&mut batch, &mut errors).unwrap() {
            assert!(batch.len() <= 2);
            all.extend(batch.drain(..));
        }
        assert!(errors.is_empty());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, 1);
        assert_eq!(all[2].id, 3);
        assert_eq!(all[1].header, "r2");
        assert_eq!(all[1].seq1, b"GGGG");
        assert!(all[1].seq2.is_empty());
    }

    #[test]
    fn test_paired_files_zip_mates() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_fastq(dir.path(), "r1.fq", &[("a/1", "ACGT"), ("b/1", "CCCC")]);
        let p2 = write_fastq(dir.path(), "r2.fq", &[("a/2", "TTTT"), ("b/2", "GGGG")]);
        let mut src = QuerySource::open(&[p1, p2], PairingMode::Files, 64).unwrap();
        let mut batch = Vec::new();
        let mut errors = Vec::new();
        assert!(src.next_batch(&mut batch, &mut errors).unwrap());
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].header, "a/1");
        assert_eq!(batch[0].seq1, b"ACGT");
        assert_eq!(batch[0].seq2, b"TTTT");
    }

    #[test]
    fn test_sequence_pairing_joins_consecutive_records() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_fastq(
            dir.path(),
            "inter.fq",
            &[("a/1", "ACGT"), ("a/2", "TTTT"), ("b/1", "CCCC")],
        );
        let mut src = QuerySource::open(&[p], PairingMode::Sequences, 64).unwrap();
        let mut batch = Vec::new();
        let mut errors = Vec::new();
        let mut all = Vec::new();
        while src.next_batch(&mut batch, &mut errors).unwrap() {
            all.extend(batch.drain(..));
        }
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].seq1, b"ACGT");
        assert_eq!(all[0].seq2, b"TTTT");
        // odd trailing record stays unpaired
        assert_eq!(all[1].seq1, b"CCCC");
        assert!(all[1].seq2.is_empty());
    }

    #[test]
    fn test_multiple_files_keep_monotone_ids() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = write_fastq(dir.path(), "a.fq", &[("a1", "ACGT"), ("a2", "GGGG")]);
        let p2 = write_fastq(dir.path(), "b.fq", &[("b1", "TTTT")]);
        let mut src = QuerySource::open(&[p1, p2], PairingMode::None, 10).unwrap();
        let mut batch = Vec::new();
        let mut errors = Vec::new();
        let mut all = Vec::new();
        while src.next_batch(&mut batch, &mut errors).unwrap() {
            all.extend(batch.drain(..));
        }
        let ids: Vec<u64> = all.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(all[2].header, "b1");
    }

    #[test]
    fn test_load_reference_record_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let p = write_fastq(dir.path(), "refs.fq", &[("x", "AAAA"), ("y", "CGCG")]);
        assert_eq!(load_reference_record(&p, 2).unwrap(), b"CGCG");
        assert!(load_reference_record(&p, 3).is_err());
    }
}
