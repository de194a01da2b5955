//! Step journal - persists dispatch records to a JSONL file
//!
//! The journal subscribes to the engine's before/after dispatch streams and
//! writes one JSON line per notification, for history and debugging of a
//! navigation session.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use stepchan::Subscription;
use tracing::{debug, error, warn};

use super::types::{DispatchEvent, DispatchPhase, DispatchRecord};
use crate::coordinator::CoordinatorHandle;
use crate::step::Step;

/// Journal file name inside the target directory.
const JOURNAL_FILE: &str = "steps.jsonl";

/// Writes dispatch records to `{dir}/steps.jsonl`.
pub struct StepJournal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl StepJournal {
    /// Create (or append to) the journal under `dir`.
    pub fn create(dir: impl AsRef<Path>) -> eyre::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(JOURNAL_FILE);
        debug!(?path, "StepJournal::create");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a JSON line.
    pub fn write_record(&mut self, record: &DispatchRecord) -> eyre::Result<()> {
        let json = serde_json::to_string(record)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consume the observer streams until both close.
    ///
    /// Meant to be spawned as a background task; see [`spawn_step_journal`].
    pub async fn run<S: Step>(
        mut self,
        mut will: Subscription<DispatchEvent<S>>,
        mut did: Subscription<DispatchEvent<S>>,
    ) {
        debug!(path = ?self.path, "StepJournal::run: starting");
        // Each stream ends independently; records still buffered on the
        // other one must not be dropped at shutdown.
        let mut will_open = true;
        let mut did_open = true;
        while will_open || did_open {
            let record = tokio::select! {
                event = will.next(), if will_open => match event {
                    Some(event) => DispatchRecord::from_event(&event, DispatchPhase::Will),
                    None => {
                        will_open = false;
                        continue;
                    }
                },
                event = did.next(), if did_open => match event {
                    Some(event) => DispatchRecord::from_event(&event, DispatchPhase::Did),
                    None => {
                        did_open = false;
                        continue;
                    }
                },
            };

            if let Err(e) = self.write_record(&record) {
                error!(error = %e, "StepJournal: failed to write record");
            }
        }
        let _ = self.writer.flush();
        debug!("StepJournal::run: streams closed, shutting down");
    }
}

/// Spawn the journal as a background task consuming the handle's observer
/// streams.
pub fn spawn_step_journal<S: Step>(
    handle: &CoordinatorHandle<S>,
    dir: impl AsRef<Path>,
) -> eyre::Result<tokio::task::JoinHandle<()>> {
    let journal = StepJournal::create(dir)?;
    let will = handle.will_dispatch();
    let did = handle.did_dispatch();
    Ok(tokio::spawn(journal.run(will, did)))
}

/// Read all records back from a journal directory.
pub fn read_journal(dir: impl AsRef<Path>) -> eyre::Result<Vec<DispatchRecord>> {
    let path = dir.as_ref().join(JOURNAL_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&path)?;
    let mut records = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DispatchRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(line, error = %e, "read_journal: failed to parse line");
            }
        }
    }

    debug!(count = records.len(), "read_journal: loaded records");
    Ok(records)
}
