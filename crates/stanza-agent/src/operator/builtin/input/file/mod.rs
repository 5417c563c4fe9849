//! The file-tailing input.
//!
//! Discovers files matching the `include` globs minus the `exclude` globs,
//! tails them continuously, and emits one entry per logical record. Files
//! are identified by content fingerprint, so rotation, rename, and
//! copy-truncate are survived without duplication; offsets are checkpointed
//! through the operator's persister so tailing resumes where it left off.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐  poll tick   ┌────────────┐
//!   │ Dispatcher │─────────────>│  Readers   │ (one per live file)
//!   │ (owns the  │<─────────────│ (short-    │
//!   │ file table)│   updates    │  lived)    │
//!   └────────────┘   (mpsc)     └────────────┘
//! ```
//!
//! The dispatcher is the only writer of the known-file table; readers
//! report progress over a channel. At most one reader runs per file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::Persister;
use crate::entry::{Entry, Field, Value};
use crate::operator::builtin::decode_config;
use crate::operator::helper::{deserialize_duration, InputOperator, OutputIds};
use crate::operator::{BuildContext, BuildError, Operator, OperatorError};
use crate::pipeline::Params;

mod fingerprint;
mod reader;
mod splitter;

use fingerprint::Fingerprint;
use reader::{read_to_end, ReaderUpdate};
use splitter::SplitRule;

pub const TYPE: &str = "file_input";

/// Persister key holding the known-file checkpoint list.
const CHECKPOINT_KEY: &str = "known_files";

/// Scans a file must miss before it is forgotten.
const FORGET_AFTER_MISSED_SCANS: u32 = 3;

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_max_log_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Where newly discovered files begin on the first scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    Beginning,
    #[default]
    End,
}

/// Multiline framing: exactly one of the two patterns must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultilineConfig {
    #[serde(default)]
    pub line_start_pattern: String,
    #[serde(default)]
    pub line_end_pattern: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileInputConfig {
    pub id: Option<String>,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    operator_type: Option<String>,
    #[serde(default)]
    pub output: OutputIds,

    /// Glob patterns to tail. Required, non-empty.
    #[serde(default)]
    pub include: Vec<String>,
    /// Glob patterns subtracted from the matches.
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub poll_interval: Duration,
    #[serde(default)]
    pub multiline: Option<MultilineConfig>,
    #[serde(default = "default_true")]
    pub include_file_name: bool,
    #[serde(default)]
    pub include_file_path: bool,
    #[serde(default)]
    pub start_at: StartAt,
    #[serde(default = "default_max_log_size")]
    pub max_log_size: usize,
    /// Character encoding name (IANA or common alias); `nop` passes raw
    /// bytes through as lossy UTF-8.
    #[serde(default)]
    pub encoding: String,
    /// Where the decoded frame text lands in each entry.
    #[serde(default)]
    pub write_to: Option<Field>,
}

pub(crate) fn build(
    params: Params,
    context: &BuildContext,
) -> Result<Arc<dyn Operator>, BuildError> {
    let config: FileInputConfig = decode_config(params)?;
    let id = config.id.unwrap_or_else(|| TYPE.to_string());

    if config.include.is_empty() {
        return Err(BuildError::invalid(&id, "required argument `include` is empty"));
    }
    for pattern in config.include.iter().chain(&config.exclude) {
        glob::Pattern::new(pattern)
            .map_err(|e| BuildError::invalid(&id, format!("parse glob '{pattern}': {e}")))?;
    }
    let exclude = config
        .exclude
        .iter()
        .map(|p| glob::Pattern::new(p).expect("validated above"))
        .collect();

    let encoding = lookup_encoding(&config.encoding)
        .map_err(|message| BuildError::invalid(&id, message))?;
    let splitter = build_split_rule(&id, config.multiline.as_ref(), encoding)?;

    let file_name_field = if config.include_file_name {
        Field::label("file_name")
    } else {
        Field::Nil
    };
    let file_path_field = if config.include_file_path {
        Field::label("file_path")
    } else {
        Field::Nil
    };

    let persister = context.database.scoped(&id)?;

    Ok(Arc::new(FileInput {
        core: Arc::new(FileInputCore {
            input: InputOperator::new(id, TYPE, config.output.into_vec()),
            include: config.include,
            exclude,
            poll_interval: config.poll_interval,
            splitter,
            encoding,
            max_log_size: config.max_log_size,
            start_at_beginning: config.start_at == StartAt::Beginning,
            write_to: config.write_to.unwrap_or_else(Field::record_root),
            file_name_field,
            file_path_field,
            persister,
        }),
        task: Mutex::new(None),
    }))
}

/// Decoding mode for frame bytes.
#[derive(Debug, Clone, Copy)]
enum TextEncoding {
    /// Raw bytes, interpreted as UTF-8 with replacement.
    Nop,
    Labeled(&'static encoding_rs::Encoding),
}

fn lookup_encoding(name: &str) -> Result<TextEncoding, String> {
    match name.to_ascii_lowercase().as_str() {
        "" | "nop" => Ok(TextEncoding::Nop),
        "utf8" | "utf-8" | "ascii" | "us-ascii" => Ok(TextEncoding::Labeled(encoding_rs::UTF_8)),
        "utf16" | "utf-16" => Ok(TextEncoding::Labeled(encoding_rs::UTF_16LE)),
        other => encoding_rs::Encoding::for_label(other.as_bytes())
            .map(TextEncoding::Labeled)
            .ok_or_else(|| format!("unsupported encoding '{name}'")),
    }
}

/// The byte sequences that terminate a line under `encoding`.
fn encoded_newlines(encoding: TextEncoding) -> (Vec<u8>, Vec<u8>) {
    match encoding {
        TextEncoding::Labeled(e) if e == encoding_rs::UTF_16LE => {
            (vec![0x0A, 0x00], vec![0x0D, 0x00])
        }
        TextEncoding::Labeled(e) if e == encoding_rs::UTF_16BE => {
            (vec![0x00, 0x0A], vec![0x00, 0x0D])
        }
        _ => (vec![b'\n'], vec![b'\r']),
    }
}

fn build_split_rule(
    id: &str,
    multiline: Option<&MultilineConfig>,
    encoding: TextEncoding,
) -> Result<SplitRule, BuildError> {
    let Some(multiline) = multiline else {
        let (newline, carriage_return) = encoded_newlines(encoding);
        return Ok(SplitRule::Newline {
            newline,
            carriage_return,
        });
    };

    let start = &multiline.line_start_pattern;
    let end = &multiline.line_end_pattern;
    match (start.is_empty(), end.is_empty()) {
        (false, false) => Err(BuildError::invalid(
            id,
            "only one of line_start_pattern or line_end_pattern can be set",
        )),
        (true, true) => Err(BuildError::invalid(
            id,
            "one of line_start_pattern or line_end_pattern must be set",
        )),
        (false, true) => {
            let re = regex::bytes::Regex::new(&format!("(?m){start}"))
                .map_err(|e| BuildError::invalid(id, format!("compile line start regex: {e}")))?;
            Ok(SplitRule::LineStart(re))
        }
        (true, false) => {
            let re = regex::bytes::Regex::new(&format!("(?m){end}"))
                .map_err(|e| BuildError::invalid(id, format!("compile line end regex: {e}")))?;
            Ok(SplitRule::LineEnd(re))
        }
    }
}

/// State shared between the operator, the dispatcher, and its readers.
pub(super) struct FileInputCore {
    input: InputOperator,
    include: Vec<String>,
    exclude: Vec<glob::Pattern>,
    poll_interval: Duration,
    splitter: SplitRule,
    encoding: TextEncoding,
    max_log_size: usize,
    start_at_beginning: bool,
    write_to: Field,
    file_name_field: Field,
    file_path_field: Field,
    persister: Arc<dyn Persister>,
}

impl FileInputCore {
    fn decode(&self, bytes: &[u8]) -> String {
        match self.encoding {
            TextEncoding::Nop => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Labeled(encoding) => encoding.decode(bytes).0.into_owned(),
        }
    }

    /// Builds and writes one entry for a decoded frame.
    async fn emit(&self, ctx: &CancellationToken, text: String, path: &Path) {
        let mut entry = Entry::new();
        entry.set(&self.write_to, Value::from(text));
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.file_name_field.set(&mut entry, Value::from(name));
        }
        self.file_path_field
            .set(&mut entry, Value::from(path.display().to_string()));

        if let Err(err) = self.input.write(ctx, entry).await {
            warn!(operator = %self.input.id(), error = %err, "failed to write entry");
        }
    }
}

/// One entry in the known-file table.
struct KnownFile {
    id: u64,
    path: PathBuf,
    fingerprint: Fingerprint,
    offset: u64,
    last_seen_size: u64,
    reading: bool,
    missed_scans: u32,
    /// Matched to a path during the current scan.
    seen_this_scan: bool,
}

/// Checkpoint form of one known file.
#[derive(Debug, Serialize, Deserialize)]
struct FileCheckpoint {
    fingerprint: Fingerprint,
    offset: u64,
    last_seen_size: u64,
    path: String,
}

/// The file-tailing input operator.
pub struct FileInput {
    core: Arc<FileInputCore>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

#[async_trait]
impl Operator for FileInput {
    fn id(&self) -> String {
        self.core.input.id()
    }

    fn operator_type(&self) -> &str {
        TYPE
    }

    async fn start(&self) -> Result<(), OperatorError> {
        let mut task = self.task.lock().expect("task lock");
        if task.is_some() {
            return Ok(());
        }

        let known = load_checkpoints(&self.core);
        let token = CancellationToken::new();
        let child = token.clone();
        let mut poller = Poller {
            core: Arc::clone(&self.core),
            known,
            next_file_id: 0,
            active_readers: 0,
            first_check: true,
        };
        poller.assign_file_ids();
        let handle = tokio::spawn(async move { poller.run(child).await });
        *task = Some((token, handle));
        Ok(())
    }

    async fn stop(&self) -> Result<(), OperatorError> {
        let taken = self.task.lock().expect("task lock").take();
        if let Some((token, handle)) = taken {
            token.cancel();
            let _ = handle.await;
        }
        Ok(())
    }

    fn can_process(&self) -> bool {
        false
    }

    fn can_output(&self) -> bool {
        true
    }

    fn output_ids(&self) -> Vec<String> {
        self.core.input.writer().output_ids()
    }

    fn set_output_ids(&self, ids: Vec<String>) {
        self.core.input.writer().set_output_ids(ids);
    }

    fn outputs(&self) -> Vec<Arc<dyn Operator>> {
        self.core.input.writer().outputs()
    }

    fn set_outputs(&self, candidates: &[Arc<dyn Operator>]) -> Result<(), BuildError> {
        self.core.input.writer().resolve_outputs(candidates)
    }

    async fn process(&self, _ctx: &CancellationToken, _entry: Entry) -> Result<(), OperatorError> {
        Err(OperatorError::process(
            self.id(),
            "input operators do not process entries",
        ))
    }
}

/// Restores the known-file table from the operator's checkpoint, if any.
fn load_checkpoints(core: &FileInputCore) -> Vec<KnownFile> {
    let blob = match core.persister.get(CHECKPOINT_KEY) {
        Ok(Some(blob)) => blob,
        Ok(None) => return Vec::new(),
        Err(err) => {
            warn!(operator = %core.input.id(), error = %err, "failed to load checkpoints");
            return Vec::new();
        }
    };
    match serde_json::from_slice::<Vec<FileCheckpoint>>(&blob) {
        Ok(checkpoints) => checkpoints
            .into_iter()
            .map(|cp| KnownFile {
                id: 0,
                path: PathBuf::from(cp.path),
                fingerprint: cp.fingerprint,
                offset: cp.offset,
                last_seen_size: cp.last_seen_size,
                reading: false,
                missed_scans: 0,
                seen_this_scan: false,
            })
            .collect(),
        Err(err) => {
            warn!(operator = %core.input.id(), error = %err, "failed to decode checkpoints; starting fresh");
            Vec::new()
        }
    }
}

/// The dispatcher: owns the known-file table, discovers files on every
/// tick, and launches at most one reader per file.
struct Poller {
    core: Arc<FileInputCore>,
    known: Vec<KnownFile>,
    next_file_id: u64,
    active_readers: usize,
    first_check: bool,
}

impl Poller {
    fn assign_file_ids(&mut self) {
        for file in &mut self.known {
            file.id = self.next_file_id;
            self.next_file_id += 1;
        }
    }

    async fn run(mut self, token: CancellationToken) {
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<ReaderUpdate>();
        let mut ticker = tokio::time::interval(self.core.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => self.poll(&token, &updates_tx).await,
                Some(update) = updates_rx.recv() => self.apply(update),
            }
        }

        // Drain in-flight readers; they observe the cancelled token and
        // finish promptly.
        while self.active_readers > 0 {
            match tokio::time::timeout(Duration::from_secs(5), updates_rx.recv()).await {
                Ok(Some(update)) => self.apply(update),
                _ => break,
            }
        }
        self.checkpoint();
        debug!(operator = %self.core.input.id(), "file dispatcher stopped");
    }

    fn apply(&mut self, update: ReaderUpdate) {
        match update {
            ReaderUpdate::Offset { file_id, offset } => {
                if let Some(file) = self.known.iter_mut().find(|f| f.id == file_id) {
                    file.offset = offset;
                }
            }
            ReaderUpdate::FileSize { file_id, size } => {
                if let Some(file) = self.known.iter_mut().find(|f| f.id == file_id) {
                    file.last_seen_size = size;
                }
            }
            ReaderUpdate::Finished { file_id } => {
                if let Some(file) = self.known.iter_mut().find(|f| f.id == file_id) {
                    file.reading = false;
                }
                self.active_readers = self.active_readers.saturating_sub(1);
                self.checkpoint();
            }
        }
    }

    async fn poll(
        &mut self,
        token: &CancellationToken,
        updates_tx: &mpsc::UnboundedSender<ReaderUpdate>,
    ) {
        for file in &mut self.known {
            file.seen_this_scan = false;
        }

        for path in self.discover() {
            let fingerprint = match Fingerprint::read(&path).await {
                Ok(fingerprint) => fingerprint,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to fingerprint file");
                    continue;
                }
            };
            // Empty files have no identity yet; wait for content.
            if fingerprint.is_empty() {
                continue;
            }

            let matched = self
                .known
                .iter()
                .position(|file| !file.seen_this_scan && file.fingerprint.matches(&fingerprint));
            match matched {
                Some(index) => {
                    // Same file, possibly renamed or grown; adopt the new
                    // path and the longer fingerprint.
                    let file = &mut self.known[index];
                    file.path = path;
                    if fingerprint.first_bytes.len() > file.fingerprint.first_bytes.len() {
                        file.fingerprint = fingerprint;
                    }
                    file.seen_this_scan = true;
                    file.missed_scans = 0;
                }
                None => {
                    let offset = if self.first_check && !self.core.start_at_beginning {
                        match tokio::fs::metadata(&path).await {
                            Ok(meta) => meta.len(),
                            Err(_) => 0,
                        }
                    } else {
                        0
                    };
                    let id = self.next_file_id;
                    self.next_file_id += 1;
                    debug!(path = %path.display(), offset, "tracking new file");
                    self.known.push(KnownFile {
                        id,
                        path,
                        fingerprint,
                        offset,
                        last_seen_size: 0,
                        reading: false,
                        missed_scans: 0,
                        seen_this_scan: true,
                    });
                }
            }
        }

        // Files missing from several consecutive scans are forgotten; the
        // next checkpoint write drops their state.
        self.known.retain_mut(|file| {
            if file.seen_this_scan {
                return true;
            }
            file.missed_scans += 1;
            file.missed_scans < FORGET_AFTER_MISSED_SCANS || file.reading
        });

        for file in &mut self.known {
            if file.seen_this_scan && !file.reading {
                file.reading = true;
                self.active_readers += 1;
                tokio::spawn(read_to_end(
                    Arc::clone(&self.core),
                    token.child_token(),
                    file.id,
                    file.path.clone(),
                    file.offset,
                    file.last_seen_size,
                    updates_tx.clone(),
                ));
            }
        }

        self.first_check = false;
    }

    /// Expands the include globs, subtracts the excludes, and keeps plain
    /// files only.
    fn discover(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for pattern in &self.core.include {
            let walker = match glob::glob(pattern) {
                Ok(walker) => walker,
                Err(err) => {
                    warn!(pattern, error = %err, "failed to expand include glob");
                    continue;
                }
            };
            for path in walker.flatten() {
                if !path.is_file() {
                    continue;
                }
                if self.core.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    /// Writes the known-file set through the persister. Best-effort: a
    /// failed write is logged and retried at the next checkpoint.
    fn checkpoint(&self) {
        let checkpoints: Vec<FileCheckpoint> = self
            .known
            .iter()
            .map(|file| FileCheckpoint {
                fingerprint: file.fingerprint.clone(),
                offset: file.offset,
                last_seen_size: file.last_seen_size,
                path: file.path.display().to_string(),
            })
            .collect();
        let blob = match serde_json::to_vec(&checkpoints) {
            Ok(blob) => blob,
            Err(err) => {
                warn!(operator = %self.core.input.id(), error = %err, "failed to encode checkpoints");
                return;
            }
        };
        if let Err(err) = self.core.persister.set(CHECKPOINT_KEY, &blob) {
            warn!(operator = %self.core.input.id(), error = %err, "failed to persist checkpoints");
        }
    }
}
