//! Transfer work queue.
//!
//! A dedicated worker thread owns the session borrow for the duration of a
//! batch and executes queued commands in order. Directories uploaded through
//! the queue are remembered, so files queued later land under the object that
//! was created for their local parent directory. Once a transfer is aborted
//! every remaining command is skipped.

use crossbeam_channel::{Receiver, Sender};
use mtp_core::{AbortHandle, Error, ObjectHandle, Session, StorageId};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Scope, ScopedJoinHandle};
use std::time::Duration;
use walkdir::WalkDir;

/// Work item for the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Create a device directory for a local directory
    MakeDirectory {
        /// Local directory the new object stands for
        local: PathBuf,
    },
    /// Upload a local file
    UploadFile {
        /// Local file
        local: PathBuf,
        /// File size in bytes
        size: u64,
    },
    /// Download a device object into a local file
    DownloadFile {
        /// Object to read
        handle: ObjectHandle,
        /// Destination file; parent directories are created
        local: PathBuf,
        /// Expected size in bytes
        size: u64,
    },
    /// No more commands follow
    Finish,
}

impl QueueCommand {
    fn label(&self) -> String {
        match self {
            Self::MakeDirectory { local } => format!("mkdir {}", local.display()),
            Self::UploadFile { local, .. } => format!("put {}", local.display()),
            Self::DownloadFile { local, .. } => format!("get {}", local.display()),
            Self::Finish => "finish".to_string(),
        }
    }

    fn size(&self) -> u64 {
        match self {
            Self::UploadFile { size, .. } | Self::DownloadFile { size, .. } => *size,
            Self::MakeDirectory { .. } | Self::Finish => 0,
        }
    }
}

/// Worker report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A command started executing
    Started {
        /// Position of the command in the queue
        index: usize,
        /// Human-readable description
        label: String,
        /// Bytes the command will move
        size: u64,
    },
    /// Bytes moved by the running command
    Progress {
        /// Position of the command in the queue
        index: usize,
        /// Bytes moved by this command so far
        transferred: u64,
        /// Bytes moved by the whole batch so far
        total: u64,
    },
    /// A command failed; the batch continues unless it was aborted
    Failed {
        /// Position of the command in the queue
        index: usize,
        /// Human-readable description
        label: String,
        /// Error message
        error: String,
        /// Whether the device is gone
        fatal: bool,
    },
    /// The worker stopped
    Finished(QueueSummary),
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSummary {
    /// Commands that completed
    pub completed: usize,
    /// Commands that failed
    pub failed: usize,
    /// Commands skipped after an abort
    pub skipped: usize,
    /// Payload bytes moved
    pub bytes: u64,
    /// Whether the batch was aborted
    pub aborted: bool,
}

/// Handle to a running work queue
pub struct WorkQueue<'scope> {
    commands: Sender<QueueCommand>,
    events: Receiver<QueueEvent>,
    aborted: Arc<AtomicBool>,
    abort_handle: AbortHandle,
    abort_timeout: Duration,
    worker: ScopedJoinHandle<'scope, QueueSummary>,
}

impl<'scope> WorkQueue<'scope> {
    /// Start a worker thread driving `session`.
    ///
    /// New objects are created on `storage`; local directories without a
    /// mapping resolve to `base`.
    pub fn start<'env>(
        scope: &'scope Scope<'scope, 'env>,
        session: &'scope mut Session,
        storage: StorageId,
        base: ObjectHandle,
    ) -> Self {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let aborted = Arc::new(AtomicBool::new(false));
        let abort_handle = session.abort_handle();
        let abort_timeout = session.abort_timeout();

        let worker = {
            let aborted = Arc::clone(&aborted);
            scope.spawn(move || {
                let mut worker = Worker {
                    session,
                    storage,
                    base,
                    directories: HashMap::new(),
                    events: event_tx,
                    aborted,
                    total: 0,
                };
                worker.run(&command_rx)
            })
        };

        Self {
            commands: command_tx,
            events: event_rx,
            aborted,
            abort_handle,
            abort_timeout,
            worker,
        }
    }

    /// Queue a command; returns false once the worker has stopped
    pub fn push(&self, command: QueueCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Worker events, closed when the worker exits
    #[must_use]
    pub fn events(&self) -> &Receiver<QueueEvent> {
        &self.events
    }

    /// Abort the running transfer and skip everything queued after it
    ///
    /// # Errors
    /// Returns the error of the device-side cancel request
    pub fn abort(&self) -> mtp_core::Result<()> {
        self.aborted.store(true, Ordering::SeqCst);
        self.abort_handle
            .abort_current_transaction(self.abort_timeout)
    }

    /// Send `Finish` and wait for the worker
    ///
    /// # Errors
    /// Returns an error if the worker thread panicked
    pub fn finish(self) -> anyhow::Result<QueueSummary> {
        let _ = self.commands.send(QueueCommand::Finish);
        self.worker
            .join()
            .map_err(|_| anyhow::anyhow!("transfer worker panicked"))
    }
}

struct Worker<'a> {
    session: &'a mut Session,
    storage: StorageId,
    base: ObjectHandle,
    directories: HashMap<PathBuf, ObjectHandle>,
    events: Sender<QueueEvent>,
    aborted: Arc<AtomicBool>,
    total: u64,
}

impl Worker<'_> {
    fn run(&mut self, commands: &Receiver<QueueCommand>) -> QueueSummary {
        let mut summary = QueueSummary::default();

        for (index, command) in commands.iter().enumerate() {
            if command == QueueCommand::Finish {
                break;
            }
            let label = command.label();
            if self.aborted.load(Ordering::SeqCst) {
                tracing::debug!(index, %label, "Skipping after abort");
                summary.skipped += 1;
                continue;
            }

            self.emit(QueueEvent::Started {
                index,
                label: label.clone(),
                size: command.size(),
            });
            match self.execute(index, &command) {
                Ok(()) => summary.completed += 1,
                Err(err) => {
                    let cause = err.downcast_ref::<Error>();
                    if cause.is_some_and(Error::is_aborted) {
                        self.aborted.store(true, Ordering::SeqCst);
                    }
                    tracing::warn!(index, %label, "Queued command failed: {err:#}");
                    summary.failed += 1;
                    self.emit(QueueEvent::Failed {
                        index,
                        label,
                        error: format!("{err:#}"),
                        fatal: cause.is_some_and(Error::is_fatal),
                    });
                }
            }
        }

        summary.bytes = self.total;
        summary.aborted = self.aborted.load(Ordering::SeqCst);
        self.emit(QueueEvent::Finished(summary.clone()));
        summary
    }

    fn emit(&self, event: QueueEvent) {
        // The receiver may already be gone when the caller stopped listening
        let _ = self.events.send(event);
    }

    fn parent_for(&self, local: &Path) -> ObjectHandle {
        local
            .parent()
            .and_then(|dir| self.directories.get(dir))
            .copied()
            .unwrap_or(self.base)
    }

    fn execute(&mut self, index: usize, command: &QueueCommand) -> anyhow::Result<()> {
        match command {
            QueueCommand::MakeDirectory { local } => {
                let name = file_name(local)?;
                let parent = self.parent_for(local);
                let created = self.session.create_directory(self.storage, parent, &name)?;
                self.directories.insert(local.clone(), created.handle);
            }
            QueueCommand::UploadFile { local, size } => {
                let name = file_name(local)?;
                let parent = self.parent_for(local);
                let mut reader = BufReader::new(File::open(local)?);
                let base_total = self.total;
                let events = self.events.clone();
                let mut report = |transferred: u64| {
                    let _ = events.send(QueueEvent::Progress {
                        index,
                        transferred,
                        total: base_total + transferred,
                    });
                };
                self.session.upload(
                    self.storage,
                    parent,
                    &name,
                    &mut reader,
                    *size,
                    Some(&mut report),
                )?;
                self.total += size;
            }
            QueueCommand::DownloadFile { handle, local, .. } => {
                if let Some(dir) = local.parent() {
                    fs::create_dir_all(dir)?;
                }
                let mut writer = BufWriter::new(File::create(local)?);
                let base_total = self.total;
                let events = self.events.clone();
                let mut report = |transferred: u64| {
                    let _ = events.send(QueueEvent::Progress {
                        index,
                        transferred,
                        total: base_total + transferred,
                    });
                };
                let written = self
                    .session
                    .get_object(*handle, &mut writer, Some(&mut report));
                match written {
                    Ok(written) => {
                        writer.flush()?;
                        self.total += written;
                    }
                    Err(err) => {
                        drop(writer);
                        let _ = fs::remove_file(local);
                        return Err(err.into());
                    }
                }
            }
            QueueCommand::Finish => {}
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("{} has no file name", path.display()))
}

/// Plan the upload of a local file or directory tree.
///
/// Directories come before their contents, so the queue has created a
/// parent by the time its children are sent.
///
/// # Errors
/// Returns an error if the tree cannot be walked
pub fn plan_upload(root: &Path) -> anyhow::Result<Vec<QueueCommand>> {
    let mut plan = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path().to_path_buf();
        if entry.file_type().is_dir() {
            plan.push(QueueCommand::MakeDirectory { local: path });
        } else if entry.file_type().is_file() {
            let size = entry.metadata()?.len();
            plan.push(QueueCommand::UploadFile { local: path, size });
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular file");
        }
    }
    Ok(plan)
}

/// Plan the download of a device object into `dest`.
///
/// Directories are walked recursively. Empty directories are created locally
/// while planning, since no transfer will create them.
///
/// # Errors
/// Returns the session error of any listing or info query
pub fn plan_download(
    session: &mut Session,
    handle: ObjectHandle,
    dest: &Path,
) -> anyhow::Result<Vec<QueueCommand>> {
    let mut plan = Vec::new();
    let info = session.get_object_info(handle)?;
    let target = dest.join(&info.filename);
    if info.is_directory() {
        collect_download(session, handle, &target, &mut plan)?;
    } else {
        plan.push(QueueCommand::DownloadFile {
            handle,
            local: target,
            size: u64::from(info.compressed_size),
        });
    }
    Ok(plan)
}

fn collect_download(
    session: &mut Session,
    dir: ObjectHandle,
    local: &Path,
    plan: &mut Vec<QueueCommand>,
) -> anyhow::Result<()> {
    let children = session.get_object_handles(
        StorageId::ALL,
        mtp_core::ObjectFormat::ANY,
        dir,
    )?;
    if children.is_empty() {
        fs::create_dir_all(local)?;
    }
    for child in children {
        let info = session.get_object_info(child)?;
        let target = local.join(&info.filename);
        if info.is_directory() {
            collect_download(session, child, &target, plan)?;
        } else {
            plan.push(QueueCommand::DownloadFile {
                handle: child,
                local: target,
                size: u64::from(info.compressed_size),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtp_core::container::{ContainerType, encode_container};
    use mtp_core::SessionConfig;
    use mtp_transport::{ScriptHandle, ScriptedTransport};

    fn response(tx: u32, code: u16, params: &[u32]) -> Vec<u8> {
        encode_container(ContainerType::Response, code, tx, params, None)
    }

    fn open_session() -> (Session, ScriptHandle) {
        let (transport, script) = ScriptedTransport::new(512);
        script.push_inbound(response(1, 0x2001, &[]));
        let mut session = Session::new(
            Box::new(transport),
            SessionConfig {
                close_on_drop: false,
                ..SessionConfig::default()
            },
        );
        session.open(1).unwrap();
        (session, script)
    }

    fn drain(queue: &WorkQueue<'_>) -> Vec<QueueEvent> {
        queue.events().try_iter().collect()
    }

    #[test]
    fn test_plan_upload_orders_directories_first() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("album");
        fs::create_dir_all(root.join("disc1")).unwrap();
        fs::write(root.join("disc1/01.mp3"), b"abc").unwrap();
        fs::write(root.join("cover.jpg"), b"jpeg").unwrap();

        let plan = plan_upload(&root).unwrap();
        assert_eq!(
            plan,
            vec![
                QueueCommand::MakeDirectory { local: root.clone() },
                QueueCommand::UploadFile {
                    local: root.join("cover.jpg"),
                    size: 4
                },
                QueueCommand::MakeDirectory {
                    local: root.join("disc1")
                },
                QueueCommand::UploadFile {
                    local: root.join("disc1/01.mp3"),
                    size: 3
                },
            ]
        );
    }

    #[test]
    fn test_upload_uses_created_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), b"hello").unwrap();

        let (mut session, script) = open_session();
        // mkdir docs -> handle 7
        script.push_inbound(response(2, 0x2001, &[1, 0xFFFF_FFFF, 7]));
        // SendObjectInfo a.txt -> handle 8, then SendObject
        script.push_inbound(response(3, 0x2001, &[1, 7, 8]));
        script.push_inbound(response(4, 0x2001, &[]));

        let summary = std::thread::scope(|scope| {
            let queue = WorkQueue::start(scope, &mut session, StorageId(1), ObjectHandle::ROOT);
            for command in plan_upload(&root).unwrap() {
                assert!(queue.push(command));
            }
            queue.finish().unwrap()
        });

        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.bytes, 5);
        assert!(!summary.aborted);

        // SendObjectInfo for a.txt carries [storage, parent] = [1, 7]
        let sent = script.sent();
        let info_command = sent
            .iter()
            .filter(|buf| buf.len() == 20 && buf[4..8] == [0x01, 0x00, 0x0C, 0x10])
            .nth(1)
            .unwrap();
        assert_eq!(&info_command[12..16], &1u32.to_le_bytes());
        assert_eq!(&info_command[16..20], &7u32.to_le_bytes());
    }

    #[test]
    fn test_failure_reported_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, script) = open_session();
        script.push_inbound(response(2, 0x200C, &[]));
        script.push_inbound(response(3, 0x2001, &[1, 0xFFFF_FFFF, 9]));

        let (summary, events) = std::thread::scope(|scope| {
            let queue = WorkQueue::start(scope, &mut session, StorageId(1), ObjectHandle::ROOT);
            queue.push(QueueCommand::MakeDirectory {
                local: dir.path().join("first"),
            });
            queue.push(QueueCommand::MakeDirectory {
                local: dir.path().join("second"),
            });
            let events = queue.events().clone();
            let summary = queue.finish().unwrap();
            (summary, events.try_iter().collect::<Vec<_>>())
        });

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert!(events.iter().any(|event| matches!(
            event,
            QueueEvent::Failed { index: 0, error, .. } if error.contains("StoreFull")
        )));
        assert!(matches!(events.last(), Some(QueueEvent::Finished(_))));
    }

    #[test]
    fn test_abort_skips_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, script) = open_session();

        let summary = std::thread::scope(|scope| {
            let queue = WorkQueue::start(scope, &mut session, StorageId(1), ObjectHandle::ROOT);
            queue.abort().unwrap();
            queue.push(QueueCommand::MakeDirectory {
                local: dir.path().join("x"),
            });
            queue.push(QueueCommand::UploadFile {
                local: dir.path().join("y"),
                size: 1,
            });
            let _ = drain(&queue);
            queue.finish().unwrap()
        });

        assert!(summary.aborted);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.completed, 0);
        // Only OpenSession went out
        assert_eq!(script.sent().len(), 1);
    }

    #[test]
    fn test_download_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (mut session, script) = open_session();
        let payload = vec![0xAB; 1000];
        script.push_inbound(encode_container(
            ContainerType::Data,
            0x1009,
            2,
            &[],
            Some(&payload),
        ));
        script.push_inbound(response(2, 0x2001, &[]));

        let target = dir.path().join("sub/photo.jpg");
        let (summary, events) = std::thread::scope(|scope| {
            let queue = WorkQueue::start(scope, &mut session, StorageId(1), ObjectHandle::ROOT);
            queue.push(QueueCommand::DownloadFile {
                handle: ObjectHandle(5),
                local: target.clone(),
                size: 1000,
            });
            let events = queue.events().clone();
            let summary = queue.finish().unwrap();
            (summary, events.try_iter().collect::<Vec<_>>())
        });

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.bytes, 1000);
        assert_eq!(fs::read(&target).unwrap(), payload);
        let last_progress = events
            .iter()
            .filter_map(|event| match event {
                QueueEvent::Progress { total, .. } => Some(*total),
                _ => None,
            })
            .last();
        assert_eq!(last_progress, Some(1000));
    }
}
