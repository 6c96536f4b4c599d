//! Interactive shell and command dispatch.
//!
//! Every command, interactive or one-shot, goes through [`Shell::execute`].
//! The dispatch table is indexed by [`CommandKind`]; each entry fixes the
//! argument shape that is checked before the handler runs.

use crate::progress::{TransferProgress, format_bytes, format_duration, format_rate};
use crate::queue::{self, QueueCommand, QueueEvent, QueueSummary, WorkQueue};
use crate::tokenizer::tokenize;
use anyhow::{Context, bail};
use console::style;
use mtp_core::resolver::split_parent;
use mtp_core::{
    DevicePropertyCode, Error, ObjectFormat, ObjectHandle, OperationCode, Resolver, Session,
    StorageId, property,
};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Shell command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// List commands
    Help,
    /// Leave the shell
    Quit,
    /// List a directory
    Ls,
    /// Change directory
    Cd,
    /// Print the current directory
    Pwd,
    /// Download one file
    Get,
    /// Upload one file
    Put,
    /// Delete an object
    Rm,
    /// Create a directory
    Mkdir,
    /// Device information
    Info,
    /// Storage information
    Storages,
    /// Object properties
    Props,
    /// Device properties
    DeviceProps,
    /// Upload a local tree through the work queue
    Upload,
    /// Download a device tree through the work queue
    Download,
}

/// Accepted argument counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// No arguments
    None,
    /// Zero or one argument
    Optional,
    /// Exactly one argument
    One,
    /// One required and one optional argument
    OneOrTwo,
}

impl ArgShape {
    pub(crate) fn accepts(self, count: usize) -> bool {
        match self {
            Self::None => count == 0,
            Self::Optional => count <= 1,
            Self::One => count == 1,
            Self::OneOrTwo => (1..=2).contains(&count),
        }
    }
}

/// Dispatch table entry
#[derive(Debug)]
pub struct CommandSpec {
    /// Command this entry describes
    pub kind: CommandKind,
    /// Name typed at the prompt
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Accepted arguments
    pub shape: ArgShape,
    /// Argument synopsis
    pub usage: &'static str,
    /// One-line description
    pub help: &'static str,
}

static COMMANDS: [CommandSpec; 15] = [
    CommandSpec {
        kind: CommandKind::Help,
        name: "help",
        aliases: &["?"],
        shape: ArgShape::Optional,
        usage: "[command]",
        help: "show available commands",
    },
    CommandSpec {
        kind: CommandKind::Quit,
        name: "quit",
        aliases: &["exit"],
        shape: ArgShape::None,
        usage: "",
        help: "close the session and leave",
    },
    CommandSpec {
        kind: CommandKind::Ls,
        name: "ls",
        aliases: &["dir"],
        shape: ArgShape::Optional,
        usage: "[path]",
        help: "list a directory",
    },
    CommandSpec {
        kind: CommandKind::Cd,
        name: "cd",
        aliases: &[],
        shape: ArgShape::Optional,
        usage: "[path]",
        help: "change directory (no argument goes to the root)",
    },
    CommandSpec {
        kind: CommandKind::Pwd,
        name: "pwd",
        aliases: &[],
        shape: ArgShape::None,
        usage: "",
        help: "print the current directory",
    },
    CommandSpec {
        kind: CommandKind::Get,
        name: "get",
        aliases: &[],
        shape: ArgShape::OneOrTwo,
        usage: "<path> [local]",
        help: "download a file",
    },
    CommandSpec {
        kind: CommandKind::Put,
        name: "put",
        aliases: &[],
        shape: ArgShape::OneOrTwo,
        usage: "<local> [dir]",
        help: "upload a file",
    },
    CommandSpec {
        kind: CommandKind::Rm,
        name: "rm",
        aliases: &["del"],
        shape: ArgShape::One,
        usage: "<path>",
        help: "delete a file or directory",
    },
    CommandSpec {
        kind: CommandKind::Mkdir,
        name: "mkdir",
        aliases: &[],
        shape: ArgShape::One,
        usage: "<path>",
        help: "create a directory",
    },
    CommandSpec {
        kind: CommandKind::Info,
        name: "info",
        aliases: &[],
        shape: ArgShape::None,
        usage: "",
        help: "show device information",
    },
    CommandSpec {
        kind: CommandKind::Storages,
        name: "storages",
        aliases: &["df"],
        shape: ArgShape::None,
        usage: "",
        help: "show storages and free space",
    },
    CommandSpec {
        kind: CommandKind::Props,
        name: "props",
        aliases: &[],
        shape: ArgShape::One,
        usage: "<path>",
        help: "show object properties",
    },
    CommandSpec {
        kind: CommandKind::DeviceProps,
        name: "device-props",
        aliases: &[],
        shape: ArgShape::None,
        usage: "",
        help: "show device properties",
    },
    CommandSpec {
        kind: CommandKind::Upload,
        name: "upload",
        aliases: &[],
        shape: ArgShape::OneOrTwo,
        usage: "<local> [dir]",
        help: "upload a file or directory tree",
    },
    CommandSpec {
        kind: CommandKind::Download,
        name: "download",
        aliases: &[],
        shape: ArgShape::OneOrTwo,
        usage: "<path> [local-dir]",
        help: "download a file or directory tree",
    },
];

impl CommandKind {
    /// Dispatch table entry
    #[must_use]
    pub fn spec(self) -> &'static CommandSpec {
        &COMMANDS[self as usize]
    }

    /// Look a command up by name or alias
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|spec| spec.name == name || spec.aliases.contains(&name))
            .map(|spec| spec.kind)
    }
}

/// Whether the shell keeps reading commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next command
    Continue,
    /// Leave the shell
    Quit,
}

/// Interactive shell state
pub struct Shell {
    session: Session,
    resolver: Resolver,
    cwd: ObjectHandle,
    cwd_path: Vec<String>,
    storage: StorageId,
    prompt: String,
}

impl Shell {
    /// Build a shell, reading the prompt and default storage from the device
    ///
    /// # Errors
    /// Returns an error if GetDeviceInfo or GetStorageIDs fails
    pub fn new(mut session: Session, resolver: Resolver) -> anyhow::Result<Self> {
        let device = session.get_device_info().context("reading device info")?;
        let storage = session
            .get_storage_ids()
            .context("reading storage ids")?
            .first()
            .copied()
            .unwrap_or(StorageId::DEVICE_CHOOSES);
        let prompt = format!("{} {}> ", device.manufacturer, device.model);
        Ok(Self::with_prompt(session, resolver, storage, prompt))
    }

    /// Build a shell with an explicit prompt and default storage
    #[must_use]
    pub fn with_prompt(
        session: Session,
        resolver: Resolver,
        storage: StorageId,
        prompt: String,
    ) -> Self {
        let cwd = resolver.root();
        Self {
            session,
            resolver,
            cwd,
            cwd_path: Vec::new(),
            storage,
            prompt,
        }
    }

    /// Current directory as a path
    #[must_use]
    pub fn cwd_path(&self) -> String {
        format!("/{}", self.cwd_path.join("/"))
    }

    /// Give the session back, e.g. to close it explicitly
    #[must_use]
    pub fn into_session(self) -> Session {
        self.session
    }

    /// Read and execute commands until `quit` or end of input.
    ///
    /// Command errors are reported and the shell carries on; a fatal error
    /// (device gone) ends the loop with that error.
    ///
    /// # Errors
    /// Returns a fatal session error, or an I/O error on the terminal
    pub fn run(&mut self, input: &mut dyn BufRead) -> anyhow::Result<()> {
        let mut line = String::new();
        loop {
            print!("{}", style(&self.prompt).bold());
            io::stdout().flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                println!();
                return Ok(());
            }

            match self.execute_line(&line) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return Ok(()),
                Err(err) => {
                    eprintln!("{} {err:#}", style("error:").red().bold());
                    if is_fatal(&err) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Tokenize and execute one line
    ///
    /// # Errors
    /// Returns the command's error
    pub fn execute_line(&mut self, line: &str) -> anyhow::Result<Flow> {
        let tokens = tokenize(line)?;
        let Some((name, args)) = tokens.split_first() else {
            return Ok(Flow::Continue);
        };
        let kind = CommandKind::lookup(name)
            .with_context(|| format!("unknown command '{name}', try 'help'"))?;
        self.execute(kind, args)
    }

    /// Execute one command with its arguments
    ///
    /// # Errors
    /// Returns a usage error or the command's error
    pub fn execute(&mut self, kind: CommandKind, args: &[String]) -> anyhow::Result<Flow> {
        let spec = kind.spec();
        if !spec.shape.accepts(args.len()) {
            bail!("usage: {} {}", spec.name, spec.usage);
        }
        tracing::debug!(command = spec.name, ?args, "Executing");

        let arg = |i: usize| args.get(i).map(String::as_str);
        match kind {
            CommandKind::Help => self.help(arg(0))?,
            CommandKind::Quit => return Ok(Flow::Quit),
            CommandKind::Ls => self.ls(arg(0).unwrap_or("."))?,
            CommandKind::Cd => self.cd(arg(0).unwrap_or("/"))?,
            CommandKind::Pwd => println!("{}", self.cwd_path()),
            CommandKind::Get => self.get(&args[0], arg(1))?,
            CommandKind::Put => self.put(Path::new(&args[0]), arg(1).unwrap_or("."))?,
            CommandKind::Rm => self.rm(&args[0])?,
            CommandKind::Mkdir => self.mkdir(&args[0])?,
            CommandKind::Info => self.info()?,
            CommandKind::Storages => self.storages()?,
            CommandKind::Props => self.props(&args[0])?,
            CommandKind::DeviceProps => self.device_props()?,
            CommandKind::Upload => self.upload(Path::new(&args[0]), arg(1).unwrap_or("."))?,
            CommandKind::Download => {
                self.download(&args[0], Path::new(arg(1).unwrap_or(".")))?;
            }
        }
        Ok(Flow::Continue)
    }

    fn resolve(&mut self, path: &str) -> mtp_core::Result<ObjectHandle> {
        self.resolver.resolve(&mut self.session, self.cwd, path)
    }

    fn is_root(&self, handle: ObjectHandle) -> bool {
        handle == self.resolver.root()
    }

    /// Storage holding `dir`; the default storage for the root
    fn storage_for(&mut self, dir: ObjectHandle) -> mtp_core::Result<StorageId> {
        if self.is_root(dir) {
            return Ok(self.storage);
        }
        Ok(self.session.get_object_info(dir)?.storage_id)
    }

    fn require_directory(&mut self, handle: ObjectHandle, path: &str) -> anyhow::Result<()> {
        if self.is_root(handle) || self.session.get_object_info(handle)?.is_directory() {
            Ok(())
        } else {
            bail!("{path}: not a directory")
        }
    }

    fn help(&self, command: Option<&str>) -> anyhow::Result<()> {
        let specs: Vec<&CommandSpec> = match command {
            Some(name) => {
                let kind = CommandKind::lookup(name)
                    .with_context(|| format!("unknown command '{name}'"))?;
                vec![kind.spec()]
            }
            None => COMMANDS.iter().collect(),
        };
        for spec in specs {
            let synopsis = format!("{} {}", spec.name, spec.usage);
            println!("  {:<28} {}", style(synopsis.trim_end()).cyan(), spec.help);
        }
        Ok(())
    }

    fn ls(&mut self, path: &str) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        if !self.is_root(handle) {
            let info = self.session.get_object_info(handle)?;
            if !info.is_directory() {
                print_entry(handle, &info);
                return Ok(());
            }
        }

        let children = self
            .session
            .get_object_handles(StorageId::ALL, ObjectFormat::ANY, handle)?;
        for child in children {
            let info = self.session.get_object_info(child)?;
            print_entry(child, &info);
        }
        Ok(())
    }

    fn cd(&mut self, path: &str) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        self.require_directory(handle, path)?;
        self.cwd = handle;
        apply_path(&mut self.cwd_path, path);
        Ok(())
    }

    fn get(&mut self, path: &str, local: Option<&str>) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        let info = self.session.get_object_info(handle)?;
        if info.is_directory() {
            bail!("{path}: is a directory, use 'download'");
        }

        let dest = local_destination(local.map(Path::new), &info.filename);
        let mut writer = BufWriter::new(
            File::create(&dest).with_context(|| format!("creating {}", dest.display()))?,
        );
        let progress = TransferProgress::new(u64::from(info.compressed_size), &info.filename);
        let started = Instant::now();
        let mut report = |n: u64| progress.update(n);

        match self.session.get_object(handle, &mut writer, Some(&mut report)) {
            Ok(written) => {
                writer.flush()?;
                progress.finish_with_message(format!(
                    "{} -> {} ({}, {})",
                    info.filename,
                    dest.display(),
                    format_bytes(written),
                    format_rate(written, started.elapsed())
                ));
                Ok(())
            }
            Err(err) => {
                progress.abandon();
                drop(writer);
                let _ = fs::remove_file(&dest);
                Err(err.into())
            }
        }
    }

    fn put(&mut self, local: &Path, dir: &str) -> anyhow::Result<()> {
        let parent = self.resolve(dir)?;
        self.require_directory(parent, dir)?;
        let storage = self.storage_for(parent)?;

        let file = File::open(local).with_context(|| format!("opening {}", local.display()))?;
        let size = file.metadata()?.len();
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", local.display()))?;

        let progress = TransferProgress::new(size, &name);
        let started = Instant::now();
        let mut report = |n: u64| progress.update(n);
        let mut reader = BufReader::new(file);

        match self
            .session
            .upload(storage, parent, &name, &mut reader, size, Some(&mut report))
        {
            Ok(created) => {
                progress.finish_with_message(format!(
                    "{} -> {} ({}, {})",
                    local.display(),
                    created.handle,
                    format_bytes(size),
                    format_rate(size, started.elapsed())
                ));
                Ok(())
            }
            Err(err) => {
                progress.abandon();
                Err(err.into())
            }
        }
    }

    fn rm(&mut self, path: &str) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        if self.is_root(handle) {
            bail!("refusing to delete the root");
        }
        if handle == self.cwd {
            bail!("{path}: is the current directory");
        }
        self.session.delete_object(handle)?;
        println!("Deleted {path}");
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> anyhow::Result<()> {
        let (dir, name) = split_parent(path);
        if name.is_empty() || name == "." || name == ".." {
            bail!("{path}: invalid directory name");
        }
        let parent = self.resolve(dir)?;
        self.require_directory(parent, dir)?;
        let storage = self.storage_for(parent)?;
        let created = self.session.create_directory(storage, parent, name)?;
        println!("Created {path} ({})", created.handle);
        Ok(())
    }

    fn info(&mut self) -> anyhow::Result<()> {
        let info = self.session.get_device_info()?;
        println!("{}", style("Device").bold());
        println!("  Manufacturer:  {}", info.manufacturer);
        println!("  Model:         {}", info.model);
        println!("  Version:       {}", info.device_version);
        println!("  Serial:        {}", info.serial_number);
        println!(
            "  Standard:      {}.{:02}",
            info.standard_version / 100,
            info.standard_version % 100
        );
        if !info.vendor_extension_desc.is_empty() {
            println!("  Extensions:    {}", info.vendor_extension_desc);
        }
        println!("{}", style("Operations").bold());
        for code in &info.operations_supported {
            println!("  {}", OperationCode(*code));
        }
        let missing: Vec<String> = [
            OperationCode::GET_OBJECT_PROP_VALUE,
            OperationCode::SEND_OBJECT_INFO,
        ]
        .into_iter()
        .filter(|op| !info.supports(*op))
        .map(|op| op.to_string())
        .collect();
        if !missing.is_empty() {
            println!(
                "{} device lacks {}",
                style("warning:").yellow(),
                missing.join(", ")
            );
        }
        Ok(())
    }

    fn storages(&mut self) -> anyhow::Result<()> {
        for id in self.session.get_storage_ids()? {
            let info = self.session.get_storage_info(id)?;
            let marker = if id == self.storage { "*" } else { " " };
            println!(
                "{marker} {id}  {:<24} {:>12} free of {:>12}  {}",
                info.description,
                format_bytes(info.free_space),
                format_bytes(info.max_capacity),
                if info.is_writable() { "rw" } else { "ro" }
            );
            if !info.volume_label.is_empty() {
                println!("    label: {}", info.volume_label);
            }
        }
        Ok(())
    }

    fn props(&mut self, path: &str) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        let info = self.session.get_object_info(handle)?;
        let codes = self.session.get_object_props_supported(info.format)?;
        println!("{} {} ({})", style("Object").bold(), info.filename, info.format);

        for code in codes {
            let raw = match self.session.get_object_property(handle, code) {
                Ok(raw) => raw,
                Err(err) => {
                    report_property_error(&code.to_string(), &err)?;
                    continue;
                }
            };
            let decoded = self
                .session
                .get_object_property_desc(code, info.format)
                .map(|desc| (desc.datatype, property::decode(desc.datatype, &raw)));
            match decoded {
                Ok((datatype, Ok(value))) => {
                    println!("  {code} [{datatype}] = {value}");
                }
                Ok((datatype, Err(err))) => println!("  {code} [{datatype}] undecodable: {err}"),
                Err(err) => {
                    report_property_error(&code.to_string(), &err)?;
                }
            }
            print!("{}", hex_dump(&raw));
        }
        Ok(())
    }

    fn device_props(&mut self) -> anyhow::Result<()> {
        let info = self.session.get_device_info()?;
        for code in info.device_properties_supported.iter().copied().map(DevicePropertyCode) {
            let desc = match self.session.get_device_property_desc(code) {
                Ok(desc) => desc,
                Err(err) => {
                    report_property_error(&code.to_string(), &err)?;
                    continue;
                }
            };
            let access = if desc.writable { "rw" } else { "ro" };
            println!("  {code} [{} {access}] = {}", desc.datatype, desc.current);
            match self.session.get_device_property(code) {
                Ok(raw) => print!("{}", hex_dump(&raw)),
                Err(err) => report_property_error(&code.to_string(), &err)?,
            }
        }
        Ok(())
    }

    fn upload(&mut self, local: &Path, dir: &str) -> anyhow::Result<()> {
        let parent = self.resolve(dir)?;
        self.require_directory(parent, dir)?;
        let storage = self.storage_for(parent)?;
        let plan = queue::plan_upload(local)?;
        let summary = run_queue(&mut self.session, storage, parent, plan)?;
        print_summary(&summary);
        Ok(())
    }

    fn download(&mut self, path: &str, dest: &Path) -> anyhow::Result<()> {
        let handle = self.resolve(path)?;
        fs::create_dir_all(dest)?;
        let plan = queue::plan_download(&mut self.session, handle, dest)?;
        let storage = self.storage;
        let root = self.resolver.root();
        let summary = run_queue(&mut self.session, storage, root, plan)?;
        print_summary(&summary);
        Ok(())
    }
}

/// Feed `plan` to a work queue and render its events until it finishes
fn run_queue(
    session: &mut Session,
    storage: StorageId,
    base: ObjectHandle,
    plan: Vec<QueueCommand>,
) -> anyhow::Result<QueueSummary> {
    let total: u64 = plan
        .iter()
        .map(|command| match command {
            QueueCommand::UploadFile { size, .. } | QueueCommand::DownloadFile { size, .. } => {
                *size
            }
            QueueCommand::MakeDirectory { .. } | QueueCommand::Finish => 0,
        })
        .sum();
    let progress = TransferProgress::new(total, "starting");
    let started = Instant::now();

    let summary = std::thread::scope(|scope| {
        let queue = WorkQueue::start(scope, session, storage, base);
        for command in plan {
            if !queue.push(command) {
                break;
            }
        }
        queue.push(QueueCommand::Finish);

        for event in queue.events().iter() {
            match event {
                QueueEvent::Started { label, .. } => progress.set_message(label),
                QueueEvent::Progress { total, .. } => progress.update(total),
                QueueEvent::Failed {
                    label,
                    error,
                    fatal,
                    ..
                } => {
                    progress.suspend(|| {
                        eprintln!("{} {label}: {error}", style("failed:").red());
                    });
                    if fatal {
                        if let Err(err) = queue.abort() {
                            tracing::debug!("Abort after fatal error failed: {err}");
                        }
                    }
                }
                QueueEvent::Finished(_) => break,
            }
        }
        queue.finish()
    })?;

    progress.finish_with_message(format!(
        "{} in {} ({})",
        format_bytes(summary.bytes),
        format_duration(started.elapsed()),
        format_rate(summary.bytes, started.elapsed())
    ));
    Ok(summary)
}

fn print_summary(summary: &QueueSummary) {
    println!(
        "{} completed, {} failed, {} skipped",
        summary.completed, summary.failed, summary.skipped
    );
    if summary.aborted {
        println!("{}", style("Transfer aborted").yellow());
    }
}

fn print_entry(handle: ObjectHandle, info: &mtp_core::ObjectInfo) {
    if info.is_directory() {
        println!(
            "{handle}  {:>12}  {}/",
            "-",
            style(&info.filename).blue().bold()
        );
    } else {
        println!(
            "{handle}  {:>12}  {}",
            format_bytes(u64::from(info.compressed_size)),
            info.filename
        );
    }
}

/// Print a per-property failure and carry on, unless the device is gone
fn report_property_error(label: &str, err: &Error) -> anyhow::Result<()> {
    if err.is_fatal() {
        bail!("{label}: {err}");
    }
    println!("  {label} {}", style(format!("error: {err}")).red());
    Ok(())
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Error>().is_some_and(Error::is_fatal)
}

/// Local destination for a download: a directory gets the remote name appended
fn local_destination(local: Option<&Path>, filename: &str) -> PathBuf {
    match local {
        Some(path) if path.is_dir() => path.join(filename),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(filename),
    }
}

/// Apply a resolved path to the textual current directory
fn apply_path(cwd: &mut Vec<String>, path: &str) {
    if path.starts_with('/') {
        cwd.clear();
    }
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                cwd.pop();
            }
            name => cwd.push(name.to_string()),
        }
    }
}

/// Hex dump, 16 bytes per line, indented under a property line
fn hex_dump(bytes: &[u8]) -> String {
    const MAX_LINES: usize = 8;
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).take(MAX_LINES).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| hex::encode([*b])).collect();
        out.push_str(&format!("      {:04x}  {}\n", i * 16, hex.join(" ")));
    }
    let shown = MAX_LINES * 16;
    if bytes.len() > shown {
        out.push_str(&format!("      ... {} more bytes\n", bytes.len() - shown));
    }
    out
}
