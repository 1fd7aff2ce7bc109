//! One-shot command implementations and the daemon entry
//!
//! History commands work straight off the on-disk logs and need no
//! running daemon; `out`, `binary` and `store` open their own display
//! connection and talk to whichever client owns the selection.

use std::io::{Read, Write};

use tracing::info;

use clipd_core::config::Config;
use clipd_core::history::{HistoryStore, Visit};
use clipd_daemon::daemon::{CLI_FETCH_TIMEOUT, DAEMON_FETCH_TIMEOUT};
use clipd_daemon::transport::x11::X11Transport;
use clipd_daemon::Engine;
use clipd_utils::{ClipdError, InstanceLock, Result};

/// Longest dmenu line before truncation
const DMENU_LINE_LIMIT: usize = 230;

fn open_store(config: &Config) -> Result<HistoryStore> {
    HistoryStore::open_default(config.history.compression)
}

fn connect(config: &Config, timeout: std::time::Duration) -> Result<Engine<X11Transport>> {
    let transport = X11Transport::connect()?;
    Engine::new(transport, config, open_store(config)?, timeout)
}

fn selection_index(engine: &Engine<X11Transport>, name: &str) -> Result<usize> {
    engine
        .registry()
        .index_of(name)
        .ok_or_else(|| ClipdError::UnknownSelection(name.to_string()))
}

/// Run the persistent daemon under the instance lock
pub fn daemon(config: &Config) -> Result<()> {
    let _lock = InstanceLock::acquire()?;
    let engine = connect(config, DAEMON_FETCH_TIMEOUT)?;
    clipd_daemon::daemon::run(engine)
}

/// Print the live content of each selected selection
pub fn out(config: &Config, selections: &[String]) -> Result<()> {
    let mut engine = connect(config, CLI_FETCH_TIMEOUT)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for name in selections {
        let index = selection_index(&engine, name)?;
        if let Some(data) = engine.fetch_live(index)? {
            out.write_all(&data)?;
            if !data.ends_with(b"\n") {
                out.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

/// How a history record is addressed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKey {
    Index(usize),
    Hash(u32),
}

fn parse_record_key(what: &str) -> Result<RecordKey> {
    if let Some(hex) = what.strip_prefix("0x") {
        let hash = u32::from_str_radix(hex, 16)
            .map_err(|_| ClipdError::config(format!("bad record hash: {what}")))?;
        return Ok(RecordKey::Hash(hash));
    }
    what.parse::<usize>()
        .map(RecordKey::Index)
        .map_err(|_| ClipdError::config(format!("expected record index or 0x hash, got {what}")))
}

/// Print one record, searching the selected selections in order
pub fn get(config: &Config, selections: &[String], what: &str) -> Result<()> {
    let key = parse_record_key(what)?;
    let store = open_store(config)?;
    for name in selections {
        let found = match key {
            RecordKey::Index(i) => store.get(name, i)?.map(|(_, data)| data),
            RecordKey::Hash(h) => store.find(name, h)?,
        };
        if let Some(data) = found {
            std::io::stdout().write_all(&data)?;
            return Ok(());
        }
    }
    Err(ClipdError::history(format!("no record matching {what}")))
}

/// Print every record of each selected selection
pub fn list(config: &Config, selections: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for name in selections {
        let mut result = Ok(());
        store.stream(name, |rec| {
            let write = out
                .write_all(rec.chunk)
                .and_then(|_| {
                    if rec.offset + rec.chunk.len() >= rec.total {
                        out.write_all(b"\n")
                    } else {
                        Ok(())
                    }
                });
            match write {
                Ok(()) => Visit::Continue,
                Err(e) => {
                    result = Err(ClipdError::Io(e));
                    Visit::Stop
                }
            }
        })?;
        result?;
    }
    Ok(())
}

fn dmenu_line(index: usize, bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut line = format!("{index:4}: ");
    if collapsed.chars().count() > DMENU_LINE_LIMIT {
        line.extend(collapsed.chars().take(DMENU_LINE_LIMIT));
        line.push_str("...");
    } else {
        line.push_str(&collapsed);
    }
    line
}

/// Print history in a dmenu-friendly one-line-per-record form
pub fn dmenu(config: &Config, selections: &[String]) -> Result<()> {
    let store = open_store(config)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for name in selections {
        let mut records: Vec<Vec<u8>> = Vec::new();
        store.stream(name, |rec| {
            if rec.offset == 0 {
                records.push(Vec::with_capacity(rec.total));
            }
            records.last_mut().unwrap().extend_from_slice(rec.chunk);
            Visit::Continue
        })?;
        for (index, record) in records.iter().enumerate() {
            writeln!(out, "{}", dmenu_line(index, record))?;
        }
    }
    Ok(())
}

/// Delete the history of each selected selection
pub fn clear(config: &Config, selections: &[String]) -> Result<()> {
    let store = open_store(config)?;
    for name in selections {
        store.clear(name)?;
        info!(selection = %name, "history cleared");
    }
    Ok(())
}

/// Liveness probe against the daemon lock
pub fn query() -> Result<()> {
    if InstanceLock::daemon_running()? {
        println!("clipd daemon is running");
        Ok(())
    } else {
        Err(ClipdError::NotRunning)
    }
}

/// Print the raw bytes of one conversion target of a selection
pub fn binary(config: &Config, selection: &str, target: &str) -> Result<()> {
    let mut engine = connect(config, CLI_FETCH_TIMEOUT)?;
    let index = selection_index(&engine, selection)?;
    match engine.fetch_target(index, target)? {
        Some(data) => {
            std::io::stdout().write_all(&data)?;
            Ok(())
        }
        None => Err(ClipdError::UnknownTarget(target.to_string())),
    }
}

/// Own a selection with the given payload and serve it in the
/// background until another client takes the selection over
pub fn store(config: &Config, selection: &str, data: &[String]) -> Result<()> {
    let payload = if data.is_empty() {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        data.join(" ").into_bytes()
    };
    if payload.is_empty() {
        return Err(ClipdError::config("nothing to store"));
    }

    // Detach before connecting; the display connection must belong to
    // the surviving process
    // SAFETY: single-threaded at this point
    if unsafe { libc::daemon(0, 0) } != 0 {
        return Err(ClipdError::Io(std::io::Error::last_os_error()));
    }

    let mut engine = connect(config, CLI_FETCH_TIMEOUT)?;
    let index = selection_index(&engine, selection)?;
    engine.serve_until_clear(index, payload)
}
