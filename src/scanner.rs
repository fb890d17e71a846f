use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, trace};

/// Echoed after every block; everything before it belongs to that block.
pub const MSG_HAPPY: &str = "# All is well";
/// Marks a failure reported by the shell itself.
pub const MSG_ERROR: &str = "# Error";
/// Synthesized when a stream stays silent for too long.
pub const MSG_TIMEOUT: &str = "# Timeout";

/// Streams lines read from `reader` onto the returned channel until the
/// stream closes.
///
/// The stream is read to its end even after the receiver is dropped, with
/// the lines discarded, so its writer never sees a broken pipe.
pub fn read_lines<R>(name: &'static str, reader: R) -> Result<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<String>();

    thread::Builder::new()
        .name(format!("mdrip-{name}-reader"))
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            let mut listening = true;
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) if !listening => {}
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(line).is_err() {
                            trace!("read_lines {name}: nobody listening, draining");
                            listening = false;
                        }
                    }
                    Err(err) => {
                        debug!("read_lines {name}: read failed: {err}");
                        break;
                    }
                }
            }
            trace!("read_lines {name}: stream closed");
        })
        .with_context(|| format!("Fail to spawn {name} reader"))?;

    Ok(rx)
}

/// Like [`read_lines`], but gives up on a stream that stays silent.
///
/// If no line shows up within `timeout`, a single line starting with
/// [`MSG_TIMEOUT`] is sent and the channel closes. The stream itself keeps
/// being drained until its writer goes away.
pub fn scan_lines<R>(timeout: Duration, name: &'static str, reader: R) -> Result<Receiver<String>>
where
    R: Read + Send + 'static,
{
    let raw_rx = read_lines(name, reader)?;
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("mdrip-{name}-watchdog"))
        .spawn(move || loop {
            match raw_rx.recv_timeout(timeout) {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    debug!("scan_lines {name}: no output for {timeout:?}");
                    let _ = tx.send(format!(
                        "{MSG_TIMEOUT}: no line on {name} within {timeout:?}."
                    ));
                    return;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
        .with_context(|| format!("Fail to spawn {name} watchdog"))?;

    Ok(rx)
}
