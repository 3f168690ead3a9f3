// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::error::{MountError, MountResult};
use crate::protocol::SLEW_TO_TARGET;
use crate::transport::Transport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    // Fire and forget.
    Blind,
    // Single '0'/'1' byte.
    Bool,
    // '#' terminated text.
    Text,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    None,
    Bool(bool),
    Text(String),
}

/// Serializes every exchange with the mount. The lock is held for a full
/// request/response cycle so that commands issued by different operations
/// never interleave on the wire. The lock is coarse: a slow reply stalls all
/// other device traffic, which the protocol's lack of multiplexing forces.
pub struct CommandDispatcher {
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher {
    pub fn new() -> Self {
        CommandDispatcher { transport: Mutex::new(None) }
    }

    pub fn attach(&self, transport: Box<dyn Transport>) {
        *self.lock() = Some(transport);
        info!("Transport attached");
    }

    /// Returns false if nothing was attached.
    pub fn detach(&self) -> bool {
        let was_attached = self.lock().take().is_some();
        if was_attached {
            info!("Transport detached");
        }
        was_attached
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    pub fn ensure_connected(&self, operation: &str) -> MountResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MountError::NotConnected(operation.to_string()))
        }
    }

    /// Sends `command` and reads the reply `kind` calls for. Unless `raw`,
    /// the command is framed as `:<command>#`.
    pub fn send(&self, command: &str, raw: bool, kind: ReplyKind)
                -> MountResult<Reply> {
        let framed = if raw {
            command.to_string()
        } else {
            format!(":{}#", command)
        };
        let mut locked = self.lock();
        let transport = match locked.as_mut() {
            Some(t) => t,
            None => {
                return Err(MountError::NotConnected(framed));
            }
        };
        transport.clear_buffers()?;
        transport.transmit(framed.as_bytes())?;
        let reply = match kind {
            ReplyKind::Blind => Reply::None,
            ReplyKind::Bool => {
                let byte = transport.receive_counted(1)?;
                let value = match byte.first() {
                    Some(b'1') => true,
                    Some(b'0') => false,
                    other => {
                        return Err(MountError::Protocol(format!(
                            "{} expected '0' or '1', got {:?}", framed, other)));
                    }
                };
                if value && framed == SLEW_TO_TARGET {
                    // A refused GoTo is followed by a text message that
                    // would otherwise corrupt the next read.
                    let trailing = transport.receive_terminated(b'#')?;
                    debug!("{} drained trailing reply {:?}", framed, trailing);
                }
                Reply::Bool(value)
            }
            ReplyKind::Text => Reply::Text(transport.receive_terminated(b'#')?),
        };
        debug!("{} -> {:?}", framed, reply);
        Ok(reply)
    }

    pub fn send_blind(&self, command: &str) -> MountResult<()> {
        self.send(command, true, ReplyKind::Blind)?;
        Ok(())
    }

    pub fn send_bool(&self, command: &str) -> MountResult<bool> {
        match self.send(command, true, ReplyKind::Bool)? {
            Reply::Bool(b) => Ok(b),
            other => Err(MountError::Protocol(format!(
                "{} returned {:?}", command, other))),
        }
    }

    pub fn send_string(&self, command: &str) -> MountResult<String> {
        match self.send(command, true, ReplyKind::Text)? {
            Reply::Text(s) => Ok(s),
            other => Err(MountError::Protocol(format!(
                "{} returned {:?}", command, other))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
