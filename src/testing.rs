// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Scriptable stand-in for a TTS-160 on the other end of the serial line.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::MountResult;
use crate::transport::Transport;

struct SimState {
    commands: Vec<String>,
    pending: VecDeque<u8>,

    // `:GW#` replies, consumed one per read; the last one repeats.
    statuses: VecDeque<String>,
    goto_refused: bool,
    // `:GR#`/`:GD#` replies, one entry per sample; the last one repeats.
    positions: Vec<(String, String)>,
    ra_reads: usize,
    dec_reads: usize,
    altitude: String,
    azimuth: String,
    site_latitude: String,
    site_longitude: String,
    sidereal_time: String,
    // One-shot replies that take precedence over the defaults.
    scripted: HashMap<String, VecDeque<Vec<u8>>>,
}

#[derive(Clone)]
pub struct SimulatedMount {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedMount {
    pub fn new() -> Self {
        SimulatedMount {
            state: Arc::new(Mutex::new(SimState {
                commands: Vec::new(),
                pending: VecDeque::new(),
                statuses: VecDeque::from(["AT1".to_string()]),
                goto_refused: false,
                positions: vec![("00:00:00".to_string(), "+00*00:00".to_string())],
                ra_reads: 0,
                dec_reads: 0,
                altitude: "+45*00:00".to_string(),
                azimuth: "180*00:00".to_string(),
                site_latitude: "+37*00".to_string(),
                site_longitude: "122*00".to_string(),
                sidereal_time: "06:00:00".to_string(),
                scripted: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn count(&self, command: &str) -> usize {
        self.lock().commands.iter().filter(|c| *c == command).count()
    }

    pub fn pending_bytes(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn set_status_sequence(&self, statuses: &[&str]) {
        self.lock().statuses = statuses.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_goto_reply(&self, refused: bool) {
        self.lock().goto_refused = refused;
    }

    pub fn set_position(&self, ra: &str, dec: &str) {
        self.set_position_samples(&[(ra, dec)]);
    }

    pub fn set_position_samples(&self, samples: &[(&str, &str)]) {
        let mut state = self.lock();
        state.positions = samples.iter()
            .map(|(ra, dec)| (ra.to_string(), dec.to_string()))
            .collect();
        state.ra_reads = 0;
        state.dec_reads = 0;
    }

    pub fn set_altitude(&self, altitude: &str) {
        self.lock().altitude = altitude.to_string();
    }

    pub fn set_azimuth(&self, azimuth: &str) {
        self.lock().azimuth = azimuth.to_string();
    }

    pub fn set_site(&self, latitude: &str, longitude: &str) {
        let mut state = self.lock();
        state.site_latitude = latitude.to_string();
        state.site_longitude = longitude.to_string();
    }

    pub fn push_reply(&self, command: &str, reply: &[u8]) {
        self.lock().scripted.entry(command.to_string())
            .or_default().push_back(reply.to_vec());
    }
}

impl SimState {
    fn reply_to(&mut self, command: &str) -> Vec<u8> {
        if let Some(reply) = self.scripted.get_mut(command)
            .and_then(|q| q.pop_front())
        {
            return reply;
        }
        let text = |s: &str| format!("{}#", s).into_bytes();
        match command {
            ":GW#" => {
                let status = if self.statuses.len() > 1 {
                    self.statuses.pop_front()
                } else {
                    self.statuses.front().cloned()
                };
                text(&status.unwrap_or_default())
            }
            ":MS#" => {
                if self.goto_refused {
                    b"1Object below horizon#".to_vec()
                } else {
                    b"0".to_vec()
                }
            }
            ":GR#" => {
                let i = self.ra_reads.min(self.positions.len() - 1);
                self.ra_reads += 1;
                text(&self.positions[i].0)
            }
            ":GD#" => {
                let i = self.dec_reads.min(self.positions.len() - 1);
                self.dec_reads += 1;
                text(&self.positions[i].1)
            }
            ":GA#" => text(&self.altitude),
            ":GZ#" => text(&self.azimuth),
            ":Gt#" => text(&self.site_latitude),
            ":Gg#" => text(&self.site_longitude),
            ":GS#" => text(&self.sidereal_time),
            ":CM#" => text("Coordinates matched"),
            ":T1#" => {
                self.statuses = VecDeque::from(["AT1".to_string()]);
                Vec::new()
            }
            ":T0#" => {
                self.statuses = VecDeque::from(["AN1".to_string()]);
                Vec::new()
            }
            ":hP#" => {
                self.statuses = VecDeque::from(["ANP".to_string()]);
                Vec::new()
            }
            c if c.starts_with(":Sr") || c.starts_with(":Sd") => b"1".to_vec(),
            _ => Vec::new(),
        }
    }
}

fn no_reply() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "no reply from simulated mount")
}

impl Transport for SimulatedMount {
    fn clear_buffers(&mut self) -> MountResult<()> {
        self.lock().pending.clear();
        Ok(())
    }

    fn transmit(&mut self, bytes: &[u8]) -> MountResult<()> {
        let command = String::from_utf8_lossy(bytes).into_owned();
        let mut state = self.lock();
        let reply = state.reply_to(&command);
        state.pending.extend(reply);
        state.commands.push(command);
        Ok(())
    }

    fn receive_counted(&mut self, count: usize) -> MountResult<Vec<u8>> {
        let mut state = self.lock();
        if state.pending.len() < count {
            return Err(no_reply().into());
        }
        Ok(state.pending.drain(..count).collect())
    }

    fn receive_terminated(&mut self, terminator: u8) -> MountResult<String> {
        let mut state = self.lock();
        let Some(end) = state.pending.iter().position(|b| *b == terminator) else {
            return Err(no_reply().into());
        };
        let bytes: Vec<u8> = state.pending.drain(..=end).collect();
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}
