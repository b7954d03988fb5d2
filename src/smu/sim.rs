//! In-process simulated 2636B used for `sim://` addresses and tests
//!
//! The simulator understands just enough TSP to exercise the driver: it
//! records uploads, plays back programmed output for each
//! `script.anonymous.run()`, answers canned queries and stalls (poll timeout)
//! whenever it has nothing to say. Each read hands out at most one line, so a
//! cancellation trigger fires exactly between two lines.

use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::commands::{
    DATA_SENTINEL, END_SCRIPT, END_SENTINEL, ERROR_QUEUE_PRINT, LOAD_SCRIPT, NamedBuffer,
    RUN_ANONYMOUS,
};
use super::transport::Transport;
use crate::types::{CancellationFlag, MeasurementRecord};

#[derive(Default)]
struct SimState {
    sent: Vec<String>,
    partial_write: String,
    loading: bool,
    script_in_progress: Vec<String>,
    loaded_script: Vec<String>,
    programmed_runs: VecDeque<Vec<String>>,
    synthetic: bool,
    run_count: usize,
    outbox: VecDeque<String>,
    pending: Vec<u8>,
    responses: HashMap<String, String>,
    data_lines_delivered: usize,
    cancel_trigger: Option<(usize, CancellationFlag)>,
    failing_writes: usize,
    open_sessions: usize,
}

/// Shared handle to a simulated instrument
#[derive(Clone, Default)]
pub struct SimInstrument {
    state: Arc<Mutex<SimState>>,
}

impl SimInstrument {
    /// Simulator that only emits what it is programmed to
    pub fn new() -> Self {
        let sim = Self::default();
        sim.respond(ERROR_QUEUE_PRINT, "0.00000e+00\tQueue Is Empty");
        sim
    }

    /// Simulator that answers unprogrammed runs with a generated transfer curve
    pub fn synthetic() -> Self {
        let sim = Self::new();
        sim.state.lock().synthetic = true;
        sim
    }

    /// Queue the output lines for the next unprogrammed `script.anonymous.run()`
    pub fn on_run<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.state.lock().programmed_runs.push_back(lines);
    }

    /// Answer `command` with `response` every time it is received
    pub fn respond(&self, command: &str, response: &str) {
        self.state
            .lock()
            .responses
            .insert(command.to_string(), response.to_string());
    }

    /// Fill the four nvbuffers with `records`
    pub fn set_buffers(&self, records: &[MeasurementRecord]) {
        let mut state = self.state.lock();
        set_buffer_responses(&mut state, records);
    }

    /// Raise `flag` right after the `data_lines`-th `@@` line has been handed out
    pub fn cancel_after(&self, data_lines: usize, flag: CancellationFlag) {
        self.state.lock().cancel_trigger = Some((data_lines, flag));
    }

    /// Make the next `count` writes fail as if the port were busy
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    /// Every line received so far, in order
    pub fn sent_lines(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Body of the last completed `loadscript ... endscript` block
    pub fn loaded_script(&self) -> Vec<String> {
        self.state.lock().loaded_script.clone()
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().run_count
    }

    /// Number of transports currently attached
    pub fn open_sessions(&self) -> usize {
        self.state.lock().open_sessions
    }

    pub fn transport(&self, poll_interval: Duration) -> SimTransport {
        self.state.lock().open_sessions += 1;
        SimTransport {
            instrument: self.clone(),
            poll_interval,
        }
    }

    fn receive_line(state: &mut SimState, line: String) {
        debug!("[sim] <- {line}");
        state.sent.push(line.clone());

        if state.loading {
            if line == END_SCRIPT {
                state.loading = false;
                state.loaded_script = std::mem::take(&mut state.script_in_progress);
            } else {
                state.script_in_progress.push(line);
            }
            return;
        }

        if line == LOAD_SCRIPT {
            state.loading = true;
            state.script_in_progress.clear();
        } else if line == RUN_ANONYMOUS {
            state.run_count += 1;
            if let Some(program) = state.programmed_runs.pop_front() {
                state.outbox.extend(program);
            } else if state.synthetic {
                let records = synthetic_transfer(state.run_count % 2 == 0);
                state.outbox.extend(records.iter().map(|r| {
                    format!(
                        "{DATA_SENTINEL}{:e},{:e},{:e},{:e}",
                        r.gate_voltage, r.channel_voltage, r.channel_current, r.gate_leakage
                    )
                }));
                state.outbox.push_back(END_SENTINEL.to_string());
                set_buffer_responses(state, &records);
            }
        } else if let Some(response) = state.responses.get(&line) {
            let response = response.clone();
            state.outbox.push_back(response);
        }
    }
}

fn set_buffer_responses(state: &mut SimState, records: &[MeasurementRecord]) {
    let join = |values: Vec<f64>| {
        values
            .iter()
            .map(|v| format!("{v:e}"))
            .collect::<Vec<_>>()
            .join(", ")
    };

    for buffer in NamedBuffer::ALL {
        let values = records
            .iter()
            .map(|r| match buffer {
                NamedBuffer::GateSource => r.gate_voltage,
                NamedBuffer::GateReading => r.gate_leakage,
                NamedBuffer::DrainSource => r.channel_voltage,
                NamedBuffer::DrainReading => r.channel_current,
            })
            .collect();
        state.responses.insert(buffer.query().to_string(), join(values));
    }
}

/// 21-point p-type transfer curve between -1 V and +1 V gate
fn synthetic_transfer(reverse: bool) -> Vec<MeasurementRecord> {
    let mut points: Vec<f64> = (0..=20).map(|i| -1.0 + 0.1 * f64::from(i)).collect();
    if reverse {
        points.reverse();
    }
    points
        .into_iter()
        .map(|vg| {
            let overdrive = (0.2 - vg).max(0.0);
            let current = -1e-6 * overdrive * overdrive - 1e-10;
            MeasurementRecord::new(vg, -0.5, current, 1e-11 * vg)
        })
        .collect()
}

/// Byte-level view of a [`SimInstrument`]
pub struct SimTransport {
    instrument: SimInstrument,
    poll_interval: Duration,
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        let mut state = self.instrument.state.lock();
        state.open_sessions = state.open_sessions.saturating_sub(1);
    }
}

impl Transport for SimTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.instrument.state.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "simulated port busy"));
        }

        state.partial_write.push_str(&String::from_utf8_lossy(bytes));
        while let Some(end) = state.partial_write.find('\n') {
            let line: String = state.partial_write.drain(..=end).collect();
            let line = line.trim_end_matches(['\r', '\n']).to_string();
            SimInstrument::receive_line(&mut state, line);
        }
        Ok(())
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.instrument.state.lock();
            if state.pending.is_empty() {
                if let Some(line) = state.outbox.pop_front() {
                    if line.trim_start().starts_with(DATA_SENTINEL) {
                        state.data_lines_delivered += 1;
                        if let Some((after, flag)) = &state.cancel_trigger {
                            if state.data_lines_delivered == *after {
                                flag.request();
                            }
                        }
                    }
                    state.pending = format!("{line}\n").into_bytes();
                }
            }

            if !state.pending.is_empty() {
                let count = buf.len().min(state.pending.len());
                buf[..count].copy_from_slice(&state.pending[..count]);
                state.pending.drain(..count);
                return Ok(count);
            }
        }

        thread::sleep(self.poll_interval);
        Err(io::Error::new(io::ErrorKind::TimedOut, "simulator idle"))
    }

    fn describe(&self) -> String {
        "simulated 2636B".to_string()
    }
}
