//! Messages exchanged with worker processes, one JSON object per line.
//!
//! Parent to worker: a single [`WorkerSetup`], then any number of
//! [`RowTask`]s. Closing the worker's stdin asks it to exit.
//! Worker to parent: [`WorkerReply`]s.

use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::error::{BatchError, BatchResult};
use crate::evaluate::EvaluationConfig;
use crate::outcome::RowOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSetup {
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowTask {
    pub index: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    Ready,
    Done { index: usize, outcome: RowOutcome },
    SetupFailed { message: String },
}

pub fn write_message<W: Write, T: Serialize>(out: &mut W, message: &T) -> BatchResult<()> {
    let line = serde_json::to_string(message)
        .map_err(|e| BatchError::Protocol(format!("encode: {e}")))?;
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

/// Next non-blank line decoded as `T`; `None` at end of input.
pub fn read_message<R: BufRead, T: for<'de> Deserialize<'de>>(
    input: &mut R,
) -> BatchResult<Option<T>> {
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            break;
        }
    }
    serde_json::from_str(line.trim())
        .map(Some)
        .map_err(|e| BatchError::Protocol(format!("decode: {e}")))
}
