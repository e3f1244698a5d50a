//! Worker side of the process protocol.

use std::io::{BufRead, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{BatchError, BatchResult, EvalError};
use crate::evaluate::{Evaluator, evaluate_guarded};
use crate::protocol::{RowTask, WorkerReply, WorkerSetup, read_message, write_message};

/// Serve rows until `input` closes. Returns the number of rows evaluated.
///
/// `build` opens an evaluator from the setup message; it is called again
/// after an evaluator panics so later rows start from a clean instance.
pub fn serve<R, W, E, F>(mut input: R, mut output: W, workdir: &Path, mut build: F) -> BatchResult<usize>
where
    R: BufRead,
    W: Write,
    E: Evaluator,
    F: FnMut(&WorkerSetup, &Path) -> Result<E, EvalError>,
{
    let setup: WorkerSetup = match read_message(&mut input) {
        Ok(Some(setup)) => setup,
        Ok(None) => return Ok(0),
        Err(err) => {
            write_message(
                &mut output,
                &WorkerReply::SetupFailed {
                    message: err.to_string(),
                },
            )?;
            return Err(err);
        }
    };

    let mut evaluator = match build(&setup, workdir) {
        Ok(evaluator) => evaluator,
        Err(err) => {
            let message = err.to_string();
            write_message(
                &mut output,
                &WorkerReply::SetupFailed {
                    message: message.clone(),
                },
            )?;
            return Err(BatchError::Protocol(format!("setup failed: {message}")));
        }
    };
    write_message(&mut output, &WorkerReply::Ready)?;

    let mut served = 0;
    while let Some(task) = read_message::<_, RowTask>(&mut input)? {
        let (outcome, panicked) = evaluate_guarded(&mut evaluator, &task.values);
        write_message(
            &mut output,
            &WorkerReply::Done {
                index: task.index,
                outcome,
            },
        )?;
        served += 1;
        if panicked {
            debug!(row = task.index, "rebuilding evaluator after panic");
            evaluator = build(&setup, workdir)
                .map_err(|e| BatchError::Protocol(format!("rebuild failed: {e}")))?;
        }
    }
    Ok(served)
}
