use datacmp_common::AccessError;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Run a program to completion and return its stdout.
///
/// The child is killed when the returned future is dropped, so a timeout or a
/// cancelled run never leaves it behind.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
    input: Option<Vec<u8>>,
) -> Result<Vec<u8>, AccessError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    debug!("Spawning {} {:?}", program, args);
    let mut child = command
        .spawn()
        .map_err(|e| AccessError::with_cause(format!("failed to start '{}'", program), e))?;

    // Feed stdin from a separate task so a chatty child cannot block on a full
    // stdout pipe while we are still writing
    let writer = match (input, child.stdin.take()) {
        (Some(bytes), Some(mut stdin)) => Some(tokio::spawn(async move {
            let result = stdin.write_all(&bytes).await;
            drop(stdin);
            result
        })),
        _ => None,
    };

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| AccessError::with_cause(format!("failed to wait for '{}'", program), e))?;

    if let Some(writer) = writer {
        match writer.await {
            Ok(Ok(())) => {}
            // The child may legitimately exit without reading all of its input
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(e)) => {
                return Err(AccessError::with_cause(
                    format!("failed to write input to '{}'", program),
                    e,
                ))
            }
            Err(e) => {
                return Err(AccessError::with_cause(
                    format!("input writer for '{}' failed", program),
                    e,
                ))
            }
        }
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AccessError::new(format!(
            "'{}' exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Whether `program` resolves to an existing file, either as a path or by
/// searching `PATH`
pub(crate) fn program_exists(program: &str, working_dir: Option<&Path>) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let resolved = match working_dir {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return resolved.is_file();
    }

    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false)
}
