//! Applies `siteEnv` directives (launcher step 4.5) to the environment
//! that will be handed to `execve`. Directives are admin policy, applied
//! in config-file order after the caller's real environment is captured
//! and before it is restored for the exec — the one point in the
//! launcher where both the final command line and a writable env vector
//! exist at once.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use shifter_config::SiteEnvDirective;

use crate::error::{Result, ShifterError};

const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Applies `directives` in order to `env`, returning the resulting
/// vector. `set`/`prepend`/`append`/`unset` are pure vector edits;
/// `source` shells out to capture whatever a site script exports.
pub fn apply(directives: &[SiteEnvDirective], mut env: Vec<(String, String)>) -> Result<Vec<(String, String)>> {
    for directive in directives {
        match directive {
            SiteEnvDirective::Set(key, value) => set(&mut env, key, value.clone()),
            SiteEnvDirective::Prepend(key, value) => {
                let joined = match take(&mut env, key) {
                    Some(existing) if !existing.is_empty() => format!("{value}:{existing}"),
                    _ => value.clone(),
                };
                set(&mut env, key, joined);
            }
            SiteEnvDirective::Append(key, value) => {
                let joined = match take(&mut env, key) {
                    Some(existing) if !existing.is_empty() => format!("{existing}:{value}"),
                    _ => value.clone(),
                };
                set(&mut env, key, joined);
            }
            SiteEnvDirective::Unset(key) => {
                env.retain(|(k, _)| k != key);
            }
            SiteEnvDirective::Source(path) => {
                env = source(path, env)?;
            }
        }
    }
    Ok(env)
}

fn take(env: &mut Vec<(String, String)>, key: &str) -> Option<String> {
    env.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn set(env: &mut Vec<(String, String)>, key: &str, value: String) {
    match env.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value,
        None => env.push((key.to_string(), value)),
    }
}

/// Runs `bash -c 'source "$1" >/dev/null 2>&1 && env -0'` with `env` as
/// the starting environment, and takes whatever comes back as the new
/// environment wholesale — a sourced script can export, overwrite, or
/// unset variables, and all three are meant to take effect.
fn source(path: &Path, env: Vec<(String, String)>) -> Result<Vec<(String, String)>> {
    let mut command = Command::new("/bin/bash");
    command
        .arg("-c")
        .arg(r#"source "$1" >/dev/null 2>&1 && env -0"#)
        .arg("--")
        .arg(path)
        .env_clear()
        .envs(env.iter().cloned())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|source| ShifterError::Io { path: path.to_path_buf(), source })?;

    let (sender, receiver) = crossbeam_channel::unbounded();
    std::thread::spawn(move || {
        let res = child.wait_with_output();
        let _ = sender.send(res);
    });

    let output = match receiver.recv_timeout(SOURCE_TIMEOUT) {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return Err(ShifterError::SiteEnvSourceFailed(path.to_path_buf())),
        Ok(Err(source)) => return Err(ShifterError::Io { path: path.to_path_buf(), source }),
        Err(_) => return Err(ShifterError::SiteEnvSourceTimeout(path.to_path_buf())),
    };

    Ok(parse_nul_separated_env(&output.stdout))
}

fn parse_nul_separated_env(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|&b| b == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let text = String::from_utf8_lossy(entry);
            text.split_once('=').map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}
