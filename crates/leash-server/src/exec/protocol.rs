//! Marker protocol
//!
//! Every invocation is a fresh shell, so the working directory is carried
//! across calls by hand: the script changes into the session directory,
//! runs the command, prints a per-call marker and then `pwd`. The combined
//! output is split on that marker into the command output and the new
//! directory.
//!
//! Occurrences of the marker directly next to a double quote are skipped;
//! those come from the shell echoing its own script (`set` prints
//! `BASH_EXECUTION_STRING`). A command that prints the bare marker text
//! corrupts the split. With a random 128-bit marker that only happens on
//! purpose.

use leash_core::LeashError;

/// Build the script for one invocation
///
/// The profile is sourced only when it is readable so a missing file does
/// not abort POSIX shells.
pub fn compose_script(
    profile: Option<&str>,
    cwd: &str,
    command: &str,
    marker: &str,
) -> Result<String, LeashError> {
    let mut script = String::new();

    if let Some(profile) = profile {
        let profile = quote(profile)?;
        script.push_str(&format!("test -r {0} && . {0}\n", profile));
    }
    script.push_str(&format!("cd {}\n", quote(cwd)?));
    script.push_str(command);
    // Newline rather than `;` so a trailing comment or `&` in the command
    // cannot swallow the marker
    script.push_str(&format!("\necho -n \"{}\";pwd", marker));
    Ok(script)
}

fn quote(value: &str) -> Result<String, LeashError> {
    shlex::try_quote(value)
        .map(|q| q.into_owned())
        .map_err(|e| LeashError::InvalidRequest(format!("cannot quote '{}': {}", value, e)))
}

/// Split combined output into `(output, cwd)`
///
/// Returns `None` when no unquoted marker is present.
pub fn split_output(raw: &str, marker: &str) -> Option<(String, String)> {
    let positions = unquoted_positions(raw, marker);
    let first = *positions.first()?;

    let output = &raw[..first];
    let rest_start = first + marker.len();
    let rest_end = positions.get(1).copied().unwrap_or(raw.len());
    let rest = &raw[rest_start..rest_end];
    let cwd = rest.strip_suffix('\n').unwrap_or(rest);

    Some((output.to_string(), cwd.to_string()))
}

fn unquoted_positions(raw: &str, marker: &str) -> Vec<usize> {
    if marker.is_empty() {
        return Vec::new();
    }
    let bytes = raw.as_bytes();
    raw.match_indices(marker)
        .map(|(i, _)| i)
        .filter(|&i| {
            let before = i.checked_sub(1).map(|p| bytes[p]);
            let after = bytes.get(i + marker.len()).copied();
            before != Some(b'"') && after != Some(b'"')
        })
        .collect()
}
