// ABOUTME: Script transforms applied before submission.
// ABOUTME: Dry-run mode asks the remote shell to parse and echo without executing.

/// Prefix that turns the remote shell into a syntax check with echo.
pub const DRY_RUN_PREFIX: &[u8] = b"set -nv\n";

/// Wrap `script` so the remote shell parses and echoes it without executing.
///
/// Applying this twice prefixes twice.
pub fn dry_run(script: &[u8]) -> Vec<u8> {
    let mut wrapped = Vec::with_capacity(DRY_RUN_PREFIX.len() + script.len());
    wrapped.extend_from_slice(DRY_RUN_PREFIX);
    wrapped.extend_from_slice(script);
    wrapped
}
