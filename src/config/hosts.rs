// ABOUTME: Parses the comma-separated hop list.
// ABOUTME: Order and duplicates are preserved; blank entries are dropped.

/// Split `list` on commas into trimmed hop addresses.
pub fn parse_hosts(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}
