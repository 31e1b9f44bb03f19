//! Repository locator parsing for participant registration.

/// Parse a GitHub HTTPS or SSH URL into `owner/repo`.
///
/// Trailing slashes and a `.git` suffix are tolerated. Returns `None` for any
/// other host or shape.
pub fn parse_full_name(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let path = trimmed
        .strip_prefix("git@github.com:")
        .or_else(|| trimmed.strip_prefix("https://github.com/"))?;
    let (owner, repo) = path.split_once('/')?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some(format!("{owner}/{repo}"))
}

/// Locators are compared case-insensitively (GitHub names are).
pub fn same_locator(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Expand a clone URL template (`{repo}` placeholder) for a locator.
pub fn clone_url(template: &str, full_name: &str) -> String {
    template.replace("{repo}", full_name)
}
