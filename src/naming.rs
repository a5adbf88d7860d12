//! Incrementing-suffix naming shared by autosave branches, hosted repository
//! names and renamed project directories.

/// `{base}_{start}`, `{base}_{start + 1}`, ...
pub fn suffixed_names(base: &str, start: u32) -> impl Iterator<Item = String> + '_ {
    (start..).map(move |n| format!("{base}_{n}"))
}

/// First name from [`suffixed_names`] for which `exists` is false.
pub fn next_available_name<F>(base: &str, start: u32, mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    for name in suffixed_names(base, start) {
        if !exists(&name) {
            return name;
        }
    }
    unreachable!("suffixed_names is unbounded")
}
