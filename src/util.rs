// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Small path helpers shared by the executor and the binary.

/// Expands a leading `~` in a path to the user's home directory.
///
/// Only `~` on its own and `~/...` are expanded; a tilde anywhere else is
/// left untouched. If no home directory can be determined the path is
/// returned unchanged.
///
/// # Examples
///
/// ```
/// use onplugd::util::expand;
///
/// assert_eq!(expand("/etc/onplugd.d"), "/etc/onplugd.d");
/// ```
#[must_use]
pub fn expand(path: &str) -> String {
    expand_with_home(path, home_dir().as_deref())
}

fn expand_with_home(path: &str, home: Option<&str>) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = home {
            let home = home.trim_end_matches('/');
            return format!("{home}{}", &path[1..]);
        }
    }

    path.to_string()
}

/// Returns the user's home directory, from `$HOME` with a fallback to the
/// password database.
fn home_dir() -> Option<String> {
    match std::env::var("HOME") {
        Ok(home) if !home.is_empty() => Some(home),
        _ => dirs::home_dir().map(|p| p.to_string_lossy().into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_HOME: &str = "/home/test";

    #[test]
    fn expand_empty() {
        assert_eq!(expand_with_home("", Some(TEST_HOME)), "");
    }

    #[test]
    fn expand_bare_tilde() {
        assert_eq!(expand_with_home("~", Some(TEST_HOME)), "/home/test");
    }

    #[test]
    fn expand_tilde_prefix() {
        assert_eq!(expand_with_home("~/test", Some(TEST_HOME)), "/home/test/test");
    }

    #[test]
    fn expand_no_change() {
        assert_eq!(expand_with_home("/a/b/c", Some(TEST_HOME)), "/a/b/c");
    }

    #[test]
    fn expand_inner_tilde_untouched() {
        assert_eq!(expand_with_home("/a/~/c", Some(TEST_HOME)), "/a/~/c");
    }

    #[test]
    fn expand_trailing_slash_in_home() {
        assert_eq!(
            expand_with_home("~/x", Some("/home/test/")),
            "/home/test/x"
        );
    }

    #[test]
    fn expand_without_home_is_identity() {
        assert_eq!(expand_with_home("~/x", None), "~/x");
    }
}
