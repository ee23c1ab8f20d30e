//! Extraction of header dependencies from MSVC `cl.exe /showIncludes`
//! output.
//!
//! cl.exe has no depfile support; instead it reports every opened header on
//! a line like `Note: including file:    C:\include\stdio.h`.  We pull those
//! lines out of the captured output (so the user doesn't see them) and
//! return the mentioned paths.

/// Result of filtering one command's output.
pub struct ShowIncludes {
    /// Include paths in first-mention order, deduplicated.
    pub includes: Vec<String>,
    /// The output with include-note lines and the filename echo removed.
    pub filtered_output: String,
}

/// Headers under the compiler's own installation are not interesting as
/// dependencies; they change only when the toolchain does.
fn is_system_include(path: &str) -> bool {
    let lower = path.to_lowercase();
    lower.contains("program files") || lower.contains("microsoft visual studio")
}

/// cl.exe echoes the name of the compiled file as the first line of output.
fn is_input_filename(line: &str) -> bool {
    let lower = line.trim_end().to_lowercase();
    [".c", ".cc", ".cxx", ".cpp", ".c++"]
        .iter()
        .any(|ext| lower.ends_with(ext))
        && !lower.contains(' ')
}

/// Parse `/showIncludes` output, splitting dependency notes from the
/// output the user should see.  `prefix` is the (localized) note prefix,
/// from the `msvc_deps_prefix` binding.
pub fn parse_show_includes(output: &str, prefix: &str) -> ShowIncludes {
    let mut includes = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut filtered_output = String::new();
    for (i, line) in output.lines().enumerate() {
        if let Some(rest) = line.strip_prefix(prefix) {
            let path = rest.trim_start_matches(' ').trim_end();
            if !path.is_empty() && !is_system_include(path) {
                let key = if cfg!(windows) {
                    path.to_lowercase()
                } else {
                    path.to_string()
                };
                if seen.insert(key) {
                    includes.push(path.to_string());
                }
            }
        } else if i == 0 && is_input_filename(line) {
            // Swallow the filename echo.
        } else {
            filtered_output.push_str(line);
            filtered_output.push('\n');
        }
    }
    ShowIncludes {
        includes,
        filtered_output,
    }
}

pub const DEFAULT_PREFIX: &str = "Note: including file: ";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_filters() {
        let output = "foo.cc\n\
                      Note: including file: foo.h\n\
                      Note: including file:   bar/baz.h\n\
                      some warning\n";
        let result = parse_show_includes(output, DEFAULT_PREFIX);
        assert_eq!(result.includes, vec!["foo.h", "bar/baz.h"]);
        assert_eq!(result.filtered_output, "some warning\n");
    }

    #[test]
    fn dedupes_repeats() {
        let output = "Note: including file: a.h\nNote: including file: a.h\n";
        let result = parse_show_includes(output, DEFAULT_PREFIX);
        assert_eq!(result.includes, vec!["a.h"]);
    }

    #[test]
    fn skips_system_headers() {
        let output =
            "Note: including file: C:\\Program Files\\MSVC\\include\\stdio.h\n";
        let result = parse_show_includes(output, DEFAULT_PREFIX);
        assert!(result.includes.is_empty());
    }

    #[test]
    fn custom_prefix() {
        let output = "Hinweis: Einlesen der Datei: quux.h\nother\n";
        let result = parse_show_includes(output, "Hinweis: Einlesen der Datei: ");
        assert_eq!(result.includes, vec!["quux.h"]);
        assert_eq!(result.filtered_output, "other\n");
    }

    #[test]
    fn keeps_real_output() {
        let output = "error C1234: busted\n";
        let result = parse_show_includes(output, DEFAULT_PREFIX);
        assert!(result.includes.is_empty());
        assert_eq!(result.filtered_output, "error C1234: busted\n");
    }
}
