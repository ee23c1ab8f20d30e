//! Parsing of Makefile syntax as found in `.d` files emitted by C compilers.

use crate::scanner::{ParseResult, Scanner};
use crate::smallmap::SmallMap;

/// The parsed form of a depfile: each target with its prerequisites, in
/// file order.
#[derive(Debug, PartialEq)]
pub struct Depfile<'a> {
    pub targets: SmallMap<&'a str, Vec<&'a str>>,
}

impl<'a> Depfile<'a> {
    /// The first target named in the file; compilers put the object file
    /// here.
    pub fn primary_target(&self) -> Option<&'a str> {
        self.targets.iter().next().map(|&(target, _)| target)
    }

    /// All prerequisites across all targets, in file order.
    pub fn all_deps(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.targets.iter().flat_map(|(_, deps)| deps.iter().copied())
    }
}

/// Skip spaces and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) -> ParseResult<()> {
    loop {
        match scanner.read() {
            ' ' => {}
            '\\' => match scanner.read() {
                '\n' => {}
                '\r' => {
                    if !scanner.skip('\n') {
                        return scanner.parse_error("invalid backslash escape");
                    }
                }
                _ => return scanner.parse_error("invalid backslash escape"),
            },
            _ => {
                scanner.back();
                break;
            }
        }
    }
    Ok(())
}

/// Read one path from the input scanner.
/// Note: treats colon as a valid character in a path because of Windows-style
/// paths, which means the initial `output: ...` path will include the
/// trailing colon.
fn read_path<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Option<&'a str>> {
    skip_spaces(scanner)?;
    let start = scanner.ofs;
    loop {
        match scanner.read() {
            '\0' | ' ' | '\n' | '\r' => {
                scanner.back();
                break;
            }
            '\\' => {
                if scanner.peek_newline() || scanner.peek() == '\n' {
                    scanner.back();
                    break;
                }
            }
            _ => {}
        }
    }
    let end = scanner.ofs;
    if end == start {
        return Ok(None);
    }
    Ok(Some(scanner.slice(start, end)))
}

/// Parse a `.d` file.
pub fn parse<'a>(scanner: &mut Scanner<'a>) -> ParseResult<Depfile<'a>> {
    let mut targets = SmallMap::default();
    loop {
        while matches!(scanner.peek(), ' ' | '\n' | '\r') {
            scanner.next();
        }
        let target = match read_path(scanner)? {
            None => break,
            Some(o) => o,
        };
        scanner.skip_spaces();
        let target = match target.strip_suffix(':') {
            None => {
                scanner.expect(':')?;
                target
            }
            Some(target) => target,
        };
        let mut deps = Vec::new();
        while let Some(p) = read_path(scanner)? {
            deps.push(p);
        }
        targets.insert(target, deps);
    }
    scanner.expect('\0')?;

    Ok(Depfile { targets })
}
