// Copyright 2018 The Produce-rs Project Developers. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use libc;
use num_cpus;

/// Log a staleness or scheduling explanation; enabled by -d.
#[macro_export]
macro_rules! explain {
    ($fmt:expr) =>
        (if $crate::debug_flags::explaining() {
            eprint!(concat!("produce explain: ", $fmt, "\n"))
        });
    ($fmt:expr, $($arg:tt)*) =>
        (if $crate::debug_flags::explaining() {
            eprint!(concat!("produce explain: ", $fmt, "\n"), $($arg)*)
        });
}

/// Log a fatal message and exit.
#[macro_export]
macro_rules! fatal {
    ($fmt:expr) =>
        ({
            eprint!(concat!("produce fatal: ", $fmt, "\n"));
            $crate::utils::exit();
        });
    ($fmt:expr, $($arg:tt)*) =>
        ({
            eprint!(concat!("produce fatal: ", $fmt, "\n"), $($arg)*);
            $crate::utils::exit();
        });
}

/// Log a warning message.
#[macro_export]
macro_rules! warning {
    ($fmt:expr) =>
        (eprint!(concat!("produce warning: ", $fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) =>
        (eprint!(concat!("produce warning: ", $fmt, "\n"), $($arg)*));
}

/// Log an error message.
#[macro_export]
macro_rules! error {
    ($fmt:expr) =>
        (eprint!(concat!("produce error: ", $fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) =>
        (eprint!(concat!("produce error: ", $fmt, "\n"), $($arg)*));
}

pub fn exit() -> ! {
    unsafe {
        libc::exit(1);
    }
}

pub fn get_processor_count() -> usize {
    num_cpus::get()
}

fn is_known_shell_safe_char(ch: char) -> bool {
    match ch {
        'A'..='Z' | 'a'..='z' | '0'..='9' => true,
        '_' | '+' | '-' | '.' | '/' | ':' | '@' | '%' | ',' | '=' => true,
        _ => false,
    }
}

/// Quote |input| according to the whims of a POSIX shell.  The string is
/// returned unmodified if it contains no problematic characters.
pub fn shell_quote(input: &str) -> String {
    if !input.is_empty() && input.chars().all(is_known_shell_safe_char) {
        return input.to_owned();
    }

    let mut result = String::with_capacity(input.len() + 2);
    result.push('\'');
    for ch in input.chars() {
        if ch == '\'' {
            result.push_str("'\\''");
        } else {
            result.push(ch);
        }
    }
    result.push('\'');
    result
}

/// Join |items| into one shell word list, quoting each element.
pub fn shell_quote_join<'a, I: IntoIterator<Item = &'a str>>(items: I) -> String {
    let mut result = String::new();
    for item in items {
        if !result.is_empty() {
            result.push(' ');
        }
        result.push_str(&shell_quote(item));
    }
    result
}

#[derive(PartialEq, Clone, Copy)]
enum SplitState {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
}

/// Split |input| into whitespace-separated tokens, honoring single quotes,
/// double quotes and backslash escapes.  The inverse of shell_quote.
pub fn shell_split(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current: Option<String> = None;
    let mut state = SplitState::Unquoted;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match state {
            SplitState::Unquoted => match ch {
                c if c.is_whitespace() => {
                    if let Some(token) = current.take() {
                        tokens.push(token);
                    }
                }
                '\'' => {
                    state = SplitState::SingleQuoted;
                    current.get_or_insert_with(String::new);
                }
                '"' => {
                    state = SplitState::DoubleQuoted;
                    current.get_or_insert_with(String::new);
                }
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| "trailing backslash".to_owned())?;
                    current.get_or_insert_with(String::new).push(escaped);
                }
                c => {
                    current.get_or_insert_with(String::new).push(c);
                }
            },
            SplitState::SingleQuoted => match ch {
                '\'' => {
                    state = SplitState::Unquoted;
                }
                c => {
                    current.get_or_insert_with(String::new).push(c);
                }
            },
            SplitState::DoubleQuoted => match ch {
                '"' => {
                    state = SplitState::Unquoted;
                }
                '\\' => {
                    let escaped = chars
                        .next()
                        .ok_or_else(|| "trailing backslash".to_owned())?;
                    if escaped != '"' && escaped != '\\' {
                        current.get_or_insert_with(String::new).push('\\');
                    }
                    current.get_or_insert_with(String::new).push(escaped);
                }
                c => {
                    current.get_or_insert_with(String::new).push(c);
                }
            },
        }
    }

    if state != SplitState::Unquoted {
        return Err("unmatched quote".to_owned());
    }
    if let Some(token) = current.take() {
        tokens.push(token);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_passes_safe_words() {
        assert_eq!(shell_quote("some/sensible-path_1.txt"), "some/sensible-path_1.txt");
        assert_eq!(shell_quote("a=b"), "a=b");
    }

    #[test]
    fn shell_quote_escapes() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("don't"), "'don'\\''t'");
    }

    #[test]
    fn shell_split_plain() {
        assert_eq!(
            shell_split("a  b\tc").unwrap(),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
        assert_eq!(shell_split("").unwrap(), Vec::<String>::new());
        assert_eq!(shell_split("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn shell_split_quotes() {
        assert_eq!(
            shell_split("'a b' c").unwrap(),
            vec!["a b".to_owned(), "c".to_owned()]
        );
        assert_eq!(
            shell_split("\"a b\"c").unwrap(),
            vec!["a bc".to_owned()]
        );
        assert_eq!(shell_split("''").unwrap(), vec!["".to_owned()]);
        assert_eq!(
            shell_split("a\\ b").unwrap(),
            vec!["a b".to_owned()]
        );
    }

    #[test]
    fn shell_split_errors() {
        assert!(shell_split("'oops").is_err());
        assert!(shell_split("a\\").is_err());
    }

    #[test]
    fn shell_quote_split_round_trip() {
        let words = vec!["plain", "with space", "don't", "a\"b"];
        let joined = shell_quote_join(words.iter().cloned());
        assert_eq!(
            shell_split(&joined).unwrap(),
            words.iter().map(|s| s.to_string()).collect::<Vec<_>>()
        );
    }
}
