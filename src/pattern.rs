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

use regex::Regex;

use super::eval::{Env, Evaluator};
use super::interpolation::{interpolate, InterpolationMode};

/// A compiled rule head: matches a whole target name and yields named
/// captures.
pub struct Pattern {
    regex: Regex,
}

fn is_capture_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl Pattern {
    /// Compile a rule head.  A head of length >= 2 that both starts and ends
    /// with '/' is a raw regular expression; anything else is a template
    /// whose `%{name}` holes become named capture groups.  Template heads
    /// are first expanded against the globals, leaving unknown names (the
    /// captures-to-be) untouched.
    pub fn compile(
        head: &str,
        globals: &Env,
        evaluator: &dyn Evaluator,
    ) -> Result<Pattern, String> {
        let source = if head.len() >= 2 && head.starts_with('/') && head.ends_with('/') {
            head[1..head.len() - 1].to_owned()
        } else {
            let mode = InterpolationMode {
                ignore_undefined: true,
                keep_escaped: true,
            };
            let expanded = interpolate(head, globals, evaluator, mode)
                .map_err(|e| format!("in rule head '{}': {}", head, e))?;
            template_to_regex(head, &expanded)?
        };

        let anchored = format!("^(?:{})$", source);
        let regex = Regex::new(&anchored)
            .map_err(|e| format!("invalid regular expression in rule head '{}': {}", head, e))?;
        Ok(Pattern { regex })
    }

    /// Match |target| in full.  On success, return every named capture with
    /// absent groups defaulting to the empty string.
    pub fn matches(&self, target: &str) -> Option<Vec<(String, String)>> {
        let captures = self.regex.captures(target)?;
        let mut bindings = Vec::new();
        for name in self.regex.capture_names().flatten() {
            let text = captures.name(name).map(|m| m.as_str()).unwrap_or("");
            bindings.push((name.to_owned(), text.to_owned()));
        }
        Some(bindings)
    }
}

fn template_to_regex(head: &str, expanded: &str) -> Result<String, String> {
    let mut source = String::with_capacity(expanded.len());
    let mut chars = expanded.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            source.push_str(&regex::escape(&c.to_string()));
            continue;
        }
        match chars.next() {
            Some('%') => {
                source.push('%');
            }
            Some('{') => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        None => {
                            return Err(format!("unclosed '%{{' in rule head '{}'", head));
                        }
                        Some('}') => break,
                        Some(c) => name.push(c),
                    }
                }
                if !is_capture_name(&name) {
                    return Err(format!(
                        "invalid capture name '{}' in rule head '{}'",
                        name, head
                    ));
                }
                source.push_str(&format!("(?P<{}>.*)", name));
            }
            _ => {
                return Err(format!(
                    "bare '%' in rule head '{}'; write '%%' for a literal percent sign",
                    head
                ));
            }
        }
    }

    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::eval::{ScriptEvaluator, Value};

    fn compile(head: &str) -> Result<Pattern, String> {
        Pattern::compile(head, &Env::new(), &ScriptEvaluator::new())
    }

    #[test]
    fn literal_head_matches_itself_only() {
        let pattern = compile("out.txt").unwrap();
        assert!(pattern.matches("out.txt").is_some());
        assert!(pattern.matches("xout.txt").is_none());
        assert!(pattern.matches("out.txt2").is_none());
        // '.' is escaped, not a wildcard.
        assert!(pattern.matches("outxtxt").is_none());
    }

    #[test]
    fn named_holes_capture() {
        let pattern = compile("%{base}.o").unwrap();
        let captures = pattern.matches("main.o").unwrap();
        assert_eq!(captures, vec![("base".to_owned(), "main".to_owned())]);
        assert!(pattern.matches("main.c").is_none());

        let pattern = compile("%{dir}/%{name}.txt").unwrap();
        let captures = pattern.matches("a/b.txt").unwrap();
        assert_eq!(
            captures,
            vec![
                ("dir".to_owned(), "a".to_owned()),
                ("name".to_owned(), "b".to_owned())
            ]
        );
    }

    #[test]
    fn escaped_percent_in_template() {
        let pattern = compile("100%%.txt").unwrap();
        assert!(pattern.matches("100%.txt").is_some());
        assert!(pattern.matches("1000.txt").is_none());
    }

    #[test]
    fn slash_delimited_raw_regex() {
        let pattern = compile("/out-[0-9]+\\.txt/").unwrap();
        assert!(pattern.matches("out-17.txt").is_some());
        assert!(pattern.matches("out-.txt").is_none());
        // Anchored to the full target name.
        assert!(pattern.matches("xout-17.txt").is_none());
        assert!(pattern.matches("out-17.txt.bak").is_none());
    }

    #[test]
    fn raw_regex_named_groups() {
        let pattern = compile("/(?P<stem>.*)\\.o/").unwrap();
        let captures = pattern.matches("lib/foo.o").unwrap();
        assert_eq!(captures, vec![("stem".to_owned(), "lib/foo".to_owned())]);
    }

    #[test]
    fn globals_expand_in_heads() {
        let mut globals = Env::new();
        globals.add_binding("builddir", Value::Str("out".to_owned()));
        let pattern =
            Pattern::compile("%{builddir}/%{name}.bin", &globals, &ScriptEvaluator::new())
                .unwrap();
        let captures = pattern.matches("out/tool.bin").unwrap();
        assert_eq!(captures, vec![("name".to_owned(), "tool".to_owned())]);
    }

    #[test]
    fn bad_heads_are_rejected() {
        assert!(compile("/[unclosed/").is_err());
        assert!(compile("%{not a name}.o").is_err());
        assert!(compile("50%off").is_err());
    }
}
