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

/// One `[head]` section with its attribute-value pairs in file order.
#[derive(Debug, PartialEq)]
pub struct RuleFileSection {
    pub head: String,
    pub pairs: Vec<(String, String)>,
    /// Line number of the section header, for error messages.
    pub line: usize,
}

/// A tokenized rule file: the leading globals plus the rule sections.
#[derive(Debug, Default, PartialEq)]
pub struct RuleFile {
    pub globals: Vec<(String, String)>,
    pub sections: Vec<RuleFileSection>,
}

lazy_static! {
    static ref HEADER_RE: Regex = Regex::new(r"^\[(.*)\]\s*$").unwrap();
    static ref COMMENT_RE: Regex = Regex::new(r"^\s*#").unwrap();
    static ref ATTRIBUTE_RE: Regex = Regex::new(r"^(\S+?)\s*=\s*(.*)$").unwrap();
}

struct ParseState {
    result: RuleFile,
    section_count: usize,
    /// Whether the most recent line belonged to an attribute value.
    value_open: bool,
    /// Leading whitespace of the first continuation line of the open value;
    /// stripped from every subsequent continuation.
    indent: Option<String>,
    /// Blank lines seen inside the open value, flushed as line separators
    /// if more continuation follows.
    pending_blanks: usize,
}

impl ParseState {
    fn close_value(&mut self) {
        self.value_open = false;
        self.indent = None;
        self.pending_blanks = 0;
    }

    fn current_pairs(&mut self) -> &mut Vec<(String, String)> {
        match self.result.sections.last_mut() {
            Some(section) => &mut section.pairs,
            None => &mut self.result.globals,
        }
    }
}

/// Tokenize a rule file into (section-header, attribute-value-pairs) lists.
pub fn parse_rule_file(filename: &str, text: &str) -> Result<RuleFile, String> {
    let mut state = ParseState {
        result: RuleFile::default(),
        section_count: 0,
        value_open: false,
        indent: None,
        pending_blanks: 0,
    };

    for (index, raw_line) in text.lines().enumerate() {
        let lineno = index + 1;
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);

        if let Some(captures) = HEADER_RE.captures(line) {
            state.close_value();
            let head = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            if head.is_empty() {
                if state.section_count != 0 {
                    return Err(format!(
                        "{}:{}: the global section is only allowed at the top of the file",
                        filename, lineno
                    ));
                }
                state.section_count += 1;
                continue;
            }
            state.section_count += 1;
            state.result.sections.push(RuleFileSection {
                head: head.to_owned(),
                pairs: Vec::new(),
                line: lineno,
            });
        } else if COMMENT_RE.is_match(line) {
            // Comments never extend a value.
        } else if line.trim().is_empty() {
            if state.value_open {
                state.pending_blanks += 1;
            }
        } else if line.starts_with(|c: char| c.is_whitespace()) {
            if !state.value_open {
                return Err(format!(
                    "{}:{}: continuation line without a preceding attribute",
                    filename, lineno
                ));
            }
            if state.indent.is_none() {
                // The first continuation line fixes the indent to strip.
                let indent_len = line.len() - line.trim_start().len();
                state.indent = Some(line[..indent_len].to_owned());
            }
            let content = {
                let indent = state.indent.as_ref().expect("indent just fixed");
                if line.starts_with(indent.as_str()) {
                    &line[indent.len()..]
                } else {
                    line.trim_start()
                }
            };
            let blanks = state.pending_blanks;
            state.pending_blanks = 0;
            let value = &mut state
                .current_pairs()
                .last_mut()
                .expect("open value without a pair")
                .1;
            for _ in 0..blanks {
                value.push('\n');
            }
            value.push('\n');
            value.push_str(content);
        } else if let Some(captures) = ATTRIBUTE_RE.captures(line) {
            state.close_value();
            let name = captures.get(1).map(|m| m.as_str()).unwrap_or("");
            let value = captures.get(2).map(|m| m.as_str()).unwrap_or("");
            state
                .current_pairs()
                .push((name.to_owned(), value.to_owned()));
            state.value_open = true;
        } else {
            return Err(format!(
                "{}:{}: expected section header, attribute or comment",
                filename, lineno
            ));
        }
    }

    Ok(state.result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<RuleFile, String> {
        parse_rule_file("produce.ini", text)
    }

    #[test]
    fn sections_and_globals() {
        let file = parse(concat!(
            "workdir = out\n",
            "\n",
            "[all]\n",
            "type = task\n",
            "\n",
            "[%{name}.o]\n",
            "recipe = cc -c %{name}.c\n",
        ))
        .unwrap();

        assert_eq!(
            file.globals,
            vec![("workdir".to_owned(), "out".to_owned())]
        );
        assert_eq!(file.sections.len(), 2);
        assert_eq!(file.sections[0].head, "all");
        assert_eq!(file.sections[0].line, 3);
        assert_eq!(
            file.sections[0].pairs,
            vec![("type".to_owned(), "task".to_owned())]
        );
        assert_eq!(file.sections[1].head, "%{name}.o");
    }

    #[test]
    fn explicit_empty_head_is_the_globals_section() {
        let file = parse("[]\na = 1\n[x]\nb = 2\n").unwrap();
        assert_eq!(file.globals, vec![("a".to_owned(), "1".to_owned())]);
        assert_eq!(file.sections.len(), 1);
    }

    #[test]
    fn misplaced_globals_section() {
        let err = parse("[x]\na = 1\n[]\n").unwrap_err();
        assert_eq!(
            err,
            "produce.ini:3: the global section is only allowed at the top of the file"
        );
    }

    #[test]
    fn comments_are_ignored() {
        let file = parse("# top\n[x]\n  # indented comment\na = 1\n").unwrap();
        assert_eq!(
            file.sections[0].pairs,
            vec![("a".to_owned(), "1".to_owned())]
        );
    }

    #[test]
    fn continuation_joins_with_newlines() {
        let file = parse(concat!(
            "[x]\n",
            "recipe =\n",
            "    first line\n",
            "    second line\n",
        ))
        .unwrap();
        assert_eq!(
            file.sections[0].pairs,
            vec![("recipe".to_owned(), "\nfirst line\nsecond line".to_owned())]
        );
    }

    #[test]
    fn first_continuation_line_fixes_the_indent() {
        let file = parse(concat!(
            "[x]\n",
            "recipe =\n",
            "  for i in 1 2 3; do\n",
            "    echo $i\n",
            "  done\n",
        ))
        .unwrap();
        assert_eq!(
            file.sections[0].pairs[0].1,
            "\nfor i in 1 2 3; do\n  echo $i\ndone"
        );
    }

    #[test]
    fn blank_lines_inside_a_value_separate_lines() {
        let file = parse(concat!(
            "[x]\n",
            "recipe =\n",
            "    one\n",
            "\n",
            "    two\n",
        ))
        .unwrap();
        assert_eq!(file.sections[0].pairs[0].1, "\none\n\ntwo");
    }

    #[test]
    fn trailing_blank_lines_are_dropped() {
        let file = parse("[x]\nrecipe =\n    one\n\n\n[y]\na = 1\n").unwrap();
        assert_eq!(file.sections[0].pairs[0].1, "\none");
        assert_eq!(file.sections[1].head, "y");
    }

    #[test]
    fn attribute_spacing_is_stripped() {
        let file = parse("[x]\ndep.src   =    main.c\n").unwrap();
        assert_eq!(
            file.sections[0].pairs,
            vec![("dep.src".to_owned(), "main.c".to_owned())]
        );
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = parse("[x]\na = 1\n!!!\n").unwrap_err();
        assert_eq!(
            err,
            "produce.ini:3: expected section header, attribute or comment"
        );

        let err = parse("    indented\n").unwrap_err();
        assert!(err.starts_with("produce.ini:1:"));
    }
}
