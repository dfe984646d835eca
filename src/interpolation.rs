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

use super::eval::{Env, EvalError, Evaluator};

/// Modes for interpolate().
#[derive(Clone, Copy, Default)]
pub struct InterpolationMode {
    /// On an unresolvable name, reinsert the original `%{...}` text instead
    /// of failing.  Used for pattern heads and the first global-folding pass.
    pub ignore_undefined: bool,
    /// Preserve `%%` verbatim instead of collapsing it to `%`.  Used when the
    /// result will be scanned again as a pattern.
    pub keep_escaped: bool,
}

/// Expand `%{...}` holes and `%%` escapes in |template| against |env|.
///
/// An expression may itself contain `}` characters, so the closing brace is
/// discovered by trial evaluation: each candidate `}` hands the enclosed
/// substring (parenthesized, so comma forms make sequences) to the
/// evaluator, and the first candidate that does not produce a syntax error
/// ends the expression.
pub fn interpolate(
    template: &str,
    env: &Env,
    evaluator: &dyn Evaluator,
    mode: InterpolationMode,
) -> Result<String, String> {
    let mut result = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'%' {
            let start = pos;
            while pos < bytes.len() && bytes[pos] != b'%' {
                pos += 1;
            }
            result.push_str(&template[start..pos]);
            continue;
        }

        match bytes.get(pos + 1) {
            Some(&b'%') => {
                result.push_str(if mode.keep_escaped { "%%" } else { "%" });
                pos += 2;
            }
            Some(&b'{') => {
                let hole_start = pos;
                let expr_start = pos + 2;
                let mut candidate = expr_start;
                let mut last_syntax_error: Option<String> = None;
                let mut closed = None;

                while let Some(offset) = template[candidate..].find('}') {
                    let brace = candidate + offset;
                    let expr = &template[expr_start..brace];
                    match evaluator.evaluate(&format!("({})", expr), env) {
                        Ok(value) => {
                            result.push_str(&value.to_insertion_string());
                            closed = Some(brace);
                            break;
                        }
                        Err(EvalError::Syntax(message)) => {
                            last_syntax_error = Some(message);
                            candidate = brace + 1;
                        }
                        Err(EvalError::Name(message)) => {
                            if mode.ignore_undefined {
                                result.push_str(&template[hole_start..brace + 1]);
                                closed = Some(brace);
                                break;
                            }
                            return Err(message);
                        }
                        Err(EvalError::Other(message)) => {
                            return Err(message);
                        }
                    }
                }

                match closed {
                    Some(brace) => {
                        pos = brace + 1;
                    }
                    None => {
                        return Err(match last_syntax_error {
                            Some(message) => message,
                            None => format!(
                                "unparseable expression '{}'",
                                &template[hole_start..]
                            ),
                        });
                    }
                }
            }
            _ => {
                return Err(format!(
                    "bare '%' in '{}'; write '%%' for a literal percent sign",
                    template
                ));
            }
        }
    }

    Ok(result)
}
