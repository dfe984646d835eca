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

use std::path::Path;

use super::disk_interface::DiskInterface;
use super::eval::{Env, Evaluator, Value};
use super::interpolation::{interpolate, InterpolationMode};
use super::pattern::Pattern;
use super::rule_file_parser::RuleFile;
use super::utils::shell_split;

pub const DEFAULT_SHELL: &'static str = "bash";

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum RuleType {
    File,
    Task,
}

/// An uninstantiated rule: a compiled head plus its attribute-value pairs
/// in declaration order.  Order is significant because later values may
/// reference earlier ones.
pub struct Rule {
    pub head: String,
    pub line: usize,
    pub pattern: Pattern,
    pub pairs: Vec<(String, String)>,
}

/// An instantiated rule: every attribute interpolated against the
/// target-specific environment, plus the mandatory `target` and `type`
/// keys.
#[derive(Clone, Debug)]
pub struct IRule {
    pairs: Vec<(String, String)>,
    rule_type: RuleType,
}

impl IRule {
    fn ingredient(target: &str) -> Self {
        IRule {
            pairs: vec![
                ("target".to_owned(), target.to_owned()),
                ("type".to_owned(), "file".to_owned()),
            ],
            rule_type: RuleType::File,
        }
    }

    /// Look up an attribute; a repeated attribute keeps its last value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|&&(ref attr, _)| attr == name)
            .map(|&(_, ref value)| value.as_str())
    }

    pub fn target(&self) -> &str {
        self.get("target").expect("irule without target")
    }

    pub fn rule_type(&self) -> RuleType {
        self.rule_type
    }

    pub fn is_task(&self) -> bool {
        self.rule_type == RuleType::Task
    }

    pub fn recipe(&self) -> Option<&str> {
        self.get("recipe")
    }

    pub fn shell(&self) -> &str {
        self.get("shell").unwrap_or(DEFAULT_SHELL)
    }

    pub fn depfile(&self) -> Option<&str> {
        match self.get("depfile") {
            Some("") | None => None,
            Some(path) => Some(path),
        }
    }

    /// The additional files the recipe produces besides the target itself.
    pub fn declared_outputs(&self) -> Result<Vec<String>, String> {
        match self.get("outputs") {
            None => Ok(Vec::new()),
            Some(value) => shell_split(value)
                .map_err(|e| format!("in outputs of '{}': {}", self.target(), e)),
        }
    }

    /// The dependencies contributed by `dep.*` attributes, in declaration
    /// order.
    fn dotted_deps(&self) -> impl Iterator<Item = &str> {
        self.pairs
            .iter()
            .filter(|&&(ref attr, _)| attr.starts_with("dep."))
            .map(|&(_, ref value)| value.as_str())
    }
}

/// The direct dependencies of an irule, in order: the depfile itself (it
/// must be brought up to date before its contents are read), the depfile's
/// lines, every `dep.*` attribute, and finally the shell-split `deps` list.
pub fn direct_dependencies(
    irule: &IRule,
    depfile_contents: Option<&str>,
) -> Result<Vec<String>, String> {
    let mut deps = Vec::new();

    if let Some(depfile) = irule.depfile() {
        deps.push(depfile.to_owned());
    }
    if let Some(contents) = depfile_contents {
        for line in contents.lines() {
            let line = line.trim();
            if !line.is_empty() {
                deps.push(line.to_owned());
            }
        }
    }
    for dep in irule.dotted_deps() {
        deps.push(dep.to_owned());
    }
    if let Some(list) = irule.get("deps") {
        let tokens = shell_split(list)
            .map_err(|e| format!("in deps of '{}': {}", irule.target(), e))?;
        deps.extend(tokens);
    }

    Ok(deps)
}

/// The compiled rule file: patterns, evaluated globals, and the expression
/// implementation everything runs against.
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub globals: Env,
    pub evaluator: Box<dyn Evaluator + Send + Sync>,
}

impl RuleSet {
    /// Fold the globals (each may reference earlier ones), execute the
    /// prelude, and compile every rule head.
    pub fn from_rule_file(
        filename: &str,
        file: RuleFile,
        evaluator: Box<dyn Evaluator + Send + Sync>,
    ) -> Result<RuleSet, String> {
        let mut globals = Env::new();
        let fold_mode = InterpolationMode {
            ignore_undefined: true,
            keep_escaped: false,
        };
        for (name, raw) in file.globals {
            let value = interpolate(&raw, &globals, &*evaluator, fold_mode)
                .map_err(|e| format!("{}: in global '{}': {}", filename, name, e))?;
            globals.add_binding(&name, Value::Str(value));
        }

        let prelude = match globals.lookup_variable("prelude") {
            Some(&Value::Str(ref code)) => Some(code.clone()),
            _ => None,
        };
        if let Some(code) = prelude {
            evaluator
                .run_prelude(&code, &mut globals)
                .map_err(|e| format!("{}: in prelude: {}", filename, e.message()))?;
        }

        let mut rules = Vec::new();
        for section in file.sections {
            let pattern = Pattern::compile(&section.head, &globals, &*evaluator)
                .map_err(|e| format!("{}:{}: {}", filename, section.line, e))?;
            rules.push(Rule {
                head: section.head,
                line: section.line,
                pattern,
                pairs: section.pairs,
            });
        }

        Ok(RuleSet {
            rules,
            globals,
            evaluator,
        })
    }

    /// Instantiate the first rule whose head matches |target|, falling
    /// through rules whose `cond` is falsey.  A target that matches no rule
    /// but exists on disk becomes an ingredient.
    pub fn instantiate(
        &self,
        target: &str,
        disk: &dyn DiskInterface,
    ) -> Result<IRule, String> {
        'rules: for rule in &self.rules {
            let captures = match rule.pattern.matches(target) {
                None => continue,
                Some(captures) => captures,
            };

            let mut env = self.globals.clone();
            for (name, text) in captures {
                env.add_binding(&name, Value::Str(text));
            }
            env.add_binding("target", Value::Str(target.to_owned()));

            let mut pairs: Vec<(String, String)> =
                vec![("target".to_owned(), target.to_owned())];
            for &(ref attr, ref raw) in &rule.pairs {
                if attr == "target" {
                    return Err(format!(
                        "rule '{}' must not set 'target'",
                        rule.head
                    ));
                }
                let value = interpolate(raw, &env, &*self.evaluator, Default::default())
                    .map_err(|e| {
                        format!("in rule '{}' for target '{}': {}", rule.head, target, e)
                    })?;
                if attr == "cond" && !literal_truth(&value, &*self.evaluator) {
                    explain!(
                        "skipping rule '{}' for {}: cond is {}",
                        rule.head,
                        target,
                        value
                    );
                    continue 'rules;
                }
                let local = attr.rsplit('.').next().unwrap_or(attr.as_str());
                env.add_binding(local, Value::Str(value.clone()));
                pairs.push((attr.clone(), value));
            }

            let rule_type = {
                let declared = pairs
                    .iter()
                    .rev()
                    .find(|&&(ref attr, _)| attr == "type")
                    .map(|&(_, ref value)| value.as_str());
                match declared {
                    None => {
                        pairs.push(("type".to_owned(), "file".to_owned()));
                        RuleType::File
                    }
                    Some("file") => RuleType::File,
                    Some("task") => RuleType::Task,
                    Some(other) => {
                        return Err(format!(
                            "unknown rule type '{}' for target '{}'",
                            other, target
                        ));
                    }
                }
            };

            return Ok(IRule { pairs, rule_type });
        }

        let exists = disk
            .stat(Path::new(target))
            .map(|t| t.exists())
            .unwrap_or(false);
        if exists {
            return Ok(IRule::ingredient(target));
        }
        Err(format!("no rule to produce {}", target))
    }
}

fn literal_truth(text: &str, evaluator: &dyn Evaluator) -> bool {
    match evaluator.evaluate(text, &Env::new()) {
        Ok(value) => value.truthy(),
        Err(_) => !text.trim().is_empty(),
    }
}
