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

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use super::disk_interface::DiskInterface;
use super::graph::Plan;
use super::rules::RuleSet;

/// Build options set from command-line flags.
pub struct BuildConfig {
    pub always_build: bool,
    pub dry_run: bool,
    pub silent: bool,
    /// Maximum number of recipes running at once.
    pub parallelism: usize,
    /// Targets this invocation treats as fresh; see the rewind pass.
    pub pretend_up_to_date: HashSet<String>,
}

impl BuildConfig {
    pub fn new() -> Self {
        BuildConfig {
            always_build: false,
            dry_run: false,
            silent: false,
            parallelism: 1,
            pretend_up_to_date: HashSet::new(),
        }
    }
}

/// What happened to a target in this invocation.  Absence means not built.
#[derive(Clone, PartialEq, Debug)]
pub enum BuildOutcome {
    Built,
    Failed(String),
}

/// The per-target maps every Producer works against.  All mutation happens
/// under one lock.
pub struct BuildState {
    pub out_of_date: HashSet<String>,
    pub missing: HashSet<String>,
    /// Outputs whose recipe has started but not cleanly finished.  Whatever
    /// is still in here at exit gets renamed to `<path>~`.
    pub incomplete_files: HashSet<String>,
    /// Memoized outcome per output, so every Producer waiting on the same
    /// output fails identically without redoing work.
    pub outcomes: HashMap<String, BuildOutcome>,
}

impl BuildState {
    pub fn new() -> Self {
        BuildState {
            out_of_date: HashSet::new(),
            missing: HashSet::new(),
            incomplete_files: HashSet::new(),
            outcomes: HashMap::new(),
        }
    }
}

/// A counting semaphore bounding concurrent recipe execution.
pub struct JobSlots {
    free: Mutex<usize>,
    available: Condvar,
}

pub struct JobSlotGuard<'a> {
    slots: &'a JobSlots,
}

impl JobSlots {
    pub fn new(capacity: usize) -> Self {
        JobSlots {
            free: Mutex::new(capacity),
            available: Condvar::new(),
        }
    }

    pub fn acquire(&self) -> JobSlotGuard {
        let mut free = self.free.lock().unwrap();
        while *free == 0 {
            free = self.available.wait(free).unwrap();
        }
        *free -= 1;
        JobSlotGuard { slots: self }
    }
}

impl<'a> Drop for JobSlotGuard<'a> {
    fn drop(&mut self) {
        let mut free = self.slots.free.lock().unwrap();
        *free += 1;
        self.slots.available.notify_one();
    }
}

/// Everything one invocation shares between its Producers.
pub struct Build {
    pub config: BuildConfig,
    pub ruleset: RuleSet,
    pub disk: Arc<dyn DiskInterface + Send + Sync>,
    pub plan: Mutex<Plan>,
    pub state: Mutex<BuildState>,
    /// One lock per output path, created on first use.  Guards the right to
    /// rebuild that output.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    slots: JobSlots,
}

impl Build {
    pub fn new(
        config: BuildConfig,
        ruleset: RuleSet,
        disk: Arc<dyn DiskInterface + Send + Sync>,
    ) -> Arc<Build> {
        let capacity = config.parallelism.max(1);
        Arc::new(Build {
            config,
            ruleset,
            disk,
            plan: Mutex::new(Plan::new()),
            state: Mutex::new(BuildState::new()),
            locks: Mutex::new(HashMap::new()),
            slots: JobSlots::new(capacity),
        })
    }

    fn output_lock(&self, path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Phase 3: rename every output whose recipe did not cleanly finish to
    /// `<path>~`, tolerating files that never appeared.  Runs even after a
    /// failed build.
    pub fn quarantine_incomplete(&self) {
        let incomplete: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            state.incomplete_files.drain().collect()
        };
        for path in incomplete {
            let backup = format!("{}~", path);
            match self.disk.rename(Path::new(&path), Path::new(&backup)) {
                Ok(true) => {
                    warning!("renamed incomplete file {} to {}", path, backup);
                }
                Ok(false) => {}
                Err(e) => {
                    error!("{}", e);
                }
            }
        }
    }
}

/// Whether a Producer actually ran the recipe.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum ProduceResult {
    Rebuilt,
    UpToDate,
}

struct TargetSnapshot {
    ddeps: Vec<String>,
    outputs: Vec<String>,
    recipe: Option<String>,
    shell: String,
    is_task: bool,
}

/// Brings a single realized target up to date.  Every Producer runs in its
/// own thread; the |depth| is only used for logging.
pub struct Producer {
    build: Arc<Build>,
    target: String,
    depth: usize,
}

impl Producer {
    pub fn new(build: Arc<Build>, target: String, depth: usize) -> Self {
        Producer {
            build,
            target,
            depth,
        }
    }

    pub fn produce(&self) -> Result<ProduceResult, String> {
        let snapshot = {
            let plan = self.build.plan.lock().unwrap();
            let idx = plan
                .lookup(&self.target)
                .ok_or_else(|| format!("unrealized target '{}'", self.target))?;
            let entry = plan.get(idx);
            TargetSnapshot {
                ddeps: entry.ddeps.clone(),
                outputs: entry.outputs.clone(),
                recipe: entry.irule.recipe().map(|r| r.to_owned()),
                shell: entry.irule.shell().to_owned(),
                is_task: entry.irule.is_task(),
            }
        };

        // Phase A: take the lock of every output this recipe may write, in
        // sorted order so overlapping output sets cannot deadlock.
        let mut lock_paths: Vec<String> = snapshot.outputs.clone();
        lock_paths.push(self.target.clone());
        lock_paths.sort();
        lock_paths.dedup();
        let lock_arcs: Vec<Arc<Mutex<()>>> = lock_paths
            .iter()
            .map(|path| self.build.output_lock(path))
            .collect();
        let _guards: Vec<MutexGuard<()>> =
            lock_arcs.iter().map(|lock| lock.lock().unwrap()).collect();

        // Phase B: re-check freshness now that we own the outputs.
        {
            let state = self.build.state.lock().unwrap();
            for path in &lock_paths {
                if let Some(&BuildOutcome::Failed(ref reason)) = state.outcomes.get(path) {
                    return Err(reason.clone());
                }
            }
            if !state.out_of_date.contains(&self.target)
                && !state.missing.contains(&self.target)
            {
                explain!(
                    "{:1$}{2} is up to date",
                    "",
                    self.depth * 2,
                    self.target
                );
                return Ok(ProduceResult::UpToDate);
            }
        }

        // Phase C: bring every direct dependency up to date, concurrently.
        if self
            .build
            .config
            .pretend_up_to_date
            .contains(&self.target)
        {
            explain!(
                "{:1$}pretending {2} is up to date",
                "",
                self.depth * 2,
                self.target
            );
            return Ok(ProduceResult::UpToDate);
        }
        if !snapshot.ddeps.is_empty() {
            let mut workers = Vec::with_capacity(snapshot.ddeps.len());
            for dep in &snapshot.ddeps {
                let build = self.build.clone();
                let dep = dep.clone();
                let depth = self.depth + 1;
                workers.push(thread::spawn(move || {
                    Producer::new(build, dep, depth).produce()
                }));
            }
            let mut first_error = None;
            for worker in workers {
                match worker.join() {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                    Err(_) => {
                        if first_error.is_none() {
                            first_error = Some("dependency worker panicked".to_owned());
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        // Phase D: run the recipe under the global parallelism bound.
        let _slot = self.build.slots.acquire();
        explain!("{:1$}producing {2}", "", self.depth * 2, self.target);
        let result = self.run_recipe(&snapshot);
        if let Err(ref reason) = result {
            let mut state = self.build.state.lock().unwrap();
            for path in &lock_paths {
                state
                    .outcomes
                    .insert(path.clone(), BuildOutcome::Failed(reason.clone()));
            }
        }
        result
    }

    fn run_recipe(&self, snapshot: &TargetSnapshot) -> Result<ProduceResult, String> {
        let recipe = match snapshot.recipe {
            None => {
                self.mark_built(snapshot);
                return Ok(ProduceResult::Rebuilt);
            }
            Some(ref recipe) => {
                // The leading newline is an artifact of "recipe =" followed
                // by continuation lines.
                if recipe.starts_with('\n') {
                    &recipe[1..]
                } else {
                    recipe.as_str()
                }
            }
        };

        if !self.build.config.silent {
            print!("{}\n", recipe);
            let _ = io::stdout().flush();
        }
        if self.build.config.dry_run {
            self.mark_built(snapshot);
            return Ok(ProduceResult::Rebuilt);
        }

        if !snapshot.is_task {
            // A leftover backup would otherwise shadow the fresh output.
            for path in self.written_paths(snapshot) {
                self.build
                    .disk
                    .remove_file(Path::new(&format!("{}~", path)))?;
            }
        }

        let mut script = tempfile::Builder::new()
            .prefix("produce-recipe-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| format!("creating recipe script: {}", e))?;
        script
            .write_all(recipe.as_bytes())
            .map_err(|e| format!("writing recipe script: {}", e))?;

        {
            let mut state = self.build.state.lock().unwrap();
            for path in self.written_paths(snapshot) {
                state.incomplete_files.insert(path);
            }
        }

        let status = Command::new(&snapshot.shell)
            .arg(script.path())
            .stdin(Stdio::inherit())
            .status();

        match status {
            Ok(status) if status.success() => {
                self.mark_built(snapshot);
                Ok(ProduceResult::Rebuilt)
            }
            Ok(status) => Err(format!(
                "recipe for '{}' failed ({})",
                self.target, status
            )),
            Err(e) => Err(format!(
                "recipe for '{}': could not run {}: {}",
                self.target, snapshot.shell, e
            )),
        }
    }

    /// The paths this recipe writes: the target itself (for file rules)
    /// plus every declared output.
    fn written_paths(&self, snapshot: &TargetSnapshot) -> Vec<String> {
        let mut paths = Vec::with_capacity(snapshot.outputs.len() + 1);
        if !snapshot.is_task {
            paths.push(self.target.clone());
        }
        paths.extend(snapshot.outputs.iter().cloned());
        paths
    }

    fn mark_built(&self, snapshot: &TargetSnapshot) {
        let mut state = self.build.state.lock().unwrap();
        for path in self.written_paths(snapshot) {
            state.incomplete_files.remove(&path);
        }
        state.out_of_date.remove(&self.target);
        state.missing.remove(&self.target);
        state
            .outcomes
            .insert(self.target.clone(), BuildOutcome::Built);
        for output in &snapshot.outputs {
            state.out_of_date.remove(output);
            state.missing.remove(output);
            state
                .outcomes
                .insert(output.clone(), BuildOutcome::Built);
        }
    }
}
