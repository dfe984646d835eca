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

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::build::{Build, Producer};
use super::rules::{direct_dependencies, IRule};
use super::timestamp::TimeStamp;

#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Debug)]
pub struct TargetIndex(pub(crate) usize);

/// Everything the scheduler needs to know about one realized target.
pub struct TargetEntry {
    pub name: String,
    pub irule: IRule,
    /// Direct dependencies, in rule order.
    pub ddeps: Vec<String>,
    /// Additional files the recipe produces besides the target itself.
    pub outputs: Vec<String>,
    /// Recorded modification time; 0 for tasks.  A missing file records the
    /// maximum dependency time so ordering survives until it is synthesized.
    pub time: TimeStamp,
    /// The dependency whose newer time made this target stale, if any.
    pub changed_ddep: Option<String>,
}

/// The realized dependency graph for one invocation.
pub struct Plan {
    entries: Vec<TargetEntry>,
    names: HashMap<String, TargetIndex>,
}

impl Plan {
    pub fn new() -> Self {
        Plan {
            entries: Vec::new(),
            names: HashMap::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<TargetIndex> {
        self.names.get(name).cloned()
    }

    pub fn get(&self, idx: TargetIndex) -> &TargetEntry {
        self.entries.get(idx.0).expect("index out of range")
    }

    pub fn get_mut(&mut self, idx: TargetIndex) -> &mut TargetEntry {
        self.entries.get_mut(idx.0).expect("index out of range")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The recorded time of a realized target; 0 for unknown names.
    pub fn time(&self, name: &str) -> TimeStamp {
        self.lookup(name)
            .map(|idx| self.get(idx).time)
            .unwrap_or(TimeStamp(0))
    }

    fn insert(&mut self, entry: TargetEntry) -> TargetIndex {
        let idx = TargetIndex(self.entries.len());
        self.names.insert(entry.name.clone(), idx);
        self.entries.push(entry);
        idx
    }

    /// Forget every realized target, bypassing the add-once deduplication.
    /// Used by the post-build rewind pass.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.names.clear();
    }
}

/// Realizes targets into the plan and decides which are out of date.
pub struct DependencyScan<'a> {
    pub build: &'a Arc<Build>,
    /// Post-build pass: mtime-advancing touches are performed and depfiles
    /// are read as-is instead of being brought up to date.
    pub rewinding: bool,
    /// Bring depfiles up to date before reading them.
    pub sync_depfiles: bool,
}

impl<'a> DependencyScan<'a> {
    pub fn new(build: &'a Arc<Build>) -> Self {
        DependencyScan {
            build,
            rewinding: false,
            sync_depfiles: true,
        }
    }

    pub fn rewind(build: &'a Arc<Build>) -> Self {
        DependencyScan {
            build,
            rewinding: true,
            sync_depfiles: false,
        }
    }

    fn cycle_error(chain: &[String], target: &str, output: Option<&str>) -> String {
        let mut names: Vec<&str> = chain.iter().map(String::as_str).collect();
        names.push(target);
        if let Some(output) = output {
            names.push(output);
        }
        format!("cyclic dependency: {}", names.join(" -> "))
    }

    /// Realize |target| and, recursively, everything it depends on.  |beam|
    /// is the chain of ancestors from the requested root.
    pub fn add_target(&self, target: &str, beam: &mut Vec<String>) -> Result<(), String> {
        if let Some(pos) = beam.iter().position(|b| b == target) {
            return Err(Self::cycle_error(&beam[pos..], target, None));
        }

        {
            let plan = self.build.plan.lock().unwrap();
            if plan.lookup(target).is_some() {
                return Ok(());
            }
        }

        let irule = self.build.ruleset.instantiate(target, &*self.build.disk)?;
        let outputs = irule.declared_outputs()?;
        for output in &outputs {
            if let Some(pos) = beam.iter().position(|b| b == output) {
                return Err(Self::cycle_error(&beam[pos..], target, Some(output)));
            }
        }
        let is_task = irule.is_task();
        let depfile = irule.depfile().map(|d| d.to_owned());

        let idx = {
            let mut plan = self.build.plan.lock().unwrap();
            plan.insert(TargetEntry {
                name: target.to_owned(),
                irule,
                ddeps: Vec::new(),
                outputs: outputs.clone(),
                time: TimeStamp(0),
                changed_ddep: None,
            })
        };

        beam.push(target.to_owned());
        let resolved = self.resolve_deps(target, idx, depfile.as_deref(), beam);
        beam.pop();
        let ddeps = resolved?;

        let time = if is_task {
            TimeStamp(0)
        } else {
            let stat = self.build.disk.stat(Path::new(target))?;
            if stat.exists() {
                stat
            } else {
                explain!("{} is missing", target);
                let mut state = self.build.state.lock().unwrap();
                state.missing.insert(target.to_owned());
                drop(state);
                let plan = self.build.plan.lock().unwrap();
                ddeps
                    .iter()
                    .map(|d| plan.time(d))
                    .max()
                    .unwrap_or(TimeStamp(0))
            }
        };

        let mut out_of_date = false;
        if self.build.config.always_build {
            explain!("{} is out of date: always-build is set", target);
            out_of_date = true;
        }
        if is_task {
            explain!("{} is a task and so always out of date", target);
            out_of_date = true;
        }

        let dep_times: Vec<TimeStamp> = {
            let plan = self.build.plan.lock().unwrap();
            ddeps.iter().map(|d| plan.time(d)).collect()
        };
        let dep_stale: Vec<bool> = {
            let state = self.build.state.lock().unwrap();
            ddeps
                .iter()
                .map(|d| state.out_of_date.contains(d.as_str()))
                .collect()
        };

        let pretend = &self.build.config.pretend_up_to_date;
        let mut changed_ddep: Option<String> = None;
        for (i, dep) in ddeps.iter().enumerate() {
            let pretended = pretend.contains(dep.as_str());
            if dep_stale[i] && !pretended {
                explain!("{} is out of date: {} is out of date", target, dep);
                out_of_date = true;
            }
            if dep_times[i] > time {
                changed_ddep = Some(dep.clone());
                if !pretended {
                    explain!("{} is out of date: {} is newer", target, dep);
                    out_of_date = true;
                }
            }
        }

        {
            let mut plan = self.build.plan.lock().unwrap();
            let entry = plan.get_mut(idx);
            entry.time = time;
            entry.changed_ddep = changed_ddep.clone();
        }
        if out_of_date {
            let mut state = self.build.state.lock().unwrap();
            state.out_of_date.insert(target.to_owned());
        }

        // This target stays as it is, but only because a pretend-up-to-date
        // dependency is newer.  Advance that dependency's mtime so a future
        // invocation still sees the staleness.
        if self.rewinding && !out_of_date {
            if let Some(ref dep) = changed_ddep {
                if !self.build.config.dry_run {
                    let when = self.build.disk.now().plus_seconds(1);
                    self.build.disk.touch(Path::new(dep), when)?;
                    explain!("touched {} to keep {} rebuildable", dep, target);
                }
            }
        }

        Ok(())
    }

    /// Expects |beam| to already contain |target|.
    fn resolve_deps(
        &self,
        target: &str,
        idx: TargetIndex,
        depfile: Option<&str>,
        beam: &mut Vec<String>,
    ) -> Result<Vec<String>, String> {
        let mut depfile_contents = None;
        if let Some(depfile) = depfile {
            self.add_target(depfile, beam)?;
            if self.sync_depfiles {
                // The depfile's contents are about to become part of the
                // graph, so it has to be current before we read it.
                Producer::new(self.build.clone(), depfile.to_owned(), beam.len()).produce()?;
            }
            let mut contents = String::new();
            match self.build.disk.read_file(Path::new(depfile), &mut contents) {
                Ok(()) => depfile_contents = Some(contents),
                Err(err) => {
                    if self.build.config.dry_run || !self.sync_depfiles {
                        explain!("treating unreadable depfile {} as empty", depfile);
                        depfile_contents = Some(String::new());
                    } else {
                        return Err(format!(
                            "loading depfile '{}' for {}: {}",
                            depfile,
                            target,
                            err.message()
                        ));
                    }
                }
            }
        }

        let ddeps = {
            let plan = self.build.plan.lock().unwrap();
            direct_dependencies(&plan.get(idx).irule, depfile_contents.as_deref())?
        };
        {
            let mut plan = self.build.plan.lock().unwrap();
            plan.get_mut(idx).ddeps = ddeps.clone();
        }

        for dep in &ddeps {
            self.add_target(dep, beam)?;
        }

        Ok(ddeps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::build::BuildConfig;
    use super::super::test::{build_with_vfs, VirtualFileSystem};

    fn add(build: &Arc<Build>, target: &str) -> Result<(), String> {
        DependencyScan::new(build).add_target(target, &mut Vec::new())
    }

    fn is_out_of_date(build: &Arc<Build>, target: &str) -> bool {
        build
            .state
            .lock()
            .unwrap()
            .out_of_date
            .contains(target)
    }

    fn is_missing(build: &Arc<Build>, target: &str) -> bool {
        build.state.lock().unwrap().missing.contains(target)
    }

    #[test]
    fn fresh_target_is_not_out_of_date() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("b"), "dep");
        vfs.tick();
        vfs.create(Path::new("a"), "old");
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = cat b > a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        add(&build, "a").unwrap();
        assert!(!is_out_of_date(&build, "a"));
        assert!(!is_out_of_date(&build, "b"));
    }

    #[test]
    fn newer_dependency_makes_target_stale() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "old");
        vfs.tick();
        vfs.create(Path::new("b"), "newer dep");
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = cat b > a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        add(&build, "a").unwrap();
        assert!(is_out_of_date(&build, "a"));
        assert!(!is_out_of_date(&build, "b"));

        let plan = build.plan.lock().unwrap();
        let idx = plan.lookup("a").unwrap();
        assert_eq!(plan.get(idx).changed_ddep, Some("b".to_owned()));
    }

    #[test]
    fn missing_target_records_max_dependency_time() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("b"), "dep");
        let dep_time = vfs.mtime(Path::new("b"));
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = cat b > a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        add(&build, "a").unwrap();
        assert!(is_missing(&build, "a"));
        assert!(!is_missing(&build, "b"));

        let plan = build.plan.lock().unwrap();
        let idx = plan.lookup("a").unwrap();
        assert_eq!(plan.get(idx).time, dep_time);
    }

    #[test]
    fn tasks_are_always_out_of_date_and_contagious() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "exists");
        let build = build_with_vfs(
            "[t]\ntype = task\nrecipe = true\n[a]\ndep.t = t\nrecipe = touch a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        add(&build, "a").unwrap();
        assert!(is_out_of_date(&build, "t"));
        assert!(is_out_of_date(&build, "a"));
    }

    #[test]
    fn always_build_reaches_everything() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "fresh");
        let mut config = BuildConfig::new();
        config.always_build = true;
        let build = build_with_vfs("[a]\nrecipe = touch a\n", vfs.clone(), config);

        add(&build, "a").unwrap();
        assert!(is_out_of_date(&build, "a"));
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let vfs = Arc::new(VirtualFileSystem::new());
        let build = build_with_vfs(
            "[a]\ndep.b = b\n[b]\ndep.a = a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        let err = add(&build, "a").unwrap_err();
        assert_eq!(err, "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn output_cycles_are_rejected() {
        let vfs = Arc::new(VirtualFileSystem::new());
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = touch a\n[b]\noutputs = a\nrecipe = touch b a\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        let err = add(&build, "a").unwrap_err();
        assert_eq!(err, "cyclic dependency: a -> b -> a");
    }

    #[test]
    fn realization_is_idempotent() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("shared"), "dep");
        let build = build_with_vfs(
            concat!(
                "[a]\ndep.s = shared\nrecipe = touch a\n",
                "[b]\ndep.s = shared\nrecipe = touch b\n",
            ),
            vfs.clone(),
            BuildConfig::new(),
        );

        add(&build, "a").unwrap();
        add(&build, "b").unwrap();
        add(&build, "a").unwrap();
        assert_eq!(build.plan.lock().unwrap().len(), 3);
    }

    #[test]
    fn pretend_up_to_date_suppresses_staleness_but_records_the_change() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "old");
        vfs.tick();
        vfs.create(Path::new("b"), "modified");
        let mut config = BuildConfig::new();
        config.pretend_up_to_date.insert("b".to_owned());
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = cat b > a\n[b]\nrecipe = date > b\n",
            vfs.clone(),
            config,
        );

        add(&build, "a").unwrap();
        assert!(!is_out_of_date(&build, "a"));

        let plan = build.plan.lock().unwrap();
        let idx = plan.lookup("a").unwrap();
        assert_eq!(plan.get(idx).changed_ddep, Some("b".to_owned()));
    }

    #[test]
    fn rewind_touch_advances_the_pretended_dependency() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "old");
        vfs.tick();
        vfs.create(Path::new("b"), "modified");
        let before = vfs.mtime(Path::new("b"));
        let mut config = BuildConfig::new();
        config.pretend_up_to_date.insert("b".to_owned());
        let build = build_with_vfs(
            "[a]\ndep.b = b\nrecipe = cat b > a\n[b]\nrecipe = date > b\n",
            vfs.clone(),
            config,
        );

        DependencyScan::rewind(&build)
            .add_target("a", &mut Vec::new())
            .unwrap();

        let after = vfs.mtime(Path::new("b"));
        assert!(after > before);
        assert!(after > vfs.mtime(Path::new("a")));
    }

    #[test]
    fn rewind_does_not_touch_when_target_was_stale_anyway() {
        // The other dependency keeps the target out of date, so nothing may
        // be touched: the target will be rebuilt next time regardless.
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("a"), "old");
        vfs.tick();
        vfs.create(Path::new("b"), "modified");
        vfs.tick();
        vfs.create(Path::new("c"), "also modified");
        let before = vfs.mtime(Path::new("b"));
        let mut config = BuildConfig::new();
        config.pretend_up_to_date.insert("b".to_owned());
        let build = build_with_vfs(
            "[a]\ndep.b = b\ndep.c = c\nrecipe = cat b c > a\n",
            vfs.clone(),
            config,
        );

        DependencyScan::rewind(&build)
            .add_target("a", &mut Vec::new())
            .unwrap();
        assert_eq!(vfs.mtime(Path::new("b")), before);
    }

    #[test]
    fn depfile_contributes_dependencies() {
        let vfs = Arc::new(VirtualFileSystem::new());
        vfs.create(Path::new("x.d"), "h1\nh2\n");
        vfs.create(Path::new("h1"), "");
        vfs.create(Path::new("h2"), "");
        vfs.tick();
        vfs.create(Path::new("x"), "fresh");
        let build = build_with_vfs(
            "[x]\ndepfile = x.d\nrecipe = gen x\n[x.d]\nrecipe = gen x.d\n",
            vfs.clone(),
            BuildConfig::new(),
        );

        // No depfile sync: the scan just reads what is on disk.
        let mut scan = DependencyScan::new(&build);
        scan.sync_depfiles = false;
        scan.add_target("x", &mut Vec::new()).unwrap();

        let plan = build.plan.lock().unwrap();
        let idx = plan.lookup("x").unwrap();
        assert_eq!(
            plan.get(idx).ddeps,
            vec!["x.d".to_owned(), "h1".to_owned(), "h2".to_owned()]
        );
        assert!(plan.lookup("h1").is_some());
        assert!(plan.lookup("h2").is_some());
    }
}
