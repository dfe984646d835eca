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

// Support utilities for tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::build::{Build, BuildConfig};
use super::disk_interface::{DiskInterface, FileReader, FileReaderError, RealDiskInterface};
use super::eval::ScriptEvaluator;
use super::rule_file_parser::parse_rule_file;
use super::rules::RuleSet;
use super::timestamp::TimeStamp;

const TICK: i64 = 1_000_000_000;

/// An entry for a single in-memory file.
struct VirtualFileSystemEntry {
    mtime: TimeStamp,
    contents: String,
}

struct VirtualFileSystemInner {
    files: HashMap<PathBuf, VirtualFileSystemEntry>,
    files_read: Vec<PathBuf>,
    /// A simple fake clock for file operations.
    now: i64,
}

/// An implementation of DiskInterface that uses an in-memory representation
/// of disk state.  It also logs file reads so tests can verify access
/// patterns.
pub struct VirtualFileSystem {
    inner: Mutex<VirtualFileSystemInner>,
}

impl VirtualFileSystem {
    pub fn new() -> Self {
        VirtualFileSystem {
            inner: Mutex::new(VirtualFileSystemInner {
                files: HashMap::new(),
                files_read: Vec::new(),
                now: TICK,
            }),
        }
    }

    /// Tick "time" forwards; subsequent file operations will be newer than
    /// previous ones.
    pub fn tick(&self) -> TimeStamp {
        let mut inner = self.inner.lock().unwrap();
        inner.now += TICK;
        TimeStamp(inner.now)
    }

    /// "Create" a file with contents.
    pub fn create(&self, path: &Path, contents: &str) {
        let mut inner = self.inner.lock().unwrap();
        let mtime = TimeStamp(inner.now);
        inner.files.insert(
            path.to_owned(),
            VirtualFileSystemEntry {
                mtime,
                contents: contents.to_owned(),
            },
        );
    }

    pub fn mtime(&self, path: &Path) -> TimeStamp {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(path)
            .map(|entry| entry.mtime)
            .unwrap_or(TimeStamp(0))
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path).map(|entry| entry.contents.clone())
    }

    pub fn files_read(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().files_read.clone()
    }
}

impl FileReader for VirtualFileSystem {
    fn read_file(&self, path: &Path, contents: &mut String) -> Result<(), FileReaderError> {
        let mut inner = self.inner.lock().unwrap();
        inner.files_read.push(path.to_owned());
        if let Some(entry) = inner.files.get(path) {
            *contents = entry.contents.clone();
            Ok(())
        } else {
            Err(FileReaderError::NotFound(
                "No such file or directory".to_owned(),
            ))
        }
    }
}

impl DiskInterface for VirtualFileSystem {
    fn stat(&self, path: &Path) -> Result<TimeStamp, String> {
        Ok(self.mtime(path))
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), String> {
        self.create(path, contents);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<bool, String> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.files.remove(path).is_some())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<bool, String> {
        let mut inner = self.inner.lock().unwrap();
        match inner.files.remove(from) {
            Some(entry) => {
                inner.files.insert(to.to_owned(), entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn touch(&self, path: &Path, time: TimeStamp) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        match inner.files.get_mut(path) {
            Some(entry) => {
                entry.mtime = time;
            }
            None => {
                inner.files.insert(
                    path.to_owned(),
                    VirtualFileSystemEntry {
                        mtime: time,
                        contents: String::new(),
                    },
                );
            }
        }
        Ok(())
    }

    fn now(&self) -> TimeStamp {
        TimeStamp(self.inner.lock().unwrap().now)
    }
}

/// Compile a rule file from text, panicking on any error.
pub fn ruleset_from_text(text: &str) -> RuleSet {
    let file = parse_rule_file("produce.ini", text).expect("rule file parses");
    RuleSet::from_rule_file("produce.ini", file, Box::new(ScriptEvaluator::new()))
        .expect("rule file compiles")
}

/// A Build backed by an in-memory filesystem.
pub fn build_with_vfs(
    text: &str,
    vfs: Arc<VirtualFileSystem>,
    config: BuildConfig,
) -> Arc<Build> {
    Build::new(config, ruleset_from_text(text), vfs)
}

/// A Build backed by the real filesystem, for tests that run recipes.
pub fn build_with_disk(text: &str, config: BuildConfig) -> Arc<Build> {
    Build::new(config, ruleset_from_text(text), Arc::new(RealDiskInterface {}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_clock_orders_files() {
        let vfs = VirtualFileSystem::new();
        vfs.create(Path::new("old"), "");
        vfs.tick();
        vfs.create(Path::new("new"), "");

        assert!(vfs.mtime(Path::new("new")) > vfs.mtime(Path::new("old")));
        assert_eq!(vfs.mtime(Path::new("absent")), TimeStamp(0));
    }

    #[test]
    fn virtual_rename_and_touch() {
        let vfs = VirtualFileSystem::new();
        vfs.create(Path::new("f"), "data");

        assert_eq!(vfs.rename(Path::new("f"), Path::new("f~")).unwrap(), true);
        assert_eq!(vfs.contents(Path::new("f~")).unwrap(), "data");
        assert_eq!(vfs.rename(Path::new("f"), Path::new("f~")).unwrap(), false);

        let future = vfs.now().plus_seconds(1);
        vfs.touch(Path::new("f~"), future).unwrap();
        assert_eq!(vfs.mtime(Path::new("f~")), future);
    }

    #[test]
    fn reads_are_recorded() {
        let vfs = VirtualFileSystem::new();
        vfs.create(Path::new("f"), "data");
        let mut contents = String::new();
        vfs.read_file(Path::new("f"), &mut contents).unwrap();
        assert_eq!(contents, "data");
        assert_eq!(vfs.files_read(), vec![PathBuf::from("f")]);
    }
}
