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

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use super::timestamp::TimeStamp;

/// Result of read_file.
#[derive(Debug)]
pub enum FileReaderError {
    NotFound(String),
    OtherError(String),
}

impl FileReaderError {
    pub fn message(&self) -> &str {
        match *self {
            FileReaderError::NotFound(ref m) => m,
            FileReaderError::OtherError(ref m) => m,
        }
    }
}

/// Interface for reading files from disk.  See DiskInterface for details.
/// This base offers the minimum interface needed just to read files.
pub trait FileReader {
    /// Read and store in the given string.
    fn read_file(&self, path: &Path, contents: &mut String) -> Result<(), FileReaderError>;
}

/// Interface for accessing the disk.
///
/// Abstract so it can be mocked out for tests.  The real implementation
/// is RealDiskInterface.
pub trait DiskInterface: FileReader {
    /// stat() a file, returning the mtime, or TimeStamp(0) if missing.
    fn stat(&self, path: &Path) -> Result<TimeStamp, String>;

    /// Create a file with the given contents, replacing any existing one.
    fn write_file(&self, path: &Path, contents: &str) -> Result<(), String>;

    /// Remove the file named |path|.  Returns Ok(false) if it did not exist.
    fn remove_file(&self, path: &Path) -> Result<bool, String>;

    /// Rename |from| to |to|.  Returns Ok(false) if |from| did not exist.
    fn rename(&self, from: &Path, to: &Path) -> Result<bool, String>;

    /// Set the modification time of |path|.
    fn touch(&self, path: &Path, time: TimeStamp) -> Result<(), String>;

    /// The current time, in the same scale stat() reports.
    fn now(&self) -> TimeStamp;
}

pub struct RealDiskInterface {}

impl FileReader for RealDiskInterface {
    fn read_file(&self, path: &Path, contents: &mut String) -> Result<(), FileReaderError> {
        let mut file = fs::File::open(path).map_err(|err| {
            let c = if err.kind() == ErrorKind::NotFound {
                FileReaderError::NotFound
            } else {
                FileReaderError::OtherError
            };
            c(format!("{}", err))
        })?;

        file.read_to_string(contents)
            .map_err(|err| FileReaderError::OtherError(format!("{}", err)))?;

        Ok(())
    }
}

fn system_time_to_timestamp(time: SystemTime) -> TimeStamp {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => TimeStamp(since.as_nanos() as i64),
        Err(_) => TimeStamp(0),
    }
}

impl DiskInterface for RealDiskInterface {
    fn stat(&self, path: &Path) -> Result<TimeStamp, String> {
        match fs::metadata(path) {
            Ok(metadata) => {
                let mtime = metadata
                    .modified()
                    .map_err(|e| format!("stat({}): {}", path.display(), e))?;
                Ok(system_time_to_timestamp(mtime))
            }
            Err(ref err) if err.kind() == ErrorKind::NotFound => Ok(TimeStamp(0)),
            Err(err) => Err(format!("stat({}): {}", path.display(), err)),
        }
    }

    fn write_file(&self, path: &Path, contents: &str) -> Result<(), String> {
        fs::write(path, contents).map_err(|e| format!("writing {}: {}", path.display(), e))
    }

    fn remove_file(&self, path: &Path) -> Result<bool, String> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(ref err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(format!("removing {}: {}", path.display(), err)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<bool, String> {
        match fs::rename(from, to) {
            Ok(()) => Ok(true),
            Err(ref err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(format!(
                "renaming {} to {}: {}",
                from.display(),
                to.display(),
                err
            )),
        }
    }

    #[cfg(unix)]
    fn touch(&self, path: &Path, time: TimeStamp) -> Result<(), String> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| format!("touching {}: embedded NUL", path.display()))?;
        let spec = libc::timespec {
            tv_sec: time.whole_seconds() as libc::time_t,
            tv_nsec: time.subsec_nanos() as _,
        };
        let times = [spec, spec];
        let ret = unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0) };
        if ret != 0 {
            return Err(format!("touching {}: {}", path.display(), errno::errno()));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn touch(&self, path: &Path, _time: TimeStamp) -> Result<(), String> {
        Err(format!(
            "touching {}: setting file times is not supported on this platform",
            path.display()
        ))
    }

    fn now(&self) -> TimeStamp {
        system_time_to_timestamp(SystemTime::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stat_missing_is_zero() {
        let disk = RealDiskInterface {};
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope");
        assert_eq!(disk.stat(&path).unwrap(), TimeStamp(0));
    }

    #[test]
    fn write_stat_remove() {
        let disk = RealDiskInterface {};
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");

        disk.write_file(&path, "hello\n").unwrap();
        assert!(disk.stat(&path).unwrap().exists());

        let mut contents = String::new();
        disk.read_file(&path, &mut contents).unwrap();
        assert_eq!(contents, "hello\n");

        assert_eq!(disk.remove_file(&path).unwrap(), true);
        assert_eq!(disk.remove_file(&path).unwrap(), false);
    }

    #[test]
    fn rename_missing_is_tolerated() {
        let disk = RealDiskInterface {};
        let dir = tempdir().unwrap();
        let from = dir.path().join("gone");
        let to = dir.path().join("gone~");
        assert_eq!(disk.rename(&from, &to).unwrap(), false);
    }

    #[cfg(unix)]
    #[test]
    fn touch_moves_mtime_forward() {
        let disk = RealDiskInterface {};
        let dir = tempdir().unwrap();
        let path = dir.path().join("file");
        disk.write_file(&path, "x").unwrap();

        let future = disk.now().plus_seconds(5);
        disk.touch(&path, future).unwrap();
        let mtime = disk.stat(&path).unwrap();
        assert!(mtime > disk.now());
    }
}
