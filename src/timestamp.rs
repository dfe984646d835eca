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

use std::fmt;

/// A modification time, in nanoseconds since the epoch.
///
/// Possible values:
///   0:  the file is missing, or the target is a task
///   >0: the file's mtime
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimeStamp(pub i64);

const NANOS_PER_SEC: i64 = 1_000_000_000;

impl TimeStamp {
    pub fn exists(&self) -> bool {
        self.0 != 0
    }

    pub fn plus_seconds(&self, secs: i64) -> TimeStamp {
        TimeStamp(self.0 + secs * NANOS_PER_SEC)
    }

    pub fn whole_seconds(&self) -> i64 {
        self.0 / NANOS_PER_SEC
    }

    pub fn subsec_nanos(&self) -> i64 {
        self.0 % NANOS_PER_SEC
    }
}

impl fmt::Debug for TimeStamp {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "TimeStamp({})", self.0)
    }
}
