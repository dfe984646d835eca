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

extern crate errno;
extern crate libc;
extern crate regex;
extern crate tempfile;
#[macro_use]
extern crate clap;
#[macro_use]
extern crate lazy_static;

extern crate num_cpus;

#[macro_use]
pub mod utils;
#[cfg(test)]
pub mod test;
pub mod build;
pub mod graph;
pub mod timestamp;
pub mod debug_flags;
pub mod version;
pub mod eval;
pub mod interpolation;
pub mod pattern;
pub mod rule_file_parser;
pub mod rules;
pub mod disk_interface;
pub mod produce;
