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

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether explain!{} output is enabled; set by -d/--debug.
static EXPLAINING: AtomicBool = AtomicBool::new(false);

pub fn explaining() -> bool {
    EXPLAINING.load(Ordering::Relaxed)
}

pub fn set_explaining(on: bool) {
    EXPLAINING.store(on, Ordering::Relaxed);
}
