//! Every source file carries the project's GPL-3 header

// Copyright (c) 2024 The H-RTK bridge firmware authors
//
// This file is part of the H-RTK bridge firmware.
//
// The H-RTK bridge firmware is free software: you can redistribute it and/or modify it under
// the terms only of version 3 of the GNU General Public License as published
// by the Free Software Foundation
//
// The H-RTK bridge firmware is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along with
// the H-RTK bridge firmware(in a file named COPYING).
// If not, see <https://www.gnu.org/licenses/>.

use std::fs;
use std::path::Path;

const HOLDER: &str = "// Copyright (c) 2024 The H-RTK bridge firmware authors\n";
const LICENSE: &str = "version 3 of the GNU General Public License";

#[test]
fn every_source_file_has_the_same_header() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut checked = 0;

    for dir in ["src", "tests"] {
        for entry in fs::read_dir(root.join(dir)).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().and_then(|e| e.to_str()) != Some("rs") {
                continue;
            }
            let text = fs::read_to_string(&path).unwrap();

            // Module docs first, then the header
            let after_docs: String = text
                .lines()
                .skip_while(|l| l.starts_with("//!") || l.is_empty())
                .map(|l| format!("{l}\n"))
                .collect();

            assert!(after_docs.starts_with(HOLDER), "{} header", path.display());
            assert!(text.contains(LICENSE), "{} license", path.display());
            checked += 1;
        }
    }

    assert!(checked >= 10);
}
