// build.rs
//
// Stamps a BUILD_DATE constant into OUT_DIR/build_info.rs; main.rs
// includes it for the startup banner.

use chrono::Utc;
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("build_info.rs");

    let build_date = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    fs::write(&dest, format!("pub const BUILD_DATE: &str = \"{}\";", build_date)).unwrap();

    // Rebuilding this script is what refreshes the stamp.
    println!("cargo:rerun-if-changed=build.rs");
}
