//! Generates `rets_ffi.h` into `OUT_DIR` from the `extern "C"` surface.
//!
//! A header that fails to generate is reported as a warning; the library
//! itself does not depend on it.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let Ok(out_dir) = env::var("OUT_DIR") else {
        return;
    };

    let generated = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("RETS_FFI_H")
        .with_cpp_compat(true)
        .generate();
    match generated {
        Ok(bindings) => {
            bindings.write_to_file(PathBuf::from(out_dir).join("rets_ffi.h"));
        }
        Err(e) => println!("cargo:warning=rets_ffi.h not generated: {e}"),
    }
}
