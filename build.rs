use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let output_dir = PathBuf::from(&crate_dir).join("include");

    println!("cargo:rerun-if-changed=src/ffi.rs");
    let _ = std::fs::create_dir_all(&output_dir);

    // Generate C header file for hosting environments
    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        braces: cbindgen::Braces::SameLine,
        style: cbindgen::Style::Both,
        ..Default::default()
    };

    match cbindgen::Builder::new()
        .with_crate(crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(output_dir.join("sshexec_core.h"));
        }
        Err(e) => {
            println!("cargo:warning=Unable to generate C bindings: {}", e);
        }
    }
}
