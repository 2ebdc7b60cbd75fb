use std::env;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use walkdir::WalkDir;

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=DOCQA_PDFIUM_DIR");
    println!("cargo:rerun-if-env-changed=DOCQA_PDFIUM_LIBRARY_PATH");
    println!("cargo:rerun-if-env-changed=PDFIUM_DYNAMIC_LIB_PATH");
    println!("cargo:rerun-if-env-changed=PDFIUM_STATIC_LIB_PATH");

    if env::var_os("PDFIUM_DYNAMIC_LIB_PATH").is_some()
        || env::var_os("PDFIUM_STATIC_LIB_PATH").is_some()
    {
        // pdfium-render picks these up itself.
        return Ok(());
    }

    if let Some(path) = env::var_os("DOCQA_PDFIUM_LIBRARY_PATH") {
        return bake_library_path(Path::new(&path));
    }

    let Some(dir) = env::var_os("DOCQA_PDFIUM_DIR").map(PathBuf::from) else {
        // Bound at runtime from the working directory or the system library path.
        return Ok(());
    };

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    match locate_library(&dir, &target_os) {
        Ok(path) => bake_library_path(&path),
        Err(err) => {
            println!("cargo:warning={err}");
            Ok(())
        }
    }
}

fn bake_library_path(path: &Path) -> Result<()> {
    let path = path
        .to_str()
        .ok_or_else(|| anyhow!("pdfium library path {:?} is not UTF-8", path))?;
    println!("cargo:rustc-env=DOCQA_PDFIUM_LIBRARY_PATH={path}");
    Ok(())
}

fn library_filename(target_os: &str) -> &'static str {
    match target_os {
        "windows" => "pdfium.dll",
        "macos" => "libpdfium.dylib",
        _ => "libpdfium.so",
    }
}

fn locate_library(root: &Path, target_os: &str) -> Result<PathBuf> {
    let wanted = library_filename(target_os);
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == wanted)
        .map(|entry| entry.into_path())
        .ok_or_else(|| anyhow!("{wanted} not found under {}", root.display()))
}
