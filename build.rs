use std::env;
use std::path::{Path, PathBuf};

// ffmpeg-sys-next does the actual discovery and linking. This script only
// explains the environment it expects when discovery is likely to fail.
fn main() {
    for variable in ["FFMPEG_DIR", "PKG_CONFIG_PATH", "VCPKG_ROOT", "VCPKGRS_TRIPLET"] {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    if let Some(directory) = env::var_os("FFMPEG_DIR") {
        check_ffmpeg_dir(Path::new(&directory));
        return;
    }

    match env::var("CARGO_CFG_TARGET_OS").unwrap_or_default().as_str() {
        "windows" => vcpkg_hint(),
        "linux" if env::var_os("CARGO_FEATURE_CAPI").is_some() => println!(
            "cargo:warning=Building the C ABI: hardware decoding needs an FFmpeg built with --enable-vaapi/--enable-cuda/--enable-libmfx as appropriate."
        ),
        _ => {}
    }
}

fn check_ffmpeg_dir(directory: &Path) {
    let headers = directory.join("include").join("libavcodec");
    if !headers.exists() {
        println!(
            "cargo:warning=FFMPEG_DIR={} has no include/libavcodec; ffmpeg-sys-next will fail to find the headers.",
            directory.display()
        );
    }
}

fn vcpkg_hint() {
    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=FFMPEG_DIR is not set. On Windows, install FFmpeg (with the qsv, dxva2 and d3d11va features) via vcpkg and set FFMPEG_DIR."
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let installed = PathBuf::from(&vcpkg_root).join("installed").join(&triplet);

    if installed.exists() {
        println!(
            "cargo:warning=Found vcpkg FFmpeg at {0}. Set FFMPEG_DIR={0} to make discovery explicit.",
            installed.display(),
        );
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but {} does not exist.",
            installed.display(),
        );
    }
}
