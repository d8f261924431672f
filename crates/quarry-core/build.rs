//! Build script for quarry-core
//!
//! Checks the toolchain and target before compilation. The crate drives the
//! Linux tracing interface directly, so anything other than a Linux
//! x86-64/AArch64 target fails at compile time anyway; the checks here
//! exist to turn that into a readable message early.

fn main()
{
    // Register mirrors rely on stable repr(C) layouts that we static-assert;
    // the MSRV below is what the crate is tested against.
    if let Ok(rustc_version) = rustc_version::version() {
        let min_rust_version = rustc_version::Version::parse("1.74.0").unwrap();

        if rustc_version < min_rust_version {
            panic!(
                "quarry-core requires Rust {} or newer, found {}",
                min_rust_version, rustc_version
            );
        }
    } else {
        println!("cargo:warning=could not verify Rust version");
    }

    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "linux" {
        println!("cargo:warning=quarry-core targets Linux; building for '{target_os}' will fail");
    }

    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_arch != "x86_64" && target_arch != "aarch64" {
        println!("cargo:warning=unsupported target architecture '{target_arch}' (expected x86_64 or aarch64)");
    }
}
