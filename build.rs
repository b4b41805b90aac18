fn main() {
    // Record compiler and build-time details for the binary's version banner.
    built::write_built_file().expect("Failed to acquire build-time information");

    println!("cargo:rerun-if-changed=build.rs");
}
