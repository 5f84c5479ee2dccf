/// Builds the gRPC client and server code for `product.proto` using
/// `tonic-prost-build`.
///
/// The generated modules land in `OUT_DIR` together with an encoded file
/// descriptor set, which the server hands to `tonic-reflection`.
///
/// # Files and Paths
///
/// - Proto file: `proto/product.proto`
/// - Includes: `proto/`
///
/// # Panics
///
/// Panics if code generation fails; there is nothing sensible to build
/// without the wire schema.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let descriptor_path = out_dir.join("product_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/product.proto");

    tonic_prost_build::configure()
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(&["proto/product.proto"], &["proto"])
        .expect("failed to compile proto/product.proto");
}
