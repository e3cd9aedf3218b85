/// Builds the gRPC client and server code for `simbroker.proto` using
/// `tonic-prost-build`.
///
/// The proto file defines three services: the external `SearchService` the
/// broker consumes, the `Broker` service workers push results into, and the
/// `Simulator` service every worker exposes.
///
/// # Files and Paths
///
/// - Proto file: `proto/simbroker.proto`
/// - Includes: `proto/`
///
/// # Output
///
/// Generated code is included in the crate via:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("simbroker");
/// }
/// ```
///
/// An encoded file descriptor set is also written to `OUT_DIR` so the servers
/// can expose gRPC reflection.
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("simbroker_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/simbroker.proto"], &["proto"])
        .unwrap();
}
