fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Prefer a system protoc when one is configured, otherwise use the vendored binary.
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::compile_protos("proto/telemon.proto")?;
    Ok(())
}
