// https://docs.rs/tonic-build/0.10.2/tonic_build/
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_files = &["protocols/namespace.proto"];
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(proto_files, &["protocols"])?;
    Ok(())
}
