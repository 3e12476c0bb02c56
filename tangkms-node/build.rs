fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/v1beta1.proto", "proto/v2.proto"], &["proto"])?;
    Ok(())
}
