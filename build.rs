// build.rs

use std::env;

fn main() -> anyhow::Result<()> {
    // Necessary because of this issue: https://github.com/rust-lang/cargo/issues/9641
    // see also https://github.com/rust-lang/cargo/issues/9554
    // host builds (unit tests) have no ESP-IDF to propagate
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::build::CfgArgs::output_propagated("ESP_IDF")?;
        embuild::build::LinkArgs::output_propagated("ESP_IDF")?;
    }

    let api_port = env::var("API_PORT").unwrap_or_else(|_| "80".into());
    let data_dir = env::var("DATA_DIR").unwrap_or_else(|_| "/spiffs".into());

    println!("cargo:rustc-env=API_PORT={api_port}");
    println!("cargo:rustc-env=DATA_DIR={data_dir}");
    println!("cargo:rerun-if-env-changed=API_PORT");
    println!("cargo:rerun-if-env-changed=DATA_DIR");

    Ok(())
}

// EOF
