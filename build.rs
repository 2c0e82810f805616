fn main() {
    // The `espidf` feature is off by default so host tests build; ESP-IDF
    // targets must enable it explicitly.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf")
        && std::env::var_os("CARGO_FEATURE_ESPIDF").is_none()
    {
        panic!("target_os = \"espidf\" requires `--features espidf`");
    }

    println!("cargo:rerun-if-env-changed=DAPBRIDGE_WIFI_SSID");
    println!("cargo:rerun-if-env-changed=DAPBRIDGE_WIFI_PASS");

    // Only the ESP-IDF build needs the toolchain environment exported.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
