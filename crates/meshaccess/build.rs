fn main() {
    let exported = [
        ("TARGET", "MESHACCESS_BUILD_TARGET"),
        ("PROFILE", "MESHACCESS_BUILD_PROFILE"),
    ];
    for (var, key) in exported {
        if let Ok(value) = std::env::var(var) {
            println!("cargo:rustc-env={key}={value}");
        }
        println!("cargo:rerun-if-env-changed={var}");
    }
}
