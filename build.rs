use std::env;

fn main() {
    println!("cargo:rustc-check-cfg=cfg(ossl300)");

    // Published by openssl-sys, e.g. "30000020" for 3.0.2
    if let Ok(version) = env::var("DEP_OPENSSL_VERSION_NUMBER") {
        if let Ok(version) = u64::from_str_radix(&version, 16) {
            // Legacy ciphers (bf, cast5, des, idea, rc2, rc4, seed) live in a separate provider since 3.0
            if version >= 0x3000_0000 {
                println!("cargo:rustc-cfg=ossl300");
            }
        }
    }
}
