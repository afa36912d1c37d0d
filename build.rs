/// Build script that rejects feature/target combinations the engines cannot
/// compile for.
///
/// `gpu-metal` pulls in Objective-C framework crates through candle, fastembed
/// and mistral.rs, so it is only accepted on Apple targets.
fn main() {
    if std::env::var("CARGO_FEATURE_GPU_METAL").is_ok() {
        let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        if target_os != "macos" && target_os != "ios" {
            panic!(
                "The `gpu-metal` feature is only supported on macOS and iOS.\n\
                 Remove `gpu-metal` from your feature list when building for `{target_os}`, \
                 or use `gpu-cuda` for accelerated compute on this host."
            );
        }
    }
}
