/// Resolve a fixture path relative to the crate root, failing the build
/// if the file does not exist.
/// [link](https://stackoverflow.com/questions/73187970/compile-time-check-if-file-at-path-exists-like-include-str)
#[macro_export]
macro_rules! test_file_path {
    ($arg1:expr) => {{
        let _ = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $arg1));
        concat!(env!("CARGO_MANIFEST_DIR"), $arg1)
    }};
}
