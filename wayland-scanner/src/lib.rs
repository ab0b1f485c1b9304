//! Build-time code generator for Wayland protocol XML descriptions.
//!
//! Meant to be invoked from a crate's `build.rs`:
//!
//! ```no_run
//! fn main() {
//!     let out_dir = std::env::var("OUT_DIR").unwrap();
//!     wayland_scanner::generate_client_code(
//!         "protocols/wayland.xml",
//!         &format!("{out_dir}/wayland.rs"),
//!     ).unwrap();
//! }
//! ```

mod ast;
mod codegen;
mod parse;

pub use ast::Protocol;
pub use parse::ParseError;

use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("reading protocol file: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Parse the protocol XML at `xml_path` and write generated client-side
/// proxy source to `out_path`.
pub fn generate_client_code(xml_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<(), GenerateError> {
    let xml = fs::read_to_string(xml_path)?;
    let protocol = parse::parse_protocol(&xml)?;
    let code = codegen::generate_client_code(&protocol);
    fs::write(out_path, code)?;
    Ok(())
}
