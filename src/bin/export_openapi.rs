//! Export the OpenAPI document as JSON to stdout or a file.
//!
//! Usage:
//!   cargo run --bin export_openapi            # stdout
//!   cargo run --bin export_openapi -- api.json

use cinemax::gateway::openapi::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let doc = ApiDoc::openapi()
        .to_pretty_json()
        .expect("OpenAPI document serializes");

    match std::env::args().nth(1) {
        Some(path) => {
            std::fs::write(&path, &doc).expect("write OpenAPI file");
            eprintln!("OpenAPI document written to {path}");
        }
        None => println!("{doc}"),
    }
}
