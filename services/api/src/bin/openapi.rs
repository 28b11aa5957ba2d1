//! services/api/src/bin/openapi.rs
//!
//! Writes the OpenAPI 3.0 specification for the REST surface to
//! `openapi.json`, for clients that consume the spec offline.

use api_lib::web::rest::ApiDoc;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let spec_json = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write("openapi.json", &spec_json)?;
    println!("OpenAPI specification written to openapi.json");
    Ok(())
}
