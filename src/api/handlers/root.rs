use crate::GIT_COMMIT_HASH;
use axum::response::IntoResponse;

// axum handler for `/`, not part of the OpenAPI document
pub async fn root() -> impl IntoResponse {
    let short_hash = GIT_COMMIT_HASH.get(0..7).unwrap_or(GIT_COMMIT_HASH);
    format!(
        "{} {} ({short_hash})\n",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}
