/// Liveness probe; no auth, no side effects.
pub async fn health() -> &'static str {
    "OK"
}
