//! Test fixtures: case files and clients for the stores and services the
//! system under test writes to.

pub mod cases;
pub mod edge_registry;
pub mod postgres;
pub mod query_router;
pub mod victoria;

pub use cases::{load_case, Case, FixtureError};
pub use edge_registry::EdgeRegistryClient;
pub use postgres::{DataRow, RelationalStore};
pub use query_router::QueryRouterClient;
pub use victoria::{SeriesStore, SeriesTimestamp};

/// Maximum length for error body in error messages.
const MAX_ERROR_BODY_LEN: usize = 256;

/// Truncate an error response body for inclusion in an error message.
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LEN {
        return body.to_string();
    }

    let mut end = MAX_ERROR_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...[truncated]", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_body_untouched() {
        assert_eq!(truncate_body("not found"), "not found");
    }

    #[test]
    fn test_long_body_truncated_on_char_boundary() {
        let body = "é".repeat(200);
        let truncated = truncate_body(&body);

        assert!(truncated.ends_with("...[truncated]"));
        assert!(truncated.len() <= MAX_ERROR_BODY_LEN + "...[truncated]".len());
    }
}
