//! Header names and problem-type URIs shared across the HTTP layer.

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const PROBLEM_INTERNAL: &str = "https://dialtone.dev/problems/internal";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://dialtone.dev/problems/not-found";
pub(crate) const PROBLEM_INVALID_REQUEST: &str = "https://dialtone.dev/problems/invalid-request";
pub(crate) const PROBLEM_SERVICE_UNAVAILABLE: &str =
    "https://dialtone.dev/problems/service-unavailable";
