//! RFC 7807 problem documents and their mapping to error kinds.

use serde::Deserialize;
use tracing::warn;

use crate::error::AcmeError;
use crate::transport::HttpResponse;

pub(crate) const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// Structured error body returned by ACME servers (RFC 7807).
#[derive(Debug, Clone, Deserialize)]
pub struct Problem {
    /// Problem type URN.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Human-readable explanation.
    pub detail: Option<String>,
    /// HTTP status the server associated with this problem.
    pub status: Option<u16>,
    /// Per-identifier sub-problems.
    #[serde(default)]
    pub subproblems: Vec<SubProblem>,
}

/// One entry of a problem document's `subproblems` list.
#[derive(Debug, Clone, Deserialize)]
pub struct SubProblem {
    /// Problem type URN.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Human-readable explanation.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Class {
    Invalid,
    Retryable,
    BadArgument,
    AccessDenied,
    TryAgain,
    General,
}

// Closed table, fixed at compile time.
const PROBLEMS: &[(&str, Class)] = &[
    ("acme:error:badCSR", Class::Invalid),
    ("acme:error:badNonce", Class::Retryable),
    ("acme:error:badSignatureAlgorithm", Class::Invalid),
    ("acme:error:invalidContact", Class::BadArgument),
    ("acme:error:unsupportedContact", Class::BadArgument),
    ("acme:error:malformed", Class::Invalid),
    ("acme:error:rateLimited", Class::BadArgument),
    ("acme:error:rejectedIdentifier", Class::BadArgument),
    ("acme:error:serverInternal", Class::General),
    ("acme:error:unauthorized", Class::AccessDenied),
    ("acme:error:unsupportedIdentifier", Class::BadArgument),
    ("acme:error:userActionRequired", Class::TryAgain),
    ("acme:error:badRevocationReason", Class::Invalid),
    ("acme:error:caa", Class::General),
    ("acme:error:dns", Class::General),
    ("acme:error:connection", Class::General),
    ("acme:error:tls", Class::General),
    ("acme:error:incorrectResponse", Class::General),
];

/// Map a problem type string to the matching error kind, carrying
/// `message` as the error text.
pub(crate) fn classify(ptype: &str, message: String) -> AcmeError {
    let stripped = ptype
        .strip_prefix("urn:ietf:params:")
        .or_else(|| ptype.strip_prefix("urn:"))
        .unwrap_or(ptype);

    let class = PROBLEMS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(stripped))
        .map(|(_, class)| *class)
        .unwrap_or(Class::General);

    match class {
        Class::Invalid => AcmeError::Invalid(message),
        Class::Retryable => AcmeError::Retryable(message),
        Class::BadArgument => AcmeError::BadArgument(message),
        Class::AccessDenied => AcmeError::AccessDenied(message),
        Class::TryAgain => AcmeError::TryAgain(message),
        Class::General => AcmeError::General(message),
    }
}

/// Turn a non-2xx server response into the matching error. Problem
/// documents are classified; everything else is mapped by HTTP status.
pub(crate) fn inspect(url: &str, res: &HttpResponse) -> AcmeError {
    let is_problem = res
        .header("Content-Type")
        .map(|ctype| ctype.starts_with(PROBLEM_CONTENT_TYPE))
        .unwrap_or(false);

    if is_problem {
        if let Ok(problem) = serde_json::from_slice::<Problem>(&res.body) {
            let ptype = problem.kind.as_deref().unwrap_or("about:blank");
            let detail = problem.detail.as_deref().unwrap_or("no detail given");
            warn!("acme problem {} at {}: {}", ptype, url, detail);
            return classify(ptype, format!("{} at {}: {}", ptype, url, detail));
        }
    }

    match res.status {
        400 => AcmeError::Invalid(format!("{}: HTTP 400", url)),
        403 => AcmeError::AccessDenied(url.to_string()),
        404 => AcmeError::NotFound(url.to_string()),
        status => {
            warn!("unclassified acme failure at {}: HTTP status {}", url, status);
            AcmeError::General(format!("{}: HTTP {}", url, status))
        }
    }
}
