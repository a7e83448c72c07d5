//! Xname canonicalization.
//!
//! Hardware identifiers of the form `x<cab>c<chassis>s<slot>b<bmc>n<node>`
//! arrive from users and session templates with arbitrary case and leading
//! zeros. HSM, PCS and BSS all key on the canonical lowercase zero-stripped
//! form, so every xname is normalized before it is stored or compared.

use regex::Regex;
use std::sync::OnceLock;

static XNAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn xname_pattern() -> &'static Regex {
    XNAME_PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"x0*(\d+)c0*(\d+)s0*(\d+)b0*(\d+)n0*(\d+)").expect("static xname pattern")
    })
}

/// Canonicalize a node xname: lowercase, leading zeros stripped from each
/// numeric field. Strings that do not look like a node xname are returned
/// lowercased but otherwise untouched.
pub fn canonize(xname: &str) -> String {
    let lowered = xname.to_lowercase();
    xname_pattern()
        .replace_all(&lowered, "x${1}c${2}s${3}b${4}n${5}")
        .into_owned()
}

/// Canonicalize every entry of a node list in place.
pub fn canonize_all(xnames: &mut [String]) {
    for xname in xnames.iter_mut() {
        *xname = canonize(xname);
    }
}
