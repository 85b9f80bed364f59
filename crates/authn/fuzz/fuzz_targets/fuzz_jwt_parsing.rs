//! Fuzz target for JWT parsing.
//!
//! Feeds arbitrary byte strings as JWT tokens to the unverified decoding
//! path that runs before any key lookup. Every result must be either
//! `Ok(...)` or `Err(AuthError)`; no input may panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use forge_common_authn::{
    claims::parse_list_str,
    jwt::{decode_token_header, decode_unverified_claims},
    validation::verifier_algorithm,
};

fuzz_target!(|data: &[u8]| {
    // Only process valid UTF-8; JWT tokens are always UTF-8 strings
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    // Header decoding must not panic, and the algorithm string must be
    // checked safely whatever it holds
    if let Ok(header) = decode_token_header(token) {
        let _ = verifier_algorithm(&header.alg);
    }

    // Claims decoding must not panic, nor may any accessor on what it yields
    if let Ok(claims) = decode_unverified_claims(token) {
        let _ = claims.issuer();
        let _ = claims.subject();
        let _ = claims.audiences();
        let _ = claims.scopes();
        let _ = claims.names();
        let _ = claims.get_list("realm_access.roles");
    }

    // List parsing sees raw claim strings
    let _ = parse_list_str(token);
});
