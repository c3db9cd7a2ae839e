//! A random, process-stable session id surfaced in the startup success
//! message (§3.1, §4.11). Not otherwise interpreted by this crate.

use lazy_static::lazy_static;
use rand::RngCore;

lazy_static! {
    static ref SESSION_ID: u32 = rand::thread_rng().next_u32();
}

/// Returns the same value for the lifetime of this process.
pub fn session_id() -> u32 {
    *SESSION_ID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_stable_within_a_process() {
        assert_eq!(session_id(), session_id());
    }
}
