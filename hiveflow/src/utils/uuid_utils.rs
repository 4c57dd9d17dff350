//! UUID generation for job and task identifiers.

use uuid::Uuid;

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_v7_is_monotonic_enough() {
        let a = generate_uuid_v7();
        let b = generate_uuid_v7();
        assert!(b >= a);
    }
}
